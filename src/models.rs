use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: i64,
    #[serde(default, alias = "plz", skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: Vec<Project>,
}

impl Address {
    /// Stand-in for notes whose address is not in the loaded collection.
    pub fn placeholder(id: i64, address_text: Option<&str>) -> Self {
        Self {
            id,
            address_text: Some(
                address_text
                    .filter(|text| !text.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Address ID: {id}")),
            ),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub product_price: Option<f64>,
    #[serde(default)]
    pub sales_start: Option<NaiveDate>,
    #[serde(default)]
    pub sales_end: Option<NaiveDate>,
    #[serde(default)]
    pub number_of_homes: Option<u32>,
}

impl Project {
    pub fn canonical_status(&self) -> ProjectStatus {
        ProjectStatus::from_raw(self.status.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Completed,
    Pending,
    Cancelled,
    Unknown,
}

impl ProjectStatus {
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_lowercase()).as_deref() {
            Some("completed") => Self::Completed,
            Some("pending") => Self::Pending,
            Some("cancelled") => Self::Cancelled,
            _ => Self::Unknown,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Completed => "status-completed",
            Self::Pending => "status-pending",
            Self::Cancelled => "status-cancelled",
            Self::Unknown => "",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Completed => "bi-check-circle-fill",
            Self::Pending => "bi-clock-fill",
            Self::Cancelled => "bi-x-circle-fill",
            Self::Unknown => "bi-question-circle-fill",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub address_id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default, with = "lenient_timestamp")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_text: Option<String>,
}

/// A note joined at read time with its owning address. The join is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedNote {
    #[serde(flatten)]
    pub note: Note,
    pub address: Address,
}

impl JoinedNote {
    pub fn join(note: Note, addresses: &[Address]) -> Self {
        let address_id = note.address_id.unwrap_or_default();
        let address = addresses
            .iter()
            .find(|address| address.id == address_id)
            .cloned()
            .unwrap_or_else(|| Address::placeholder(address_id, note.address_text.as_deref()));
        Self { note, address }
    }

    pub fn id(&self) -> Option<i64> {
        self.note.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(default)]
    pub records_processed: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Token response of both `/auth/refresh` and the identity provider's token endpoint.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    #[serde(alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Missing and explicit `null` both fall back to the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .map(|ts| ts.naive_local())
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok())
            .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
    }
}

pub use lenient_timestamp::parse as parse_timestamp;
