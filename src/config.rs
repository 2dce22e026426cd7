use std::fmt::Display;
use std::str::FromStr;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "http://localhost:8080/api/v1";
const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 100;
const DEFAULT_REFRESH_LEAD_SECS: i64 = 5 * 60;
const DEFAULT_GEOLOCATION_TIMEOUT_MS: u64 = 10_000;
const MIB: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub origin: String,
    pub login_path: String,
    pub logout_path: String,
    pub oidc: OidcConfig,
    pub table_page_size: usize,
    pub search_debounce_ms: u64,
    pub token_refresh_lead_secs: i64,
    pub geolocation_timeout_ms: u64,
    pub import: ImportLimits,
}

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub client_secret: Option<SecretString>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ImportLimits {
    pub max_bytes: u64,
    pub min_bytes: u64,
    pub confirm_bytes: u64,
    pub warn_bytes: u64,
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_bytes: 500 * MIB,
            min_bytes: 1024,
            confirm_bytes: 100 * MIB,
            warn_bytes: 50 * MIB,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub api_base_url: String,
    pub origin: String,
    pub login_path: String,
    pub oidc_base_url: String,
    pub oidc_realm: String,
    pub oidc_client_id: String,
    pub has_oidc_client_secret: bool,
    pub table_page_size: usize,
    pub search_debounce_ms: u64,
    pub token_refresh_lead_secs: i64,
    pub import: ImportLimits,
}

impl OidcConfig {
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/auth", self.realm_url())
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.realm_url())
    }

    fn realm_url(&self) -> String {
        format!(
            "{}/realms/{}",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        read_dotenv_in_dev();
        let api_base_url =
            env_text("SALESMAN_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let origin = env_text("SALESMAN_ORIGIN").unwrap_or_else(|| origin_of(&api_base_url));
        let defaults = ImportLimits::default();

        Self {
            origin: origin.trim_end_matches('/').to_string(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            login_path: env_text("SALESMAN_LOGIN_PATH").unwrap_or_else(|| "/login.html".into()),
            logout_path: env_text("SALESMAN_LOGOUT_PATH").unwrap_or_else(|| "/logout".into()),
            oidc: OidcConfig {
                base_url: env_text("OIDC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:8180".into()),
                realm: env_text("OIDC_REALM").unwrap_or_else(|| "simplesalesman".into()),
                client_id: env_text("OIDC_CLIENT_ID")
                    .unwrap_or_else(|| "simplesalesman-frontend".into()),
                redirect_uri: env_text("OIDC_REDIRECT_URI")
                    .unwrap_or_else(|| "http://localhost:8080/callback.html".into()),
                scope: env_text("OIDC_SCOPE").unwrap_or_else(|| "openid profile email".into()),
                client_secret: env_text("OIDC_CLIENT_SECRET").map(SecretString::from),
            },
            table_page_size: env_number("TABLE_PAGE_SIZE", DEFAULT_PAGE_SIZE).max(1),
            search_debounce_ms: env_number("SEARCH_DEBOUNCE_MS", DEFAULT_SEARCH_DEBOUNCE_MS),
            token_refresh_lead_secs: env_number(
                "TOKEN_REFRESH_LEAD_SECS",
                DEFAULT_REFRESH_LEAD_SECS,
            ),
            geolocation_timeout_ms: env_number(
                "GEOLOCATION_TIMEOUT_MS",
                DEFAULT_GEOLOCATION_TIMEOUT_MS,
            ),
            import: ImportLimits {
                max_bytes: env_number("IMPORT_MAX_BYTES", defaults.max_bytes),
                min_bytes: env_number("IMPORT_MIN_BYTES", defaults.min_bytes),
                confirm_bytes: env_number("IMPORT_CONFIRM_BYTES", defaults.confirm_bytes),
                warn_bytes: env_number("IMPORT_WARN_BYTES", defaults.warn_bytes),
            },
        }
    }

    /// Defaults pointed at an explicit API base; the origin is derived from it.
    pub fn for_api_base(api_base_url: impl Into<String>) -> Self {
        let api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        let origin = origin_of(&api_base_url);
        Self {
            oidc: OidcConfig {
                base_url: format!("{origin}/idp"),
                realm: "simplesalesman".into(),
                client_id: "simplesalesman-frontend".into(),
                redirect_uri: format!("{origin}/callback.html"),
                scope: "openid profile email".into(),
                client_secret: None,
            },
            origin,
            api_base_url,
            login_path: "/login.html".into(),
            logout_path: "/logout".into(),
            table_page_size: DEFAULT_PAGE_SIZE,
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            token_refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
            geolocation_timeout_ms: DEFAULT_GEOLOCATION_TIMEOUT_MS,
            import: ImportLimits::default(),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            api_base_url: self.api_base_url.clone(),
            origin: self.origin.clone(),
            login_path: self.login_path.clone(),
            oidc_base_url: self.oidc.base_url.clone(),
            oidc_realm: self.oidc.realm.clone(),
            oidc_client_id: self.oidc.client_id.clone(),
            has_oidc_client_secret: self.oidc.client_secret.is_some(),
            table_page_size: self.table_page_size,
            search_debounce_ms: self.search_debounce_ms,
            token_refresh_lead_secs: self.token_refresh_lead_secs,
            import: self.import,
        }
    }
}

/// `scheme://host[:port]` of a URL, or the trimmed input when it does not parse.
fn origin_of(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => url.trim_end_matches('/').to_string(),
    }
}

/// Debug builds read `.env`; release builds only with `SALESMAN_DOTENV=1`.
fn read_dotenv_in_dev() {
    if !cfg!(debug_assertions) && !env_flag("SALESMAN_DOTENV") {
        return;
    }
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "read dashboard settings from .env"),
        Err(dotenvy::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(error = %err, "ignoring unreadable .env file"),
    }
}

/// Trimmed value of `key`; unset and blank both count as absent.
fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_flag(key: &str) -> bool {
    env_text(key).is_some_and(|value| {
        matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

/// Numeric setting with a fallback. Unparsable values are logged and ignored.
fn env_number<T>(key: &str, fallback: T) -> T
where
    T: FromStr + Copy + Display,
{
    let Some(raw) = env_text(key) else {
        return fallback;
    };
    raw.parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, %fallback, "not a number, using fallback");
        fallback
    })
}
