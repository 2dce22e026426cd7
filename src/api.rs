use std::path::Path;
use std::sync::Arc;

use futures_util::stream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Response, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{Address, ImportResult, Note, TokenSet};
use crate::session::{SessionStore, ACCESS_TOKEN, USERNAME};
use crate::utils::file_extension;

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_MIME: &str = "application/vnd.ms-excel";

/// Decoded body of a successful backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Empty,
    Json(Value),
    Text(String),
}

impl ApiResponse {
    /// Typed view of the body; an empty body yields `None`.
    pub fn decode<T: DeserializeOwned>(self) -> AppResult<Option<T>> {
        match self {
            ApiResponse::Empty => Ok(None),
            ApiResponse::Json(value) => Ok(Some(serde_json::from_value(value)?)),
            ApiResponse::Text(text) if text.trim().is_empty() => Ok(None),
            ApiResponse::Text(text) => Ok(Some(serde_json::from_str(&text)?)),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ApiResponse::Empty => String::new(),
            ApiResponse::Json(Value::String(text)) => text,
            ApiResponse::Json(value) => value.to_string(),
            ApiResponse::Text(text) => text,
        }
    }
}

/// Body of note mutations. The backend answers with a status message and may
/// echo note fields, which are overlaid onto the local copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteMutation {
    pub message: Option<String>,
    pub note: Option<Note>,
}

impl NoteMutation {
    fn from_response(response: ApiResponse) -> Self {
        let ApiResponse::Json(Value::Object(map)) = response else {
            return Self::default();
        };
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        let note = if map.contains_key("id") || map.contains_key("text") {
            serde_json::from_value::<Note>(Value::Object(map)).ok()
        } else {
            None
        };
        Self { message, note }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
    pub percentage: u8,
}

impl UploadProgress {
    pub fn new(loaded: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((loaded.min(total) * 100 + total / 2) / total) as u8
        };
        Self {
            loaded,
            total,
            percentage,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct HealthStatus {
    #[serde(default)]
    status: Option<String>,
}

/// HTTP client for the dashboard backend. Attaches the stored bearer token
/// to every call and turns non-2xx answers into [`AppError::Http`].
#[derive(Clone)]
pub struct ApiService {
    http: Client,
    base_url: String,
    origin: String,
    session: SessionStore,
}

impl ApiService {
    pub fn new(config: &AppConfig, session: SessionStore) -> AppResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("salesman-dashboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            origin: config.origin.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.contains(ACCESS_TOKEN)
    }

    pub fn username(&self) -> String {
        self.session
            .get_string(USERNAME)
            .unwrap_or_else(|| "User".to_string())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session.get(ACCESS_TOKEN) {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> AppResult<ApiResponse> {
        let url = self.url(endpoint);
        let mut builder = self
            .authorize(self.http.request(method.clone(), &url))
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let result = match builder.send().await {
            Ok(response) => read_response(response).await,
            Err(err) => Err(AppError::from(err)),
        };
        match &result {
            Ok(_) => debug!(target: "api", %method, url = %url, "request completed"),
            Err(err) => error!(target: "api", %method, url = %url, error = %err, "request failed"),
        }
        result
    }

    async fn get<T: DeserializeOwned + Default>(&self, endpoint: &str) -> AppResult<T> {
        Ok(self
            .request(Method::GET, endpoint, None)
            .await?
            .decode()?
            .unwrap_or_default())
    }

    pub async fn fetch_addresses(&self) -> AppResult<Vec<Address>> {
        self.get("/addresses").await
    }

    pub async fn fetch_notes(&self, address_id: i64) -> AppResult<Vec<Note>> {
        self.get(&format!("/notes/{address_id}")).await
    }

    pub async fn fetch_all_notes(&self) -> AppResult<Vec<Note>> {
        self.get("/notes").await
    }

    pub async fn create_note(
        &self,
        address_id: i64,
        text: &str,
        created_by: &str,
    ) -> AppResult<NoteMutation> {
        let response = self
            .request(
                Method::POST,
                &format!("/notes/{address_id}"),
                Some(json!({ "text": text, "createdBy": created_by })),
            )
            .await?;
        Ok(NoteMutation::from_response(response))
    }

    pub async fn update_note(&self, note_id: i64, text: &str) -> AppResult<NoteMutation> {
        let response = self
            .request(
                Method::PUT,
                &format!("/notes/note/{note_id}"),
                Some(json!({ "text": text })),
            )
            .await?;
        Ok(NoteMutation::from_response(response))
    }

    pub async fn delete_note(&self, note_id: i64) -> AppResult<()> {
        self.request(Method::DELETE, &format!("/notes/note/{note_id}"), None)
            .await?;
        Ok(())
    }

    /// Streams the file as multipart field `file`, reporting bytes handed to
    /// the transport through `progress`.
    pub async fn import_file(
        &self,
        path: &Path,
        progress: Option<ProgressCallback>,
    ) -> AppResult<ImportResult> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "import.xlsx".to_string());
        let mime = if file_extension(&file_name) == "xls" {
            XLS_MIME
        } else {
            XLSX_MIME
        };

        if let Some(report) = &progress {
            report(UploadProgress::new(0, total));
        }
        let body = Body::wrap_stream(upload_stream(file, total, progress));
        let part = Part::stream_with_length(body, total)
            .file_name(file_name.clone())
            .mime_str(mime)?;
        let form = Form::new().part("file", part);

        let url = self.url("/import");
        debug!(target: "api", url = %url, file = %file_name, bytes = total, "starting upload");
        let response = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                error!(target: "api", url = %url, error = %err, "upload failed");
                AppError::from(err)
            })?;

        match read_response(response).await? {
            ApiResponse::Text(text) => Ok(serde_json::from_str(&text).unwrap_or(ImportResult {
                success: false,
                error: Some(text),
                ..ImportResult::default()
            })),
            other => Ok(other.decode()?.unwrap_or_default()),
        }
    }

    pub async fn fetch_weather(&self, latitude: f64, longitude: f64) -> AppResult<String> {
        let mut url = Url::parse(&self.url("/weather"))
            .map_err(|err| AppError::Config(format!("invalid API base URL: {err}")))?;
        url.query_pairs_mut()
            .append_pair("lat", &latitude.to_string())
            .append_pair("lon", &longitude.to_string());
        let endpoint = format!("/weather?{}", url.query().unwrap_or_default());
        Ok(self
            .request(Method::GET, &endpoint, None)
            .await?
            .into_text())
    }

    /// `GET {origin}/actuator/health`; any failure reads as unhealthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/actuator/health", self.origin);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthStatus>().await {
                    Ok(HealthStatus { status: Some(status) }) => status.eq_ignore_ascii_case("up"),
                    _ => true,
                }
            }
            Ok(response) => {
                warn!(target: "api", status = %response.status(), "health check rejected");
                false
            }
            Err(err) => {
                warn!(target: "api", error = %err, "health check unreachable");
                false
            }
        }
    }

    /// `POST {origin}/auth/refresh` with `{ "refreshToken": ... }`.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> AppResult<TokenSet> {
        let url = format!("{}/auth/refresh", self.origin);
        let response = self
            .http
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        read_response(response)
            .await?
            .decode()?
            .ok_or_else(|| AppError::Config("refresh response was empty".into()))
    }
}

async fn read_response(response: Response) -> AppResult<ApiResponse> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::Http {
            status,
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }

    let headers = response.headers();
    let empty = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "0")
        .unwrap_or(false);
    if empty {
        return Ok(ApiResponse::Empty);
    }
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false);

    let text = response.text().await?;
    if text.is_empty() {
        return Ok(ApiResponse::Empty);
    }
    if is_json {
        Ok(ApiResponse::Json(serde_json::from_str(&text)?))
    } else {
        Ok(ApiResponse::Text(text))
    }
}

fn upload_stream(
    file: tokio::fs::File,
    total: u64,
    progress: Option<ProgressCallback>,
) -> impl futures_util::Stream<Item = Result<Vec<u8>, std::io::Error>> {
    stream::unfold(
        (Some(file), 0_u64, progress),
        move |(file, sent, progress)| async move {
            let mut file = file?;
            let mut buffer = vec![0_u8; UPLOAD_CHUNK_BYTES];
            match file.read(&mut buffer).await {
                Ok(0) => None,
                Ok(read) => {
                    buffer.truncate(read);
                    let sent = sent + read as u64;
                    if let Some(report) = &progress {
                        report(UploadProgress::new(sent, total));
                    }
                    Some((Ok(buffer), (Some(file), sent, progress)))
                }
                Err(err) => Some((Err(err), (None, sent, progress))),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use httptest::{matchers::*, responders::*, Expectation, Server};
    use parking_lot::Mutex;

    use super::*;

    fn service(server: &Server, session: SessionStore) -> ApiService {
        let base = server.url_str("/api/v1");
        ApiService::new(&AppConfig::for_api_base(base), session).unwrap()
    }

    #[tokio::test]
    async fn attaches_bearer_token_and_decodes_addresses() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/v1/addresses"),
                request::headers(contains(("authorization", "Bearer abc.def.ghi"))),
            ])
            .respond_with(json_encoded(json!([
                { "id": 1, "addressText": "Lindenstr 5, 10115 Berlin", "projects": [] }
            ]))),
        );

        let api = service(&server, SessionStore::seeded([(ACCESS_TOKEN, "abc.def.ghi")]));
        let addresses = api.fetch_addresses().await.unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].id, 1);
    }

    #[tokio::test]
    async fn maps_error_status_to_http_error() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/v1/notes"))
                .respond_with(status_code(401)),
        );

        let api = service(&server, SessionStore::in_memory());
        let err = api.fetch_all_notes().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "HTTP 401 Unauthorized: Unauthorized");
    }

    #[tokio::test]
    async fn create_note_sends_text_and_author() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/v1/notes/7"),
                request::body(json_decoded(eq(json!({ "text": "Rückruf", "createdBy": "anna" })))),
            ])
            .respond_with(json_encoded(json!({ "message": "Note added successfully" }))),
        );

        let api = service(&server, SessionStore::in_memory());
        let mutation = api.create_note(7, "Rückruf", "anna").await.unwrap();
        assert_eq!(mutation.message.as_deref(), Some("Note added successfully"));
        assert!(mutation.note.is_none());
    }

    #[tokio::test]
    async fn empty_body_is_treated_as_success() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("DELETE", "/api/v1/notes/note/3"))
                .respond_with(status_code(204)),
        );

        let api = service(&server, SessionStore::in_memory());
        api.delete_note(3).await.unwrap();
    }

    #[tokio::test]
    async fn weather_returns_plain_text() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/v1/weather"),
                request::query(url_decoded(contains(("lat", "48.2")))),
                request::query(url_decoded(contains(("lon", "16.37")))),
            ])
            .respond_with(
                status_code(200)
                    .insert_header("content-type", "text/plain;charset=UTF-8")
                    .body("Vienna: +24°C"),
            ),
        );

        let api = service(&server, SessionStore::in_memory());
        assert_eq!(api.fetch_weather(48.2, 16.37).await.unwrap(), "Vienna: +24°C");
    }

    #[tokio::test]
    async fn uploads_file_with_progress() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/api/v1/import"),
                request::headers(contains(("authorization", "Bearer tok"))),
            ])
            .respond_with(json_encoded(json!({
                "success": true,
                "recordsProcessed": 12,
                "errors": []
            }))),
        );

        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(&vec![7_u8; 150 * 1024]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |progress| sink.lock().push(progress));

        let api = service(&server, SessionStore::seeded([(ACCESS_TOKEN, "tok")]));
        let result = api.import_file(file.path(), Some(callback)).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records_processed, Some(12));
        let seen = seen.lock();
        assert_eq!(seen.first().map(|p| p.percentage), Some(0));
        assert_eq!(seen.last().map(|p| p.percentage), Some(100));
        assert_eq!(seen.last().map(|p| p.loaded), Some(150 * 1024));
    }

    #[tokio::test]
    async fn refresh_posts_to_origin() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/auth/refresh"),
                request::body(json_decoded(eq(json!({ "refreshToken": "r-1" })))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": "new.access.token",
                "refresh_token": "r-2"
            }))),
        );

        let api = service(&server, SessionStore::in_memory());
        let tokens = api.refresh_tokens("r-1").await.unwrap();
        assert_eq!(tokens.access_token.as_deref(), Some("new.access.token"));
        assert_eq!(tokens.refresh_token.as_deref(), Some("r-2"));
    }

    #[tokio::test]
    async fn health_check_reads_status() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/actuator/health"))
                .respond_with(json_encoded(json!({ "status": "UP" }))),
        );

        let api = service(&server, SessionStore::seeded([(USERNAME, "anna")]));
        assert!(api.health_check().await);
        assert_eq!(api.username(), "anna");
    }

    #[test]
    fn progress_percentage_rounds_and_clamps() {
        assert_eq!(UploadProgress::new(1, 3).percentage, 33);
        assert_eq!(UploadProgress::new(2, 3).percentage, 67);
        assert_eq!(UploadProgress::new(5, 3).percentage, 100);
        assert_eq!(UploadProgress::new(0, 0).percentage, 100);
    }
}
