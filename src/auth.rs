use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::api::ApiService;
use crate::config::{AppConfig, OidcConfig};
use crate::errors::{AppError, AppResult, AuthFailure};
use crate::host::{ConfirmRequest, Interactor, Navigator, Notification, Presenter};
use crate::models::TokenSet;
use crate::session::{
    SessionStore, ACCESS_TOKEN, CODE_VERIFIER, JUST_LOGGED_OUT, OAUTH_STATE,
    REDIRECT_AFTER_LOGIN, REFRESH_TOKEN, USERNAME, USER_ID,
};

const RANDOM_BYTES: usize = 32;
const DEFAULT_EXPIRY_WARNING_MINUTES: i64 = 5;

/// Claims read from the access token payload. The signature is never checked
/// here, so these only drive expiry scheduling and what the UI displays.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TokenClaims {
    pub fn display_name(&self) -> String {
        self.preferred_username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "User".to_string())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub username: String,
    pub user_id: String,
    pub issuer: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub time_until_expiry_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDebugInfo {
    pub is_authenticated: bool,
    pub session_info: Option<SessionInfo>,
    pub is_expiring_soon: bool,
    pub has_refresh_timer: bool,
}

#[derive(Clone)]
struct AuthSettings {
    oidc: OidcConfig,
    login_path: String,
    logout_path: String,
    refresh_lead: Duration,
}

struct RefreshTimer {
    id: u64,
    handle: AbortHandle,
}

/// Session lifecycle: token validation, proactive refresh, the PKCE login
/// entry path and the forced return to the login page.
#[derive(Clone)]
pub struct AuthManager {
    api: ApiService,
    session: SessionStore,
    settings: AuthSettings,
    presenter: Arc<dyn Presenter>,
    navigator: Arc<dyn Navigator>,
    interactor: Arc<dyn Interactor>,
    refresh_timer: Arc<Mutex<Option<RefreshTimer>>>,
    timer_ids: Arc<AtomicU64>,
}

impl AuthManager {
    pub fn new(
        api: ApiService,
        config: &AppConfig,
        presenter: Arc<dyn Presenter>,
        navigator: Arc<dyn Navigator>,
        interactor: Arc<dyn Interactor>,
    ) -> Self {
        Self {
            session: api.session().clone(),
            api,
            settings: AuthSettings {
                oidc: config.oidc.clone(),
                login_path: config.login_path.clone(),
                logout_path: config.logout_path.clone(),
                refresh_lead: Duration::seconds(config.token_refresh_lead_secs),
            },
            presenter,
            navigator,
            interactor,
            refresh_timer: Arc::new(Mutex::new(None)),
            timer_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Validates the stored session and arms the refresh timer.
    pub async fn initialize(&self) -> bool {
        let authenticated = self.check_auth_status().await;
        if authenticated {
            self.schedule_refresh();
        }
        authenticated
    }

    pub async fn check_auth_status(&self) -> bool {
        let token = self.session.get(ACCESS_TOKEN);
        let username = self.session.get_string(USERNAME);

        let (Some(token), Some(username)) = (token, username) else {
            debug!(target: "auth", "no stored session");
            self.handle_auth_failure();
            return false;
        };

        self.presenter.user(&username);
        match self.validate_token(token.expose_secret()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "auth", error = %err, "token validation failed");
                self.handle_auth_failure();
                false
            }
        }
    }

    pub async fn validate_token(&self, token: &str) -> AppResult<TokenClaims> {
        if token.is_empty() {
            return Err(AuthFailure::MissingToken.into());
        }
        let claims = decode_jwt_payload(token).ok_or(AuthFailure::InvalidToken)?;
        if let Some(exp) = claims.exp {
            if exp < Utc::now().timestamp() {
                return Err(AuthFailure::Expired.into());
            }
        }

        if !self.api.health_check().await {
            warn!(target: "auth", "backend health check failed");
        }
        Ok(claims)
    }

    /// Clears credentials, stops the refresh timer and leaves for the login
    /// page unless already there.
    pub fn handle_auth_failure(&self) {
        self.session.clear_credentials();
        self.cancel_refresh();

        let path = self.navigator.current_path();
        if !path.contains("login.html") && !path.contains("/login") {
            self.redirect_to_login();
        }
    }

    pub fn redirect_to_login(&self) {
        self.session
            .set(REDIRECT_AFTER_LOGIN, self.navigator.current_url());
        info!(target: "auth", login = %self.settings.login_path, "redirecting to login");
        self.navigator.redirect(&self.settings.login_path);
    }

    /// Arms a one-shot refresh `refresh_lead` before the token expires.
    /// Returns `false` when nothing was scheduled.
    pub fn schedule_refresh(&self) -> bool {
        self.cancel_refresh();

        let Some(claims) = self.token_claims() else {
            return false;
        };
        let Some(expires_at) = claims.expires_at() else {
            return false;
        };
        let Some(delay) = refresh_delay(expires_at, Utc::now(), self.settings.refresh_lead) else {
            debug!(target: "auth", %expires_at, "token too close to expiry for a refresh timer");
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "auth", "no async runtime; token refresh not scheduled");
            return false;
        };

        let id = self.timer_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = self.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            manager.release_timer(id);
            if let Err(err) = manager.attempt_token_refresh().await {
                debug!(target: "auth", error = %err, "scheduled refresh ended the session");
            }
        });

        *self.refresh_timer.lock() = Some(RefreshTimer {
            id,
            handle: task.abort_handle(),
        });
        debug!(target: "auth", delay_secs = delay.as_secs(), "token refresh scheduled");
        true
    }

    fn release_timer(&self, id: u64) {
        let mut timer = self.refresh_timer.lock();
        if timer.as_ref().map(|t| t.id) == Some(id) {
            *timer = None;
        }
    }

    pub fn cancel_refresh(&self) {
        if let Some(timer) = self.refresh_timer.lock().take() {
            timer.handle.abort();
        }
    }

    pub fn has_refresh_timer(&self) -> bool {
        self.refresh_timer.lock().is_some()
    }

    pub async fn attempt_token_refresh(&self) -> AppResult<()> {
        let Some(refresh_token) = self.session.get(REFRESH_TOKEN) else {
            warn!(target: "auth", "no refresh token available");
            self.handle_auth_failure();
            return Err(AuthFailure::MissingRefreshToken.into());
        };

        let outcome = match self.api.refresh_tokens(refresh_token.expose_secret()).await {
            Ok(tokens) if tokens.access_token.is_some() => Ok(tokens),
            Ok(_) => Err(AppError::from(AuthFailure::RefreshFailed)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(tokens) => {
                self.store_tokens(&tokens);
                self.schedule_refresh();
                self.presenter.notify(&Notification::success(
                    "Sitzung verlängert",
                    "Ihre Anmeldung wurde automatisch verlängert",
                ));
                info!(target: "auth", "session refreshed");
                Ok(())
            }
            Err(err) => {
                error!(target: "auth", error = %err, "token refresh failed");
                self.presenter.notify(&Notification::warning(
                    "Sitzung abgelaufen",
                    "Bitte melden Sie sich erneut an",
                ));
                self.handle_auth_failure();
                Err(AuthFailure::RefreshFailed.into())
            }
        }
    }

    pub fn store_tokens(&self, tokens: &TokenSet) {
        if let Some(access) = &tokens.access_token {
            self.session.set(ACCESS_TOKEN, access.clone());
        }
        if let Some(refresh) = &tokens.refresh_token {
            self.session.set(REFRESH_TOKEN, refresh.clone());
        }

        let Some(access) = &tokens.access_token else {
            return;
        };
        match decode_jwt_payload(access) {
            Some(claims) => {
                let username = claims.display_name();
                self.session.set(USERNAME, username.clone());
                self.session
                    .set(USER_ID, claims.sub.clone().unwrap_or_default());
                self.presenter.user(&username);
            }
            None => warn!(target: "auth", "stored access token has no readable payload"),
        }
    }

    /// Starts the authorization-code flow and returns the URL to open.
    pub fn initiate_login(&self) -> AppResult<String> {
        let code_verifier = random_urlsafe_token();
        let code_challenge = build_code_challenge(&code_verifier)?;
        let state = random_urlsafe_token();

        self.session.set(CODE_VERIFIER, code_verifier);
        self.session.set(OAUTH_STATE, state.clone());

        let oidc = &self.settings.oidc;
        let mut url = Url::parse(&oidc.authorization_endpoint())
            .map_err(|err| AppError::Config(format!("invalid authorization endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &oidc.client_id)
            .append_pair("redirect_uri", &oidc.redirect_uri)
            .append_pair("scope", &oidc.scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.to_string())
    }

    /// Completes the flow started by [`Self::initiate_login`]. Any failure ends
    /// the session the same way an expired token does.
    pub async fn handle_auth_callback(&self, code: &str, state: &str) -> AppResult<TokenSet> {
        match self.exchange_code(code, state).await {
            Ok(tokens) => {
                self.store_tokens(&tokens);
                self.session.remove(CODE_VERIFIER);
                self.session.remove(OAUTH_STATE);
                self.schedule_refresh();
                info!(target: "auth", "login completed");
                Ok(tokens)
            }
            Err(err) => {
                error!(target: "auth", error = %err, "login callback rejected");
                self.handle_auth_failure();
                Err(err)
            }
        }
    }

    async fn exchange_code(&self, code: &str, state: &str) -> AppResult<TokenSet> {
        let stored_state = self.session.get_string(OAUTH_STATE);
        if stored_state.as_deref() != Some(state) {
            return Err(AuthFailure::StateMismatch.into());
        }
        let verifier = self
            .session
            .get(CODE_VERIFIER)
            .ok_or(AuthFailure::MissingVerifier)?;

        let oidc = &self.settings.oidc;
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", oidc.redirect_uri.clone()),
            ("client_id", oidc.client_id.clone()),
            ("code_verifier", verifier.expose_secret().to_string()),
        ];
        if let Some(secret) = &oidc.client_secret {
            form.push(("client_secret", secret.expose_secret().to_string()));
        }

        let response = self
            .api
            .http()
            .post(oidc.token_endpoint())
            .form(&form)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(AuthFailure::TokenExchange(detail).into())
        }
    }

    pub async fn logout(&self, ask_confirmation: bool) -> bool {
        if ask_confirmation {
            let request = ConfirmRequest::new("Abmelden", "Möchten Sie sich wirklich abmelden?");
            if !self.interactor.confirm(&request).await {
                return false;
            }
        }

        self.cancel_refresh();
        self.session.clear_credentials();
        self.session.set(JUST_LOGGED_OUT, "true");
        info!(target: "auth", "logged out");
        self.navigator.redirect(&self.settings.logout_path);
        true
    }

    /// Re-checks the session when the page becomes visible again.
    pub async fn on_visibility_regained(&self) -> bool {
        debug!(target: "auth", "page visible again, re-validating session");
        self.check_auth_status().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.contains(ACCESS_TOKEN)
    }

    pub fn username(&self) -> String {
        self.api.username()
    }

    pub fn user_id(&self) -> String {
        self.session.get_string(USER_ID).unwrap_or_default()
    }

    pub fn token(&self) -> Option<SecretString> {
        self.session.get(ACCESS_TOKEN)
    }

    pub fn token_claims(&self) -> Option<TokenClaims> {
        self.token()
            .and_then(|token| decode_jwt_payload(token.expose_secret()))
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        let claims = self.token_claims()?;
        let expires_at = claims.expires_at();
        Some(SessionInfo {
            username: self.username(),
            user_id: self.user_id(),
            issuer: claims.iss.clone(),
            issued_at: claims.issued_at(),
            time_until_expiry_ms: expires_at.map(|at| (at - Utc::now()).num_milliseconds()),
            expires_at,
        })
    }

    pub fn is_token_expiring_soon(&self, minutes: i64) -> bool {
        match self.session_info().and_then(|info| info.time_until_expiry_ms) {
            Some(0) | None => false,
            Some(remaining) => remaining < minutes * 60 * 1000,
        }
    }

    pub fn debug_auth(&self) -> AuthDebugInfo {
        let info = AuthDebugInfo {
            is_authenticated: self.is_authenticated(),
            session_info: self.session_info(),
            is_expiring_soon: self.is_token_expiring_soon(DEFAULT_EXPIRY_WARNING_MINUTES),
            has_refresh_timer: self.has_refresh_timer(),
        };
        debug!(target: "auth", ?info, "auth debug info");
        info
    }
}

/// Decodes the middle segment of a JWT without verifying it.
pub fn decode_jwt_payload(token: &str) -> Option<TokenClaims> {
    let segment = token.split('.').nth(1)?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn refresh_delay(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    lead: Duration,
) -> Option<StdDuration> {
    let remaining = expires_at - now - lead;
    if remaining > Duration::zero() {
        remaining.to_std().ok()
    } else {
        None
    }
}

fn random_urlsafe_token() -> String {
    let mut bytes = [0_u8; RANDOM_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn build_code_challenge(verifier: &str) -> AppResult<String> {
    if verifier.is_empty() {
        return Err(AuthFailure::MissingVerifier.into());
    }
    let digest = Sha256::digest(verifier.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}


#[cfg(test)]
mod tests {
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    use super::test_tokens::{expiring_in, jwt};
    use super::*;
    use crate::host::{NotificationLevel, RecordingNavigator, RecordingPresenter, ScriptedInteractor};

    struct Harness {
        auth: AuthManager,
        session: SessionStore,
        presenter: Arc<RecordingPresenter>,
        navigator: Arc<RecordingNavigator>,
        interactor: Arc<ScriptedInteractor>,
    }

    fn harness(server: &Server, session: SessionStore, path: &str) -> Harness {
        let config = AppConfig::for_api_base(server.url_str("/api/v1"));
        let api = ApiService::new(&config, session.clone()).unwrap();
        let presenter = Arc::new(RecordingPresenter::new());
        let navigator = Arc::new(RecordingNavigator::new(path));
        let interactor = Arc::new(ScriptedInteractor::accepting());
        let auth = AuthManager::new(
            api,
            &config,
            presenter.clone(),
            navigator.clone(),
            interactor.clone(),
        );
        Harness {
            auth,
            session,
            presenter,
            navigator,
            interactor,
        }
    }

    fn healthy(server: &Server) {
        server.expect(
            Expectation::matching(request::method_path("GET", "/actuator/health"))
                .times(..)
                .respond_with(json_encoded(json!({ "status": "UP" }))),
        );
    }

    #[test]
    fn decodes_payload_without_verification() {
        let token = jwt(json!({ "exp": 1_700_000_000, "email": "anna@example.com", "sub": "s" }));
        let claims = decode_jwt_payload(&token).unwrap();
        assert_eq!(claims.exp, Some(1_700_000_000));
        assert_eq!(claims.display_name(), "anna@example.com");
        assert!(decode_jwt_payload("not-a-jwt").is_none());
        assert!(decode_jwt_payload("a.%%%.c").is_none());
    }

    #[test]
    fn code_challenge_is_sha256_base64url() {
        // RFC 7636 appendix B
        let challenge = build_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        assert_eq!(challenge, "E9Melhoa2OwvFr-MBt_0yfzPnQ0L6eJa0hJuqdwr3Mk");
        assert!(build_code_challenge("").is_err());
    }

    #[test]
    fn refresh_delay_respects_lead() {
        let now = Utc::now();
        let lead = Duration::minutes(5);
        let delay = refresh_delay(now + Duration::minutes(10), now, lead).unwrap();
        assert_eq!(delay.as_secs(), 300);
        assert!(refresh_delay(now + Duration::minutes(4), now, lead).is_none());
    }

    #[tokio::test]
    async fn expired_token_forces_login_redirect() {
        let server = Server::run();
        let session = SessionStore::seeded([
            (ACCESS_TOKEN, expiring_in(-10)),
            (REFRESH_TOKEN, "r".to_string()),
            (USERNAME, "anna".to_string()),
        ]);
        let h = harness(&server, session, "/index.html");

        assert!(!h.auth.check_auth_status().await);
        assert!(!h.session.contains(ACCESS_TOKEN));
        assert!(!h.session.contains(REFRESH_TOKEN));
        assert_eq!(h.navigator.redirects(), vec!["/login.html".to_string()]);
        assert_eq!(
            h.session.get_string(REDIRECT_AFTER_LOGIN).as_deref(),
            Some("http://localhost/index.html")
        );
    }

    #[tokio::test]
    async fn validate_token_reports_expiry() {
        let server = Server::run();
        let h = harness(&server, SessionStore::in_memory(), "/index.html");
        let err = h.auth.validate_token(&expiring_in(-10)).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::Expired)));
        let err = h.auth.validate_token("garbage").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::InvalidToken)));
    }

    #[tokio::test]
    async fn no_redirect_when_already_on_login_page() {
        let server = Server::run();
        let h = harness(&server, SessionStore::in_memory(), "/login.html");
        assert!(!h.auth.check_auth_status().await);
        assert!(h.navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn valid_session_shows_user_and_arms_timer() {
        let server = Server::run();
        healthy(&server);
        let session = SessionStore::seeded([
            (ACCESS_TOKEN, expiring_in(3600)),
            (USERNAME, "anna".to_string()),
        ]);
        let h = harness(&server, session, "/index.html");

        assert!(h.auth.initialize().await);
        assert!(h.auth.has_refresh_timer());
        assert_eq!(h.presenter.last_user().as_deref(), Some("anna"));
        assert!(h.navigator.redirects().is_empty());

        let info = h.auth.session_info().unwrap();
        assert_eq!(info.issuer.as_deref(), Some("http://idp/realms/simplesalesman"));
        assert!(info.time_until_expiry_ms.unwrap() > 3_500_000);
        assert!(!h.auth.is_token_expiring_soon(5));
        assert!(h.auth.is_token_expiring_soon(120));

        h.auth.cancel_refresh();
        assert!(!h.auth.debug_auth().has_refresh_timer);
    }

    #[tokio::test]
    async fn scheduled_refresh_replaces_tokens() {
        let server = Server::run();
        let renewed = expiring_in(3600);
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/auth/refresh"),
                request::body(json_decoded(eq(json!({ "refreshToken": "r-1" })))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": renewed,
                "refresh_token": "r-2"
            }))),
        );
        // expires just after the five minute lead, so the timer fires within a second
        let session = SessionStore::seeded([
            (ACCESS_TOKEN, expiring_in(301)),
            (REFRESH_TOKEN, "r-1".to_string()),
            (USERNAME, "anna".to_string()),
        ]);
        let h = harness(&server, session, "/index.html");

        assert!(h.auth.schedule_refresh());
        for _ in 0..60 {
            if h.session.get_string(REFRESH_TOKEN).as_deref() == Some("r-2") {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }

        assert_eq!(h.session.get_string(REFRESH_TOKEN).as_deref(), Some("r-2"));
        assert_eq!(h.session.get_string(USER_ID).as_deref(), Some("user-42"));
        assert!(h.auth.has_refresh_timer());
        let notes = h.presenter.notifications();
        assert_eq!(notes.last().map(|n| n.title.as_str()), Some("Sitzung verlängert"));
        h.auth.cancel_refresh();
    }

    #[tokio::test]
    async fn failed_refresh_ends_session() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/auth/refresh"))
                .respond_with(status_code(401)),
        );
        let session = SessionStore::seeded([
            (ACCESS_TOKEN, expiring_in(3600)),
            (REFRESH_TOKEN, "r-1".to_string()),
            (USERNAME, "anna".to_string()),
        ]);
        let h = harness(&server, session, "/index.html");

        let err = h.auth.attempt_token_refresh().await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::RefreshFailed)));
        assert!(!h.auth.is_authenticated());
        assert_eq!(h.navigator.redirects(), vec!["/login.html".to_string()]);
        let notes = h.presenter.notifications();
        assert_eq!(notes[0].level, NotificationLevel::Warning);
        assert_eq!(notes[0].title, "Sitzung abgelaufen");
    }

    #[tokio::test]
    async fn pkce_login_round_trip() {
        let server = Server::run();
        let h = harness(&server, SessionStore::in_memory(), "/callback.html");

        let url = Url::parse(&h.auth.initiate_login().unwrap()).unwrap();
        assert!(url
            .path()
            .ends_with("/realms/simplesalesman/protocol/openid-connect/auth"));
        let params: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "simplesalesman-frontend");
        assert_eq!(params["scope"], "openid profile email");
        assert_eq!(params["code_challenge_method"], "S256");

        let verifier = h.session.get_string(CODE_VERIFIER).unwrap();
        assert_eq!(params["code_challenge"], build_code_challenge(&verifier).unwrap());
        assert_eq!(verifier.len(), 43);
        let state = params["state"].clone();
        assert_eq!(h.session.get_string(OAUTH_STATE).as_deref(), Some(state.as_str()));

        let access = expiring_in(3600);
        server.expect(
            Expectation::matching(all_of![
                request::method_path(
                    "POST",
                    "/idp/realms/simplesalesman/protocol/openid-connect/token"
                ),
                request::body(url_decoded(contains(("grant_type", "authorization_code")))),
                request::body(url_decoded(contains(("code", "auth-code")))),
            ])
            .respond_with(json_encoded(json!({
                "access_token": access,
                "refresh_token": "r-1",
                "expires_in": 3600,
                "token_type": "Bearer"
            }))),
        );

        let tokens = h.auth.handle_auth_callback("auth-code", &state).await.unwrap();
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(h.session.get_string(USERNAME).as_deref(), Some("anna"));
        assert!(!h.session.contains(CODE_VERIFIER));
        assert!(!h.session.contains(OAUTH_STATE));
        h.auth.cancel_refresh();
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected() {
        let server = Server::run();
        let h = harness(&server, SessionStore::in_memory(), "/callback.html");
        h.auth.initiate_login().unwrap();

        let err = h
            .auth
            .handle_auth_callback("auth-code", "forged")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthFailure::StateMismatch)));
        assert_eq!(h.navigator.redirects(), vec!["/login.html".to_string()]);
    }

    #[tokio::test]
    async fn logout_respects_confirmation() {
        let server = Server::run();
        let session = SessionStore::seeded([(ACCESS_TOKEN, expiring_in(3600))]);
        let h = harness(&server, session, "/index.html");

        h.interactor.push_confirm(false);
        assert!(!h.auth.logout(true).await);
        assert!(h.auth.is_authenticated());

        assert!(h.auth.logout(true).await);
        assert!(!h.auth.is_authenticated());
        assert_eq!(h.session.get_string(JUST_LOGGED_OUT).as_deref(), Some("true"));
        assert_eq!(h.navigator.redirects(), vec!["/logout".to_string()]);
        assert_eq!(h.interactor.confirmations().len(), 2);
    }
}
