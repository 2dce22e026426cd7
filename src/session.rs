use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

pub const ACCESS_TOKEN: &str = "access_token";
pub const REFRESH_TOKEN: &str = "refresh_token";
pub const USERNAME: &str = "username";
pub const USER_ID: &str = "user_id";
pub const CODE_VERIFIER: &str = "code_verifier";
pub const OAUTH_STATE: &str = "oauth_state";
pub const REDIRECT_AFTER_LOGIN: &str = "redirect_after_login";
pub const JUST_LOGGED_OUT: &str = "just_logged_out";

/// Keys removed whenever the session ends.
pub const CREDENTIAL_KEYS: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, USERNAME, USER_ID];

/// Tab-scoped key/value storage for credentials and login bookkeeping.
///
/// Values are held as [`SecretString`] so tokens never end up in `Debug`
/// output. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, SecretString>>>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn seeded<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::default();
        for (key, value) in entries {
            store.set(&key.into(), value);
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<SecretString> {
        self.entries.lock().get(key).cloned()
    }

    /// Plain copy of a non-secret entry such as the username.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .get(key)
            .map(|value| value.expose_secret().to_string())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value: String = value.into();
        self.entries
            .lock()
            .insert(key.to_string(), SecretString::from(value));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn clear_credentials(&self) {
        let mut entries = self.entries.lock();
        for key in CREDENTIAL_KEYS {
            entries.remove(key);
        }
        debug!(target: "session", "cleared stored credentials");
    }

    /// Drops everything except credentials.
    pub fn clear_cache(&self) {
        self.entries
            .lock()
            .retain(|key, _| CREDENTIAL_KEYS.contains(&key.as_str()));
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_only_credentials() {
        let store = SessionStore::seeded([
            (ACCESS_TOKEN, "a.b.c"),
            (REFRESH_TOKEN, "r"),
            (USERNAME, "anna"),
            (USER_ID, "42"),
            (REDIRECT_AFTER_LOGIN, "/index.html"),
        ]);

        store.clear_credentials();

        assert!(!store.contains(ACCESS_TOKEN));
        assert!(!store.contains(USER_ID));
        assert_eq!(
            store.get_string(REDIRECT_AFTER_LOGIN).as_deref(),
            Some("/index.html")
        );
    }

    #[test]
    fn cache_clear_keeps_credentials() {
        let store = SessionStore::seeded([(ACCESS_TOKEN, "t"), (OAUTH_STATE, "s")]);
        store.clear_cache();
        assert_eq!(store.keys(), vec![ACCESS_TOKEN.to_string()]);
    }

    #[test]
    fn clones_share_entries_and_debug_hides_values() {
        let store = SessionStore::in_memory();
        let clone = store.clone();
        clone.set(ACCESS_TOKEN, "super-secret-token");

        assert_eq!(
            store.get(ACCESS_TOKEN).map(|s| s.expose_secret().to_string()),
            Some("super-secret-token".to_string())
        );
        assert!(!format!("{store:?}").contains("super-secret-token"));
        assert!(store.remove(ACCESS_TOKEN));
        assert!(!clone.remove(ACCESS_TOKEN));
    }
}
