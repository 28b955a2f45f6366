use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// The stored credential pair. `refresh_token` is set once at authorization
/// and never cleared; `access_token` and `expires_at` are always replaced
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Cheap-clone shared handle over [`Tokens`].
///
/// The token refresher is the only writer. Everyone issuing an authenticated
/// call reads the access token right before the request, never a value
/// captured earlier.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<RwLock<Tokens>>,
}

impl TokenStore {
    pub fn new(tokens: Tokens) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tokens)),
        }
    }

    pub fn access_token(&self) -> String {
        self.inner.read().unwrap().access_token.clone()
    }

    pub fn refresh_token(&self) -> String {
        self.inner.read().unwrap().refresh_token.clone()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.read().unwrap().expires_at
    }

    /// Swap in a fresh access token. Expiry moves together with the token
    /// under a single write lock; the refresh token only changes when
    /// Spotify rotated it.
    pub fn refresh(
        &self,
        access_token: String,
        expires_at: DateTime<Utc>,
        rotated_refresh_token: Option<String>,
    ) {
        let mut tokens = self.inner.write().unwrap();
        tokens.access_token = access_token;
        tokens.expires_at = expires_at;
        if let Some(refresh_token) = rotated_refresh_token {
            tokens.refresh_token = refresh_token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> Tokens {
        Tokens {
            access_token: "old-access".to_string(),
            refresh_token: "long-lived".to_string(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn refresh_replaces_access_and_expiry_together() {
        let store = TokenStore::new(tokens());
        let expires_at = Utc::now() + chrono::Duration::seconds(3600);

        store.refresh("new-access".to_string(), expires_at, None);

        assert_eq!(store.access_token(), "new-access");
        assert_eq!(store.expires_at(), expires_at);
        // refresh token survives a refresh untouched
        assert_eq!(store.refresh_token(), "long-lived");
    }

    #[test]
    fn refresh_applies_rotated_refresh_token() {
        let store = TokenStore::new(tokens());

        store.refresh(
            "new-access".to_string(),
            Utc::now(),
            Some("rotated".to_string()),
        );

        assert_eq!(store.refresh_token(), "rotated");
    }

    #[test]
    fn clones_share_state() {
        let store = TokenStore::new(tokens());
        let reader = store.clone();

        store.refresh("seen-by-both".to_string(), Utc::now(), None);

        assert_eq!(reader.access_token(), "seen-by-both");
    }
}
