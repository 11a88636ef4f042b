//! Token storage and management

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

use super::token::TokenResponse;

/// Layout of `tokens.expires_at` (local time).
pub const EXPIRES_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stored access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub token: String,
    /// Raw `expires_at` value as written to the config file.
    pub expires_at: Option<String>,
}

impl StoredToken {
    /// Parsed expiry, if present and well-formed.
    pub fn expiry(&self) -> Option<DateTime<Local>> {
        let naive = NaiveDateTime::parse_from_str(self.expires_at.as_deref()?, EXPIRES_AT_FORMAT)
            .ok()?;
        Local.from_local_datetime(&naive).earliest()
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        match self.expiry() {
            Some(exp) => now >= exp,
            None => false,
        }
    }
}

/// Token store trait for different storage backends
pub trait TokenStore {
    fn get_access_token(&self) -> Option<StoredToken>;
    fn set_access_token(&mut self, token: String, expires_at: Option<String>);
    fn get_refresh_token(&self) -> Option<String>;
    fn set_refresh_token(&mut self, token: String);
}

/// `now + expires_in`, formatted for the config file.
pub fn format_expiry(now: DateTime<Local>, expires_in: u64) -> String {
    let expires_in = i64::try_from(expires_in).unwrap_or(i64::MAX);
    let expires_at = chrono::Duration::try_seconds(expires_in)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now);
    expires_at.format(EXPIRES_AT_FORMAT).to_string()
}

/// Record a token endpoint answer in `store`.
///
/// Nothing is written unless a refresh token came back. The access token and
/// its expiry are written alongside it when present. Returns whether the
/// store changed.
pub fn apply_tokens(
    store: &mut impl TokenStore,
    tokens: &TokenResponse,
    now: DateTime<Local>,
) -> bool {
    let Some(ref refresh_token) = tokens.refresh_token else {
        tracing::warn!("Token response has no refresh_token; nothing stored");
        return false;
    };

    store.set_refresh_token(refresh_token.clone());
    tracing::info!("Refresh token obtained");

    if let Some(ref access_token) = tokens.access_token {
        let expires_at = tokens.expires_in.map(|secs| format_expiry(now, secs));
        store.set_access_token(access_token.clone(), expires_at);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        access: Option<StoredToken>,
        refresh: Option<String>,
    }

    impl TokenStore for MemoryStore {
        fn get_access_token(&self) -> Option<StoredToken> {
            self.access.clone()
        }

        fn set_access_token(&mut self, token: String, expires_at: Option<String>) {
            self.access = Some(StoredToken { token, expires_at });
        }

        fn get_refresh_token(&self) -> Option<String> {
            self.refresh.clone()
        }

        fn set_refresh_token(&mut self, token: String) {
            self.refresh = Some(token);
        }
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).earliest().unwrap()
    }

    #[test]
    fn test_format_expiry() {
        let now = fixed_now();
        assert_eq!(format_expiry(now, 3600), "2024-06-15 11:30:00");
        assert_eq!(format_expiry(now, 0), "2024-06-15 10:30:00");
    }

    #[test]
    fn test_apply_full_response() {
        let mut store = MemoryStore::default();
        let tokens = TokenResponse {
            access_token: Some("a".into()),
            refresh_token: Some("r".into()),
            expires_in: Some(3600),
            token_type: Some("Bearer".into()),
        };
        let now = fixed_now();

        assert!(apply_tokens(&mut store, &tokens, now));
        assert_eq!(store.get_refresh_token().as_deref(), Some("r"));
        let access = store.get_access_token().unwrap();
        assert_eq!(access.token, "a");
        assert_eq!(
            access.expires_at,
            Some((now + chrono::Duration::seconds(3600)).format(EXPIRES_AT_FORMAT).to_string())
        );
    }

    #[test]
    fn test_apply_refresh_only() {
        let mut store = MemoryStore::default();
        let tokens = TokenResponse {
            refresh_token: Some("r".into()),
            ..Default::default()
        };
        assert!(apply_tokens(&mut store, &tokens, fixed_now()));
        assert_eq!(store.get_refresh_token().as_deref(), Some("r"));
        assert!(store.get_access_token().is_none());
    }

    #[test]
    fn test_apply_without_refresh_token_writes_nothing() {
        let mut store = MemoryStore::default();
        let tokens = TokenResponse {
            access_token: Some("a".into()),
            expires_in: Some(3600),
            ..Default::default()
        };
        assert!(!apply_tokens(&mut store, &tokens, fixed_now()));
        assert!(store.get_refresh_token().is_none());
        assert!(store.get_access_token().is_none());
    }

    #[test]
    fn test_stored_token_expiry() {
        let now = fixed_now();
        let token = StoredToken {
            token: "a".into(),
            expires_at: Some(format_expiry(now, 60)),
        };
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + chrono::Duration::seconds(61)));

        let unknown = StoredToken {
            token: "a".into(),
            expires_at: Some("garbage".into()),
        };
        assert!(unknown.expiry().is_none());
        assert!(!unknown.is_expired(now));
    }
}
