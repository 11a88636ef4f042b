//! Interactive authorization: authorize URL, redirect wait, code extraction

use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use url::Url;

use super::browser::Tab;
use super::{AuthConfig, AuthError};

/// How long the user has to finish sign-in and consent.
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between checks of the tab URL.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Time source for the redirect wait.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}

/// Build the authorize URL for the interactive sign-in.
pub fn authorization_url(auth: &AuthConfig) -> Result<Url> {
    let endpoint = auth.authorize_endpoint();
    let mut url =
        Url::parse(&endpoint).with_context(|| format!("Invalid authorize endpoint {}", endpoint))?;

    url.query_pairs_mut()
        .append_pair("client_id", &auth.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &auth.redirect_uri)
        .append_pair("scope", &auth.scope())
        .append_pair("response_mode", "query")
        .append_pair("prompt", "select_account");

    Ok(url)
}

/// Origin and path of the redirect URI, e.g. `http://localhost:8000/callback`.
/// A tab URL starting with it means the identity provider has redirected
/// back. The authorize URL carries the redirect URI percent-encoded, so it
/// never starts with the marker.
pub fn redirect_marker(redirect_uri: &str) -> Result<String> {
    let url = Url::parse(redirect_uri)
        .with_context(|| format!("Invalid redirect_uri {:?}", redirect_uri))?;
    if url.host_str().is_none() {
        bail!("redirect_uri {:?} has no host", redirect_uri);
    }
    Ok(format!("{}{}", url.origin().ascii_serialization(), url.path()))
}

/// Pull the authorization code out of the callback URL.
pub fn extract_code(callback_url: &str) -> Result<String, AuthError> {
    let Some((_, query)) = callback_url.split_once('?') else {
        return Err(AuthError::MissingCode);
    };
    let query = query.split('#').next().unwrap_or_default();

    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    // A blank `code=` counts as absent
    if let Some((_, code)) = pairs.iter().find(|(k, v)| k == "code" && !v.is_empty()) {
        return Ok(code.clone());
    }

    if let Some((_, error)) = pairs.iter().find(|(k, _)| k == "error") {
        let description = pairs
            .iter()
            .find(|(k, _)| k == "error_description")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        return Err(AuthError::Denied {
            error: error.clone(),
            description,
        });
    }

    Err(AuthError::MissingCode)
}

/// Poll the tab until its URL starts with `marker`, or give up after `timeout`.
pub async fn wait_for_url<T: Tab, C: Clock>(
    tab: &mut T,
    marker: &str,
    timeout: Duration,
    poll: Duration,
    clock: &C,
) -> Result<String> {
    let started = clock.now();

    loop {
        if let Some(url) = tab.current_url().await? {
            if url.starts_with(marker) {
                return Ok(url);
            }
        }

        let waited = clock.now().saturating_duration_since(started);
        if waited >= timeout {
            return Err(AuthError::RedirectTimeout {
                waited,
                marker: marker.to_string(),
            }
            .into());
        }

        clock.sleep(poll.min(timeout - waited)).await;
    }
}

/// Drive the tab through sign-in and return the authorization code.
pub async fn request_authorization<T: Tab, C: Clock>(
    tab: &mut T,
    auth: &AuthConfig,
    timeout: Duration,
    clock: &C,
) -> Result<String> {
    let url = authorization_url(auth)?;
    let marker = redirect_marker(&auth.redirect_uri)?;

    tab.navigate(&url).await?;
    tracing::info!("Waiting for user sign-in and consent...");

    let callback_url = wait_for_url(tab, &marker, timeout, POLL_INTERVAL, clock).await?;
    tracing::debug!("Callback URL: {}", callback_url);

    let code = extract_code(&callback_url)?;
    tracing::info!("Authorization code received");
    Ok(code)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::tests::auth_config;
    use std::cell::Cell;
    use std::collections::VecDeque;

    /// Clock whose sleeps advance time instantly.
    pub(crate) struct FakeClock {
        now: Cell<Instant>,
        pub(crate) sleeps: Cell<u32>,
    }

    impl FakeClock {
        pub(crate) fn new() -> Self {
            Self {
                now: Cell::new(Instant::now()),
                sleeps: Cell::new(0),
            }
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
            self.now.set(self.now.get() + duration);
            self.sleeps.set(self.sleeps.get() + 1);
            std::future::ready(())
        }
    }

    /// Tab that reports a scripted sequence of URLs.
    #[derive(Default)]
    pub(crate) struct ScriptedTab {
        pub(crate) visited: Vec<String>,
        pub(crate) urls: VecDeque<Option<String>>,
        pub(crate) closed: bool,
    }

    impl ScriptedTab {
        pub(crate) fn with_urls(urls: &[Option<&str>]) -> Self {
            Self {
                urls: urls.iter().map(|u| u.map(String::from)).collect(),
                ..Default::default()
            }
        }
    }

    impl Tab for ScriptedTab {
        async fn navigate(&mut self, url: &Url) -> Result<()> {
            self.visited.push(url.to_string());
            Ok(())
        }

        async fn current_url(&mut self) -> Result<Option<String>> {
            Ok(self.urls.pop_front().flatten())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_authorization_url_parameters() {
        let auth = auth_config();
        let url = authorization_url(&auth).unwrap();

        assert_eq!(
            url.as_str().split('?').next().unwrap(),
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
        );

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let expected: Vec<(String, String)> = [
            ("client_id", auth.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", "http://localhost:8000/callback"),
            ("scope", auth.scope().as_str()),
            ("response_mode", "query"),
            ("prompt", "select_account"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(pairs, expected);

        // Encoded: the redirect target must not appear literally in the query
        let query = url.query().unwrap();
        assert!(!query.contains("localhost:8000"), "{}", query);
        assert!(query.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8000%2Fcallback"));
    }

    #[test]
    fn test_redirect_marker() {
        assert_eq!(
            redirect_marker("http://localhost:8000/callback").unwrap(),
            "http://localhost:8000/callback"
        );
        assert_eq!(
            redirect_marker("http://localhost/cb?x=1").unwrap(),
            "http://localhost/cb"
        );
        assert_eq!(
            redirect_marker("http://127.0.0.1:8000").unwrap(),
            "http://127.0.0.1:8000/"
        );
        assert!(redirect_marker("not a url").is_err());
        assert!(redirect_marker("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(
            extract_code("http://localhost:8000/callback?code=ABC123").unwrap(),
            "ABC123"
        );
        assert_eq!(
            extract_code("http://localhost:8000/?session_state=x&code=M.C5%2Fab&state=1#frag")
                .unwrap(),
            "M.C5/ab"
        );
    }

    #[test]
    fn test_extract_code_missing() {
        assert!(matches!(
            extract_code("http://localhost:8000/callback"),
            Err(AuthError::MissingCode)
        ));
        assert!(matches!(
            extract_code("http://localhost:8000/callback?state=1"),
            Err(AuthError::MissingCode)
        ));
        assert!(matches!(
            extract_code("http://localhost:8000/callback?code="),
            Err(AuthError::MissingCode)
        ));
        assert_eq!(
            extract_code("http://localhost:8000/callback?code=&code=ABC123").unwrap(),
            "ABC123"
        );
    }

    #[test]
    fn test_extract_code_denied() {
        let err = extract_code(
            "http://localhost:8000/callback?error=access_denied&error_description=User+declined",
        )
        .unwrap_err();
        match err {
            AuthError::Denied { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "User declined");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_for_url_returns_matching_url() {
        let mut tab = ScriptedTab::with_urls(&[
            Some("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?x"),
            None,
            Some("http://localhost:8000/callback?code=XYZ"),
        ]);
        let clock = FakeClock::new();

        let url = wait_for_url(
            &mut tab,
            "http://localhost:8000/callback",
            Duration::from_secs(300),
            POLL_INTERVAL,
            &clock,
        )
        .await
        .unwrap();

        assert_eq!(url, "http://localhost:8000/callback?code=XYZ");
        assert_eq!(clock.sleeps.get(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_url_times_out() {
        let mut tab = ScriptedTab::default();
        let clock = FakeClock::new();

        let err = wait_for_url(
            &mut tab,
            "http://localhost:8000/callback",
            Duration::from_secs(300),
            Duration::from_secs(7),
            &clock,
        )
        .await
        .unwrap_err();

        match err.downcast_ref::<AuthError>() {
            Some(AuthError::RedirectTimeout { waited, marker }) => {
                assert_eq!(*waited, Duration::from_secs(300));
                assert_eq!(marker, "http://localhost:8000/callback");
            }
            other => panic!("unexpected {:?}", other),
        }
        // 42 full polls plus one shortened to land exactly on the deadline
        assert_eq!(clock.sleeps.get(), 43);
    }

    #[tokio::test]
    async fn test_request_authorization() {
        let auth = auth_config();
        let mut tab = ScriptedTab::with_urls(&[Some("http://localhost:8000/callback?code=ABC123")]);

        let code = request_authorization(&mut tab, &auth, DEFAULT_REDIRECT_TIMEOUT, &FakeClock::new())
            .await
            .unwrap();

        assert_eq!(code, "ABC123");
        assert_eq!(tab.visited, vec![authorization_url(&auth).unwrap().to_string()]);
    }

    #[tokio::test]
    async fn test_request_authorization_portless_redirect() {
        let mut auth = auth_config();
        auth.redirect_uri = "http://localhost/callback".to_string();
        let authorize = authorization_url(&auth).unwrap().to_string();
        let mut tab = ScriptedTab::with_urls(&[
            Some(authorize.as_str()),
            Some("http://localhost/callback?code=REAL"),
        ]);
        let clock = FakeClock::new();

        let code = request_authorization(&mut tab, &auth, DEFAULT_REDIRECT_TIMEOUT, &clock)
            .await
            .unwrap();

        assert_eq!(code, "REAL");
        assert_eq!(clock.sleeps.get(), 1);
    }

    #[tokio::test]
    async fn test_request_authorization_without_code() {
        let auth = auth_config();
        let mut tab = ScriptedTab::with_urls(&[Some("http://localhost:8000/callback")]);

        let err = request_authorization(&mut tab, &auth, DEFAULT_REDIRECT_TIMEOUT, &FakeClock::new())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::MissingCode)));
    }
}
