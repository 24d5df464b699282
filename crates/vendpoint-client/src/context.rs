//! Per-request session context

use std::fmt;
use vendpoint_core::config::ApiConfig;

/// Where to send a request and which session to send it as
///
/// The session token travels with each call instead of living in global
/// state, so one client can serve several sessions.
#[derive(Clone)]
pub struct RequestContext {
    base_url: String,
    token: Option<String>,
}

impl RequestContext {
    /// Context for an unauthenticated session
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Attach a session token, sent as a bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Context from configuration
    #[must_use]
    pub fn from_config(api: &ApiConfig) -> Self {
        let mut context = Self::new(api.base_url.clone());
        context.token.clone_from(&api.token);
        context
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Session token, if any
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Absolute URL of an API path
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_url_joining() {
        let context = RequestContext::new("http://localhost:8000/");
        assert_eq!(context.base_url(), "http://localhost:8000");
        assert_eq!(context.url("/admin/logs/"), "http://localhost:8000/admin/logs/");
        assert_eq!(context.url("admin/logs/count"), "http://localhost:8000/admin/logs/count");
    }

    #[test]
    fn test_debug_redacts_token() {
        let context = RequestContext::new("http://api").with_token("secret-session");
        let debug = format!("{context:?}");
        assert!(!debug.contains("secret-session"));
        assert!(debug.contains("<redacted>"));
        assert_eq!(context.token(), Some("secret-session"));
    }

    #[test]
    fn test_from_config() {
        let mut api = ApiConfig::default();
        assert!(RequestContext::from_config(&api).token().is_none());

        api.token = Some("t".to_string());
        api.base_url = "https://vendpoint.example.com".to_string();
        let context = RequestContext::from_config(&api);
        assert_eq!(context.token(), Some("t"));
        assert_eq!(context.base_url(), "https://vendpoint.example.com");
    }
}
