//! Authentication for outbound requests.
//!
//! Covers HTTP Basic Auth and bearer tokens directly, and exposes a request
//! decoration hook for negotiated schemes (SPNEGO/Kerberos) whose credential
//! acquisition lives outside this crate.

use crate::error::Result;

/// Authentication applied to every coordinator request.
///
/// # Examples
///
/// ```rust
/// use trino_link::AuthProvider;
///
/// // HTTP Basic Auth (HTTPS connections only)
/// let auth = AuthProvider::basic("alice".to_string(), "secret".to_string());
///
/// // Bearer token (JWT) authentication
/// let auth = AuthProvider::bearer("eyJhbGc...".to_string());
///
/// // No authentication
/// let auth = AuthProvider::none();
/// ```
#[derive(Debug, Clone)]
pub enum AuthProvider {
    /// No authentication
    None,

    /// HTTP Basic Auth (username, password)
    Basic(String, String),

    /// Bearer token authentication
    Bearer(String),
}

impl AuthProvider {
    /// Create HTTP Basic Auth credentials.
    ///
    /// Basic auth is only ever sent over HTTPS; the configuration layer
    /// rejects password-carrying DSNs on plain HTTP.
    pub fn basic(username: String, password: String) -> Self {
        Self::Basic(username, password)
    }

    /// Create bearer token authentication (`Authorization: Bearer <token>`).
    pub fn bearer(token: String) -> Self {
        Self::Bearer(token)
    }

    /// No authentication.
    pub fn none() -> Self {
        Self::None
    }

    /// Attach the authentication header to a request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Basic(username, password) => request.basic_auth(username, Some(password)),
            Self::Bearer(token) => request.bearer_auth(token),
            Self::None => request,
        }
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Hook invoked on every outbound coordinator request, after session headers
/// and per-call headers are applied.
///
/// This is the seam for negotiated authentication: a Kerberos deployment
/// registers a decorator that sets the SPNEGO negotiate header for the
/// destination host. The engine never acquires credentials itself.
pub trait RequestDecorator: Send + Sync {
    /// Decorate the request for the given destination host.
    fn decorate(
        &self,
        host: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder>;
}
