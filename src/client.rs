//! Main Trino client with builder pattern.
//!
//! Provides the primary interface for connecting to a Trino coordinator and
//! executing statements over its HTTP paging protocol.

use crate::auth::{AuthProvider, RequestDecorator};
use crate::config::{Config, DEFAULT_QUERY_TIMEOUT};
use crate::error::{Result, TrinoLinkError};
use crate::rows::Rows;
use crate::session::{
    query_escape, SessionHeaders, HEADER_AUTHORIZATION, HEADER_CATALOG, HEADER_EXTRA_CREDENTIAL,
    HEADER_SCHEMA, HEADER_SESSION, HEADER_SOURCE, HEADER_USER,
};
use crate::statement::{self, QueryOptions};
use crate::transport::Transport;
use crate::value::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Connection state shared by the client and its statements.
pub(crate) struct Connection {
    pub(crate) transport: Transport,
    /// Undecorated client used for spooled segment fetches
    pub(crate) raw_http: reqwest::Client,
    pub(crate) base_url: String,
    pub(crate) user: Option<String>,
    pub(crate) explicit_prepare: bool,
    pub(crate) forward_authorization_header: bool,
    pub(crate) query_timeout: Duration,
}

/// Async client for the Trino statement protocol.
///
/// Use [`TrinoLinkClient::from_dsn`] or the builder to construct instances.
///
/// # Examples
///
/// ```rust,no_run
/// use trino_link::TrinoLinkClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = TrinoLinkClient::from_dsn(
///     "http://alice@localhost:8080?catalog=tpch&schema=tiny",
/// )?;
///
/// let mut rows = client.query("SELECT nationkey, name FROM nation", Vec::new()).await?;
/// while let Some(row) = rows.next_row().await? {
///     println!("{:?}", row);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TrinoLinkClient {
    conn: Arc<Connection>,
}

impl TrinoLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> TrinoLinkClientBuilder {
        TrinoLinkClientBuilder::new()
    }

    /// Connect using a DSN string
    /// (`scheme://[user[:pass]@]host[:port]?key=value&...`).
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        Self::from_config(Config::parse(dsn)?)
    }

    /// Connect using an already parsed [`Config`].
    pub fn from_config(config: Config) -> Result<Self> {
        let mut builder = Self::builder()
            .base_url(config.base_url.clone())
            .explicit_prepare(config.explicit_prepare)
            .forward_authorization_header(config.forward_authorization_header)
            .query_timeout(config.query_timeout)
            .session_properties(config.session_properties.clone())
            .extra_credentials(config.extra_credentials.clone());

        if let Some(user) = &config.user {
            builder = builder.user(user.clone());
        }
        if let Some(source) = &config.source {
            builder = builder.source(source.clone());
        }
        if let Some(catalog) = &config.catalog {
            builder = builder.catalog(catalog.clone());
        }
        if let Some(schema) = &config.schema {
            builder = builder.schema(schema.clone());
        }
        if let Some(token) = &config.access_token {
            builder = builder.access_token(token.clone());
        }
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.auth(AuthProvider::basic(user.clone(), password.clone()));
        }

        if let Some(name) = &config.custom_client {
            let client = custom_client(name).ok_or_else(|| {
                TrinoLinkError::Configuration(format!("custom client not registered: {:?}", name))
            })?;
            builder = builder.http_client(client);
        } else if config.secure {
            let pem = match (&config.ssl_cert, &config.ssl_cert_path) {
                (Some(cert), _) => Some(cert.clone().into_bytes()),
                (None, Some(path)) => Some(std::fs::read(path).map_err(|e| {
                    TrinoLinkError::Configuration(format!(
                        "error loading SSL cert file {}: {}",
                        path, e
                    ))
                })?),
                (None, None) => None,
            };
            if let Some(pem) = pem {
                let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    TrinoLinkError::Configuration(format!("invalid SSL certificate: {}", e))
                })?;
                let client = reqwest::Client::builder()
                    .add_root_certificate(certificate)
                    .build()
                    .map_err(|e| TrinoLinkError::Configuration(e.to_string()))?;
                builder = builder.http_client(client);
            }
        }

        builder.build()
    }

    /// Execute a query and stream its rows.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Rows> {
        self.query_with_options(sql, params, QueryOptions::new())
            .await
    }

    /// Execute a query with per-query options.
    pub async fn query_with_options(
        &self,
        sql: &str,
        params: Vec<Value>,
        options: QueryOptions,
    ) -> Result<Rows> {
        statement::execute_query(self.conn.clone(), sql, &params, options).await
    }

    /// Execute an update statement, draining any result pages, and return
    /// the server-reported update count.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<i64> {
        let mut rows = self.query(sql, params).await?;
        while rows.next_row().await?.is_some() {}
        Ok(rows.update_count())
    }

    /// Transactions are not supported by the protocol.
    pub fn begin_transaction(&self) -> Result<()> {
        Err(TrinoLinkError::OperationNotSupported("transactions"))
    }

    /// Auto-generated insert ids do not exist in Trino.
    pub fn last_insert_id(&self) -> Result<i64> {
        Err(TrinoLinkError::OperationNotSupported("last insert id"))
    }
}

/// Builder for configuring [`TrinoLinkClient`] instances.
pub struct TrinoLinkClientBuilder {
    base_url: Option<String>,
    user: Option<String>,
    auth: AuthProvider,
    http_client: Option<reqwest::Client>,
    decorator: Option<Arc<dyn RequestDecorator>>,
    source: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    session_properties: Vec<(String, String)>,
    extra_credentials: Vec<(String, String)>,
    access_token: Option<String>,
    explicit_prepare: bool,
    forward_authorization_header: bool,
    query_timeout: Duration,
}

impl TrinoLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            user: None,
            auth: AuthProvider::none(),
            http_client: None,
            decorator: None,
            source: None,
            catalog: None,
            schema: None,
            session_properties: Vec::new(),
            extra_credentials: Vec::new(),
            access_token: None,
            explicit_prepare: true,
            forward_authorization_header: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Coordinator URL, `scheme://host[:port]`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// User reported to the coordinator (`X-Trino-User`).
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the authentication provider.
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Supply a preconfigured HTTP client (TLS, proxies, timeouts).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Install a request decoration hook, e.g. for SPNEGO negotiation.
    pub fn request_decorator(mut self, decorator: Arc<dyn RequestDecorator>) -> Self {
        self.decorator = Some(decorator);
        self
    }

    /// Source label for this connection (`X-Trino-Source`).
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Session properties sent as repeated `X-Trino-Session` headers.
    pub fn session_properties(mut self, properties: Vec<(String, String)>) -> Self {
        self.session_properties = properties;
        self
    }

    /// Extra credentials sent as repeated `X-Trino-Extra-Credential`
    /// headers.
    pub fn extra_credentials(mut self, credentials: Vec<(String, String)>) -> Self {
        self.extra_credentials = credentials;
        self
    }

    /// JWT access token sent as `Authorization: Bearer ...`.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Bind parameters through a named prepared statement (default) rather
    /// than `EXECUTE IMMEDIATE`.
    pub fn explicit_prepare(mut self, explicit: bool) -> Self {
        self.explicit_prepare = explicit;
        self
    }

    /// Allow per-query access tokens to override the Authorization header.
    pub fn forward_authorization_header(mut self, forward: bool) -> Self {
        self.forward_authorization_header = forward;
        self
    }

    /// Timeout applied to each query without an explicit deadline.
    /// Default: 10 hours.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<TrinoLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| TrinoLinkError::Configuration("base_url is required".into()))?;

        let mut session = SessionHeaders::new();
        if let Some(user) = &self.user {
            session.add(HEADER_USER, user.clone());
        }
        if let Some(source) = &self.source {
            session.add(HEADER_SOURCE, source.clone());
        }
        if let Some(catalog) = &self.catalog {
            session.add(HEADER_CATALOG, catalog.clone());
        }
        if let Some(schema) = &self.schema {
            session.add(HEADER_SCHEMA, schema.clone());
        }
        if let Some(token) = &self.access_token {
            session.add(HEADER_AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, pairs) in [
            (HEADER_SESSION, &self.session_properties),
            (HEADER_EXTRA_CREDENTIAL, &self.extra_credentials),
        ] {
            for (key, value) in pairs {
                validate_property(name, key, value)?;
                session.add(name, format!("{}={}", key, query_escape(value)));
            }
        }

        let http = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| TrinoLinkError::Configuration(e.to_string()))?,
        };

        let transport = Transport::new(http.clone(), session, self.auth, self.decorator);

        Ok(TrinoLinkClient {
            conn: Arc::new(Connection {
                transport,
                raw_http: http,
                base_url,
                user: self.user,
                explicit_prepare: self.explicit_prepare,
                forward_authorization_header: self.forward_authorization_header,
                query_timeout: self.query_timeout,
            }),
        })
    }
}

fn validate_property(header: &str, key: &str, value: &str) -> Result<()> {
    if key.is_empty() || !crate::config::is_printable_ascii(key) {
        return Err(TrinoLinkError::Configuration(format!(
            "{} key '{}' contains spaces or is not printable ASCII",
            header, key
        )));
    }
    if value.is_empty() || !crate::config::is_printable_ascii(value) {
        return Err(TrinoLinkError::Configuration(format!(
            "{} value for key '{}' contains spaces or is not printable ASCII",
            header, key
        )));
    }
    Ok(())
}

// ── Custom HTTP client registry ─────────────────────────────────────────────

static CUSTOM_CLIENT_REGISTRY: Lazy<RwLock<HashMap<String, reqwest::Client>>> =
    Lazy::new(Default::default);

// strconv-style booleans are reserved so a DSN `custom_client=true` can
// never resolve to a registered client
const RESERVED_CLIENT_KEYS: [&str; 12] = [
    "1", "t", "T", "TRUE", "true", "True", "0", "f", "F", "FALSE", "false", "False",
];

/// Associate an HTTP client with a key for use via the `custom_client` DSN
/// parameter.
///
/// ```rust
/// let client = reqwest::Client::builder().build().unwrap();
/// trino_link::register_custom_client("proxied", client).unwrap();
/// let conn = trino_link::TrinoLinkClient::from_dsn(
///     "http://user@localhost:8080?custom_client=proxied",
/// ).unwrap();
/// ```
pub fn register_custom_client(key: &str, client: reqwest::Client) -> Result<()> {
    if RESERVED_CLIENT_KEYS.contains(&key) {
        return Err(TrinoLinkError::Configuration(format!(
            "custom client key {:?} is reserved",
            key
        )));
    }
    CUSTOM_CLIENT_REGISTRY
        .write()
        .expect("custom client registry lock poisoned")
        .insert(key.to_string(), client);
    Ok(())
}

/// Remove the client associated with the key.
pub fn deregister_custom_client(key: &str) {
    CUSTOM_CLIENT_REGISTRY
        .write()
        .expect("custom client registry lock poisoned")
        .remove(key);
}

fn custom_client(key: &str) -> Option<reqwest::Client> {
    CUSTOM_CLIENT_REGISTRY
        .read()
        .expect("custom client registry lock poisoned")
        .get(key)
        .cloned()
}
