//! Gateway configuration

use crate::auth::AuthOptions;
use crate::connection::{ConnectionState, TlsOptions, TlsProvider};
use crate::hooks::{ConnectionHooks, QueryExecutor};
use crate::protocol::constants::MAX_MESSAGE_LENGTH;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Whether clients must upgrade to TLS before sending the startup message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Refuse every SSLRequest
    #[default]
    Disable,
    /// Accept SSLRequest when TLS is configured, but allow plaintext startup
    Prefer,
    /// Reject a startup message that arrives over plaintext
    Require,
}

impl SslMode {
    /// Whether a plaintext startup message must be rejected
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Require)
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
        }
    }
}

impl std::str::FromStr for SslMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            _ => Err(Error::Config(format!(
                "invalid sslmode '{}': expected disable, prefer, or require",
                s
            ))),
        }
    }
}

/// Async `server_version` lookup, given the authenticated connection
pub type ServerVersionCallback =
    Arc<dyn Fn(ConnectionState) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Source of the `server_version` parameter reported after authentication
#[derive(Clone)]
pub enum ServerVersion {
    /// Same version for every connection
    Static(String),
    /// Version chosen per connection
    Dynamic(ServerVersionCallback),
}

impl ServerVersion {
    /// Choose the version with a callback that sees the connection state
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        ServerVersion::Dynamic(Arc::new(move |state| f(state).boxed()))
    }

    /// Version to report for a connection in `state`
    pub async fn resolve(&self, state: &ConnectionState) -> Result<String> {
        match self {
            ServerVersion::Static(version) => Ok(version.clone()),
            ServerVersion::Dynamic(callback) => callback(state.clone()).await,
        }
    }
}

impl From<String> for ServerVersion {
    fn from(version: String) -> Self {
        ServerVersion::Static(version)
    }
}

impl From<&str> for ServerVersion {
    fn from(version: &str) -> Self {
        ServerVersion::Static(version.to_string())
    }
}

impl std::fmt::Debug for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerVersion::Static(version) => f.debug_tuple("Static").field(version).finish(),
            ServerVersion::Dynamic(_) => f.write_str("Dynamic(<callback>)"),
        }
    }
}

/// Everything a connection needs from the embedding application.
///
/// Shared read-only between connections through an `Arc`.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Authentication method and credential callbacks
    pub auth: AuthOptions,
    /// TLS key material; `None` refuses every SSLRequest
    pub tls: Option<TlsProvider>,
    /// TLS policy
    pub ssl_mode: SslMode,
    /// Reported to clients as the `server_version` parameter
    pub server_version: Option<ServerVersion>,
    /// Lifecycle callbacks
    pub hooks: Option<Arc<dyn ConnectionHooks>>,
    /// Handles simple queries after authentication
    pub query_executor: Option<Arc<dyn QueryExecutor>>,
    /// Largest frontend message accepted, length field included
    pub max_message_length: usize,
}

impl GatewayConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = GatewayConfig::builder()
    ///     .auth(AuthOptions::cert())
    ///     .tls(TlsOptions::from_files("server.crt", "server.key", Some(Path::new("ca.crt")))?)
    ///     .server_version("16.0")
    ///     .build()?;
    /// ```
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Whether SSLRequest is answered with `S`
    pub fn accepts_tls(&self) -> bool {
        self.tls.is_some() && self.ssl_mode != SslMode::Disable
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth: AuthOptions::Trust,
            tls: None,
            ssl_mode: SslMode::Disable,
            server_version: None,
            hooks: None,
            query_executor: None,
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("auth", &self.auth)
            .field("tls", &self.tls)
            .field("ssl_mode", &self.ssl_mode)
            .field("server_version", &self.server_version)
            .field("hooks", &self.hooks.is_some())
            .field("query_executor", &self.query_executor.is_some())
            .field("max_message_length", &self.max_message_length)
            .finish()
    }
}

/// Builder for [`GatewayConfig`]
#[derive(Default)]
pub struct GatewayConfigBuilder {
    auth: AuthOptions,
    tls: Option<TlsProvider>,
    ssl_mode: Option<SslMode>,
    server_version: Option<ServerVersion>,
    hooks: Option<Arc<dyn ConnectionHooks>>,
    query_executor: Option<Arc<dyn QueryExecutor>>,
    max_message_length: Option<usize>,
}

impl GatewayConfigBuilder {
    /// Set the authentication method
    ///
    /// Default: trust
    pub fn auth(mut self, auth: AuthOptions) -> Self {
        self.auth = auth;
        self
    }

    /// Enable TLS with fixed options
    ///
    /// Unless `ssl_mode` is set explicitly, this also makes TLS mandatory.
    pub fn tls(self, options: TlsOptions) -> Self {
        self.tls_provider(TlsProvider::Static(options))
    }

    /// Enable TLS with any provider (for example per-SNI options)
    pub fn tls_provider(mut self, provider: TlsProvider) -> Self {
        self.tls = Some(provider);
        self
    }

    /// Set the TLS policy
    ///
    /// Default: `Require` when TLS is configured, else `Disable`
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    /// Report this `server_version` after authentication
    pub fn server_version(mut self, version: impl Into<ServerVersion>) -> Self {
        self.server_version = Some(version.into());
        self
    }

    /// Compute `server_version` per connection, once it is authenticated
    pub fn server_version_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.server_version(ServerVersion::from_fn(f))
    }

    /// Install lifecycle hooks
    pub fn hooks(mut self, hooks: Arc<dyn ConnectionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Install a query executor
    pub fn query_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.query_executor = Some(executor);
        self
    }

    /// Cap the size of a single frontend message
    ///
    /// Default: 1 GiB
    pub fn max_message_length(mut self, len: usize) -> Self {
        self.max_message_length = Some(len);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<GatewayConfig> {
        let ssl_mode = self.ssl_mode.unwrap_or(if self.tls.is_some() {
            SslMode::Require
        } else {
            SslMode::Disable
        });

        if ssl_mode == SslMode::Require && self.tls.is_none() {
            return Err(Error::Config(
                "sslmode=require needs TLS options".to_string(),
            ));
        }
        if self.auth.requires_client_certificate() && self.tls.is_none() {
            return Err(Error::Config(
                "certificate authentication needs TLS options".to_string(),
            ));
        }

        let max_message_length = self.max_message_length.unwrap_or(MAX_MESSAGE_LENGTH);
        if max_message_length < 8 {
            return Err(Error::Config(format!(
                "max_message_length {} is too small",
                max_message_length
            )));
        }

        Ok(GatewayConfig {
            auth: self.auth,
            tls: self.tls,
            ssl_mode,
            server_version: self.server_version,
            hooks: self.hooks,
            query_executor: self.query_executor,
            max_message_length,
        })
    }
}
