//! pgwire-gateway: the server side of the Postgres wire protocol
//!
//! This crate terminates connections from ordinary Postgres clients (`psql`, drivers,
//! ORMs), carries them through the startup handshake, optional TLS upgrade and one of
//! several authentication methods, and then parks them in the "ready for query" state
//! where an external [`hooks::QueryExecutor`] can take over.
//!
//! Supported authentication methods:
//! * trust
//! * cleartext password
//! * MD5 password
//! * SCRAM-SHA-256 (SASL)
//! * TLS client certificate
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> pgwire_gateway::Result<()> {
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use pgwire_gateway::auth::{AuthOptions, ScramSha256Data};
//! use pgwire_gateway::GatewayConfig;
//!
//! let data = ScramSha256Data::from_password("secret", 4096, &mut rand::rngs::OsRng)?;
//! let config = GatewayConfig::builder()
//!     .auth(AuthOptions::scram_sha256(move |_user, _state| {
//!         let data = data.clone();
//!         async move { Ok(data) }.boxed()
//!     }))
//!     .server_version("16.0")
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5432").await?;
//! pgwire_gateway::server::serve(listener, Arc::new(config)).await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use config::{GatewayConfig, GatewayConfigBuilder, ServerVersion, SslMode};
pub use connection::{
    ClientInfo, ConnectionState, Detached, PostgresConnection, ServerStep, TlsInfo,
};
pub use error::{Error, Result};
