//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain vs TLS)
//! * Server-side TLS upgrade and key material
//! * The per-connection state machine (startup, auth, ready for query)

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Detached, PostgresConnection};
pub use state::{ClientInfo, ConnectionState, ServerStep, TlsInfo};
pub use tls::{ClientCertCheck, TlsOptions, TlsOptionsCallback, TlsProvider};
pub use transport::Transport;
