//! Connection state machine

use crate::{Error, Result};
use rustls_pki_types::CertificateDer;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerStep {
    /// Waiting for an SSLRequest or a startup message
    AwaitingInitialMessage,

    /// Startup accepted, authentication exchange in progress
    PerformingAuthentication,

    /// Authenticated; regular messages are accepted
    ReadyForQuery,
}

impl ServerStep {
    /// Check if transition is valid.
    ///
    /// Steps only move forward; trust authentication goes straight from
    /// `AwaitingInitialMessage` to `ReadyForQuery`.
    pub fn can_transition_to(&self, next: ServerStep) -> bool {
        use ServerStep::*;

        matches!(
            (self, next),
            (AwaitingInitialMessage, PerformingAuthentication)
                | (AwaitingInitialMessage, ReadyForQuery)
                | (PerformingAuthentication, ReadyForQuery)
        )
    }

    /// Transition to new step
    pub fn transition(&mut self, next: ServerStep) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl Default for ServerStep {
    fn default() -> Self {
        ServerStep::AwaitingInitialMessage
    }
}

impl std::fmt::Display for ServerStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingInitialMessage => write!(f, "awaiting_initial_message"),
            Self::PerformingAuthentication => write!(f, "performing_authentication"),
            Self::ReadyForQuery => write!(f, "ready_for_query"),
        }
    }
}

/// Startup information sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Protocol major version
    pub major_version: i16,
    /// Protocol minor version
    pub minor_version: i16,
    /// Startup parameters, one entry per key; `user` is always first
    pub parameters: Vec<(String, String)>,
}

impl ClientInfo {
    /// Build from startup parameters, moving `user` to the front.
    ///
    /// A key sent more than once keeps its first position and its last value. Returns
    /// `None` if there is no `user` parameter.
    pub fn new(
        major_version: i16,
        minor_version: i16,
        sent: Vec<(String, String)>,
    ) -> Option<Self> {
        let mut parameters: Vec<(String, String)> = Vec::with_capacity(sent.len());
        for (key, value) in sent {
            match parameters.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => parameters.push((key, value)),
            }
        }

        let user_index = parameters.iter().position(|(k, _)| k == "user")?;
        let user = parameters.remove(user_index);
        parameters.insert(0, user);
        Some(Self {
            major_version,
            minor_version,
            parameters,
        })
    }

    /// Look up a startup parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The authenticating user
    pub fn user(&self) -> &str {
        self.parameters
            .first()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }
}

/// What the TLS handshake established
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// Server name from the ClientHello SNI extension
    pub sni_server_name: Option<String>,
    /// Leaf certificate the client presented
    pub client_certificate: Option<CertificateDer<'static>>,
    /// Why the presented chain failed verification against the CA roots
    pub client_certificate_error: Option<String>,
}

impl TlsInfo {
    /// A client certificate was presented and its chain is trusted
    pub fn client_authorized(&self) -> bool {
        self.client_certificate.is_some() && self.client_certificate_error.is_none()
    }
}

/// Snapshot of a connection, handed to hooks and credential callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// A valid startup message has been read
    pub has_started: bool,
    /// The auth flow reported completion
    pub is_authenticated: bool,
    /// Current lifecycle step
    pub step: ServerStep,
    /// Set once, right before authentication starts
    pub client_info: Option<ClientInfo>,
    /// Set once the connection has been upgraded to TLS
    pub tls_info: Option<TlsInfo>,
}
