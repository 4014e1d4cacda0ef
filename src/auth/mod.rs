//! Authentication flows
//!
//! [`AuthOptions`] is what the embedding application configures: the method plus the
//! callbacks that fetch (and optionally validate) credentials. [`AuthFlow`] is the
//! per-connection state machine built from it after the startup message.

pub mod cert;
pub mod cleartext;
pub mod crypto;
pub mod md5;
pub mod scram;

pub use cert::{CertCredentials, CertFlow};
pub use cleartext::{ClearTextCredentials, ClearTextPasswordFlow};
pub use md5::{Md5Credentials, Md5PasswordFlow};
pub use scram::{ScramCredentials, ScramSha256Data, ScramSha256Flow};

use crate::connection::ConnectionState;
use crate::metrics::labels;
use crate::protocol::{sqlstate, BackendError};
use crate::{Error, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Async credential lookup keyed by username
pub type LookupFn<T> =
    Arc<dyn Fn(String, ConnectionState) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Async override of a method's built-in credential check
pub type ValidateFn<C> =
    Arc<dyn Fn(C, ConnectionState) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// Wrap a closure as a [`ValidateFn`]
pub fn validator<C, F>(f: F) -> ValidateFn<C>
where
    F: Fn(C, ConnectionState) -> BoxFuture<'static, Result<bool>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Authentication method identifier, used for logging and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// No credentials
    Trust,
    /// Cleartext password
    ClearTextPassword,
    /// Salted MD5 password
    Md5Password,
    /// SCRAM-SHA-256 over SASL
    ScramSha256,
    /// TLS client certificate
    Cert,
}

impl AuthMethod {
    /// Method name as used in `pg_hba.conf`
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Trust => labels::MECHANISM_TRUST,
            AuthMethod::ClearTextPassword => labels::MECHANISM_CLEARTEXT,
            AuthMethod::Md5Password => labels::MECHANISM_MD5,
            AuthMethod::ScramSha256 => labels::MECHANISM_SCRAM,
            AuthMethod::Cert => labels::MECHANISM_CERT,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured authentication method and its callbacks
#[derive(Clone)]
pub enum AuthOptions {
    /// Accept every client without a challenge
    Trust,

    /// Cleartext password
    ClearTextPassword {
        /// Fetch the expected password
        get_password: LookupFn<String>,
        /// Replace the default exact-match comparison
        validate: Option<ValidateFn<ClearTextCredentials>>,
    },

    /// MD5-salted password
    Md5Password {
        /// Fetch the stored `md5(password || user)` hex digest
        get_pre_hashed_password: LookupFn<String>,
        /// Replace the default hash comparison
        validate: Option<ValidateFn<Md5Credentials>>,
    },

    /// SCRAM-SHA-256
    ScramSha256 {
        /// Fetch the stored SCRAM verifier
        get_scram_sha256_data: LookupFn<ScramSha256Data>,
        /// Replace the default proof verification
        validate: Option<ValidateFn<ScramCredentials>>,
    },

    /// TLS client certificate
    Cert {
        /// Replace the default subject CN == username check
        validate: Option<ValidateFn<CertCredentials>>,
    },
}

impl Default for AuthOptions {
    fn default() -> Self {
        AuthOptions::Trust
    }
}

impl AuthOptions {
    /// Cleartext password checked against `get_password`
    pub fn cleartext_password<F, Fut>(get_password: F) -> Self
    where
        F: Fn(String, ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        AuthOptions::ClearTextPassword {
            get_password: Arc::new(move |user, state| get_password(user, state).boxed()),
            validate: None,
        }
    }

    /// MD5 password checked against the pre-hashed value from `get_pre_hashed_password`
    pub fn md5_password<F, Fut>(get_pre_hashed_password: F) -> Self
    where
        F: Fn(String, ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        AuthOptions::Md5Password {
            get_pre_hashed_password: Arc::new(move |user, state| {
                get_pre_hashed_password(user, state).boxed()
            }),
            validate: None,
        }
    }

    /// SCRAM-SHA-256 against the verifier from `get_scram_sha256_data`
    pub fn scram_sha256<F, Fut>(get_scram_sha256_data: F) -> Self
    where
        F: Fn(String, ConnectionState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ScramSha256Data>> + Send + 'static,
    {
        AuthOptions::ScramSha256 {
            get_scram_sha256_data: Arc::new(move |user, state| {
                get_scram_sha256_data(user, state).boxed()
            }),
            validate: None,
        }
    }

    /// Client certificate whose subject CN must equal the username
    pub fn cert() -> Self {
        AuthOptions::Cert { validate: None }
    }

    /// Which method these options configure
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthOptions::Trust => AuthMethod::Trust,
            AuthOptions::ClearTextPassword { .. } => AuthMethod::ClearTextPassword,
            AuthOptions::Md5Password { .. } => AuthMethod::Md5Password,
            AuthOptions::ScramSha256 { .. } => AuthMethod::ScramSha256,
            AuthOptions::Cert { .. } => AuthMethod::Cert,
        }
    }

    /// Whether the TLS handshake should ask for a client certificate
    pub fn requires_client_certificate(&self) -> bool {
        matches!(self, AuthOptions::Cert { .. })
    }
}

impl fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOptions")
            .field("method", &self.method())
            .finish_non_exhaustive()
    }
}

/// Per-connection authentication state machine
pub enum AuthFlow {
    /// Completed from the start
    Trust,
    /// Cleartext password exchange
    ClearTextPassword(ClearTextPasswordFlow),
    /// MD5 challenge/response
    Md5Password(Md5PasswordFlow),
    /// SCRAM-SHA-256 SASL exchange
    ScramSha256(ScramSha256Flow),
    /// Client certificate check
    Cert(CertFlow),
}

impl AuthFlow {
    /// Build the flow for `username`.
    ///
    /// `rng` supplies the MD5 salt and the SCRAM server nonce.
    pub fn new<R>(options: &AuthOptions, username: &str, rng: &mut R) -> Self
    where
        R: RngCore + CryptoRng,
    {
        match options {
            AuthOptions::Trust => AuthFlow::Trust,
            AuthOptions::ClearTextPassword {
                get_password,
                validate,
            } => AuthFlow::ClearTextPassword(ClearTextPasswordFlow::new(
                username,
                get_password.clone(),
                validate.clone(),
            )),
            AuthOptions::Md5Password {
                get_pre_hashed_password,
                validate,
            } => AuthFlow::Md5Password(Md5PasswordFlow::new(
                username,
                get_pre_hashed_password.clone(),
                validate.clone(),
                rng,
            )),
            AuthOptions::ScramSha256 {
                get_scram_sha256_data,
                validate,
            } => AuthFlow::ScramSha256(ScramSha256Flow::new(
                username,
                get_scram_sha256_data.clone(),
                validate.clone(),
                rng,
            )),
            AuthOptions::Cert { validate } => {
                AuthFlow::Cert(CertFlow::new(username, validate.clone()))
            }
        }
    }

    /// Method implemented by this flow
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthFlow::Trust => AuthMethod::Trust,
            AuthFlow::ClearTextPassword(_) => AuthMethod::ClearTextPassword,
            AuthFlow::Md5Password(_) => AuthMethod::Md5Password,
            AuthFlow::ScramSha256(_) => AuthMethod::ScramSha256,
            AuthFlow::Cert(_) => AuthMethod::Cert,
        }
    }

    /// Challenge to send when authentication starts, if the method has one
    pub fn initial_message(&self) -> Option<Bytes> {
        match self {
            AuthFlow::Trust | AuthFlow::Cert(_) => None,
            AuthFlow::ClearTextPassword(flow) => Some(flow.initial_message()),
            AuthFlow::Md5Password(flow) => Some(flow.initial_message()),
            AuthFlow::ScramSha256(flow) => Some(flow.initial_message()),
        }
    }

    /// Feed one client message into the flow.
    ///
    /// Returns the response to send, if any. A rejected client yields
    /// `Err(Error::Backend(..))` carrying the FATAL record to report before closing.
    pub async fn handle_client_message(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<Option<Bytes>> {
        match self {
            AuthFlow::Trust => Ok(None),
            AuthFlow::ClearTextPassword(flow) => flow.handle_client_message(message, state).await,
            AuthFlow::Md5Password(flow) => flow.handle_client_message(message, state).await,
            AuthFlow::ScramSha256(flow) => flow.handle_client_message(message, state).await,
            AuthFlow::Cert(flow) => flow.handle_client_message(message, state).await,
        }
    }

    /// Whether the client has been authenticated
    pub fn is_completed(&self) -> bool {
        match self {
            AuthFlow::Trust => true,
            AuthFlow::ClearTextPassword(flow) => flow.is_completed(),
            AuthFlow::Md5Password(flow) => flow.is_completed(),
            AuthFlow::ScramSha256(flow) => flow.is_completed(),
            AuthFlow::Cert(flow) => flow.is_completed(),
        }
    }
}

impl fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFlow")
            .field("method", &self.method())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// FATAL `28P01` for a failed password check
pub(crate) fn password_failed(username: &str) -> Error {
    Error::Backend(BackendError::fatal(
        sqlstate::INVALID_PASSWORD,
        format!("password authentication failed for user \"{}\"", username),
    ))
}

/// Error for a message arriving after the flow has already finished
pub(crate) fn already_completed() -> Error {
    Error::Protocol("authentication already completed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[tokio::test]
    async fn test_trust_is_complete_without_challenge() {
        let mut flow = AuthFlow::new(&AuthOptions::Trust, "alice", &mut OsRng);
        assert!(flow.is_completed());
        assert!(flow.initial_message().is_none());
        let reply = flow
            .handle_client_message(b"ignored", &ConnectionState::default())
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(flow.is_completed());
    }

    #[test]
    fn test_method_labels() {
        let options = AuthOptions::cleartext_password(|_, _| async { Ok("pw".to_string()) });
        assert_eq!(options.method(), AuthMethod::ClearTextPassword);
        assert_eq!(options.method().as_str(), "password");
        assert!(!options.requires_client_certificate());
        assert!(AuthOptions::cert().requires_client_certificate());
        assert_eq!(format!("{:?}", AuthOptions::Trust), "AuthOptions { method: Trust, .. }");
    }

    #[test]
    fn test_cert_flow_has_no_challenge() {
        let flow = AuthFlow::new(&AuthOptions::cert(), "alice", &mut OsRng);
        assert!(flow.initial_message().is_none());
        assert!(!flow.is_completed());
        assert_eq!(flow.method(), AuthMethod::Cert);
    }
}
