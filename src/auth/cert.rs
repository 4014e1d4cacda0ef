//! TLS client certificate authentication

use super::{already_completed, ValidateFn};
use crate::connection::ConnectionState;
use crate::protocol::{sqlstate, BackendError};
use crate::{Error, Result};
use bytes::Bytes;
use rustls_pki_types::CertificateDer;
use tracing::warn;
use x509_parser::prelude::*;

/// Input of a custom certificate validator
#[derive(Debug, Clone)]
pub struct CertCredentials {
    /// User from the startup message
    pub username: String,
    /// Leaf certificate presented during the TLS handshake, chain already trusted
    pub certificate: CertificateDer<'static>,
}

/// Certificate check, run against the startup message without any challenge
pub struct CertFlow {
    username: String,
    validate: Option<ValidateFn<CertCredentials>>,
    completed: bool,
}

impl CertFlow {
    pub(crate) fn new(username: &str, validate: Option<ValidateFn<CertCredentials>>) -> Self {
        Self {
            username: username.to_string(),
            validate,
            completed: false,
        }
    }

    /// Check the client certificate recorded in `state`
    pub async fn handle_client_message(
        &mut self,
        _message: &[u8],
        state: &ConnectionState,
    ) -> Result<Option<Bytes>> {
        if self.completed {
            return Err(already_completed());
        }

        let tls_info = state.tls_info.as_ref().ok_or_else(|| {
            fatal(sqlstate::CONNECTION_EXCEPTION, "ssl connection required")
        })?;
        let certificate = match &tls_info.client_certificate {
            Some(certificate) if tls_info.client_authorized() => certificate,
            _ => {
                if let Some(reason) = &tls_info.client_certificate_error {
                    warn!(user = %self.username, error = %reason, "untrusted client certificate");
                }
                return Err(fatal(
                    sqlstate::CONNECTION_EXCEPTION,
                    "client certificate is invalid",
                ));
            }
        };

        let valid = match &self.validate {
            Some(validate) => {
                let credentials = CertCredentials {
                    username: self.username.clone(),
                    certificate: certificate.clone(),
                };
                validate(credentials, state.clone()).await.map_err(|e| {
                    warn!(user = %self.username, error = %e, "certificate validator failed");
                    self.mismatch()
                })?
            }
            None => {
                let common_name = common_name(certificate)?;
                common_name.as_deref() == Some(self.username.as_str())
            }
        };

        if !valid {
            warn!(user = %self.username, "client certificate does not match user");
            return Err(self.mismatch());
        }

        self.completed = true;
        Ok(None)
    }

    /// Whether the certificate was accepted
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn mismatch(&self) -> Error {
        fatal(
            sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
            format!("certificate authentication failed for user \"{}\"", self.username),
        )
    }
}

fn fatal(code: &str, message: impl Into<String>) -> Error {
    Error::Backend(BackendError::fatal(code, message))
}

/// Subject common name of a DER certificate, if it has one
pub fn common_name(certificate: &CertificateDer<'_>) -> Result<Option<String>> {
    let (_, cert) = parse_x509_certificate(certificate.as_ref())
        .map_err(|_| fatal(sqlstate::CONNECTION_EXCEPTION, "client certificate is invalid"))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    Ok(cn)
}
