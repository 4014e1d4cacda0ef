//! Cleartext password authentication

use super::crypto::constant_time_eq;
use super::{already_completed, password_failed, LookupFn, ValidateFn};
use crate::connection::ConnectionState;
use crate::protocol::{decode_password, encode_authentication_message, AuthenticationMessage};
use crate::{Error, Result};
use bytes::Bytes;
use tracing::warn;

/// Input of a custom cleartext validator
#[derive(Debug, Clone)]
pub struct ClearTextCredentials {
    /// User from the startup message
    pub username: String,
    /// Password returned by the lookup callback
    pub password: String,
    /// Password sent by the client
    pub client_password: String,
}

/// Cleartext password exchange: one `AuthenticationCleartextPassword` challenge, one
/// `PasswordMessage` answer
pub struct ClearTextPasswordFlow {
    username: String,
    get_password: LookupFn<String>,
    validate: Option<ValidateFn<ClearTextCredentials>>,
    completed: bool,
}

impl ClearTextPasswordFlow {
    pub(crate) fn new(
        username: &str,
        get_password: LookupFn<String>,
        validate: Option<ValidateFn<ClearTextCredentials>>,
    ) -> Self {
        Self {
            username: username.to_string(),
            get_password,
            validate,
            completed: false,
        }
    }

    /// `AuthenticationCleartextPassword`
    pub fn initial_message(&self) -> Bytes {
        encode_authentication_message(AuthenticationMessage::CleartextPassword)
    }

    /// Check the client's `PasswordMessage`
    pub async fn handle_client_message(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<Option<Bytes>> {
        if self.completed {
            return Err(already_completed());
        }

        let client_password = std::str::from_utf8(decode_password(message)?)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in password: {}", e)))?
            .to_string();

        let password = (self.get_password)(self.username.clone(), state.clone())
            .await
            .map_err(|e| {
                warn!(user = %self.username, error = %e, "password lookup failed");
                password_failed(&self.username)
            })?;

        let valid = match &self.validate {
            Some(validate) => {
                let credentials = ClearTextCredentials {
                    username: self.username.clone(),
                    password,
                    client_password,
                };
                validate(credentials, state.clone()).await.map_err(|e| {
                    warn!(user = %self.username, error = %e, "password validator failed");
                    password_failed(&self.username)
                })?
            }
            None => constant_time_eq(password.as_bytes(), client_password.as_bytes()),
        };

        if !valid {
            warn!(user = %self.username, "cleartext password rejected");
            return Err(password_failed(&self.username));
        }

        self.completed = true;
        Ok(None)
    }

    /// Whether the password was accepted
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{validator, AuthFlow, AuthOptions};
    use futures::FutureExt;
    use rand::rngs::OsRng;

    fn password_message(password: &str) -> Vec<u8> {
        let mut msg = vec![b'p'];
        msg.extend_from_slice(&((password.len() + 5) as i32).to_be_bytes());
        msg.extend_from_slice(password.as_bytes());
        msg.push(0);
        msg
    }

    fn options() -> AuthOptions {
        AuthOptions::cleartext_password(|user, _| async move {
            Ok(format!("{}-secret", user))
        })
    }

    #[tokio::test]
    async fn test_correct_password() {
        let mut flow = AuthFlow::new(&options(), "bob", &mut OsRng);
        let challenge = flow.initial_message().unwrap();
        assert_eq!(&challenge[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 3]);

        let reply = flow
            .handle_client_message(&password_message("bob-secret"), &ConnectionState::default())
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(flow.is_completed());
    }

    #[tokio::test]
    async fn test_wrong_password_is_28p01() {
        let mut flow = AuthFlow::new(&options(), "bob", &mut OsRng);
        let err = flow
            .handle_client_message(&password_message("nope"), &ConnectionState::default())
            .await
            .unwrap_err();
        match err {
            Error::Backend(e) => {
                assert_eq!(e.code, "28P01");
                assert_eq!(e.message, "password authentication failed for user \"bob\"");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!flow.is_completed());
    }

    #[tokio::test]
    async fn test_lookup_error_is_password_failure() {
        let options = AuthOptions::cleartext_password(|_, _| async {
            Err(Error::Authentication("no such user".into()))
        });
        let mut flow = AuthFlow::new(&options, "ghost", &mut OsRng);
        let err = flow
            .handle_client_message(&password_message("x"), &ConnectionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(ref e) if e.code == "28P01"));
    }

    #[tokio::test]
    async fn test_custom_validator() {
        let options = match options() {
            AuthOptions::ClearTextPassword { get_password, .. } => {
                AuthOptions::ClearTextPassword {
                    get_password,
                    validate: Some(validator(|c: ClearTextCredentials, _| {
                        async move { Ok(c.client_password.eq_ignore_ascii_case(&c.password)) }
                            .boxed()
                    })),
                }
            }
            _ => unreachable!(),
        };

        let mut flow = AuthFlow::new(&options, "bob", &mut OsRng);
        flow.handle_client_message(&password_message("BOB-SECRET"), &ConnectionState::default())
            .await
            .unwrap();
        assert!(flow.is_completed());
    }

    #[tokio::test]
    async fn test_malformed_password_message() {
        let mut flow = AuthFlow::new(&options(), "bob", &mut OsRng);
        let err = flow
            .handle_client_message(&[b'p', 0, 0, 0, 6, b'x'], &ConnectionState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
