//! MD5 password authentication

use super::crypto::{constant_time_eq, salt_md5_password};
use super::{already_completed, password_failed, LookupFn, ValidateFn};
use crate::connection::ConnectionState;
use crate::protocol::{decode_password, encode_authentication_message, AuthenticationMessage};
use crate::Result;
use bytes::Bytes;
use rand::{CryptoRng, RngCore};
use tracing::warn;

/// Input of a custom MD5 validator
#[derive(Debug, Clone)]
pub struct Md5Credentials {
    /// User from the startup message
    pub username: String,
    /// `md5(password || user)` returned by the lookup callback
    pub pre_hashed_password: String,
    /// Salt sent in the challenge
    pub salt: [u8; 4],
    /// Hash sent by the client (`"md5" + 32 hex digits`)
    pub client_hash: Vec<u8>,
}

/// MD5 challenge/response with a random 4-byte salt
pub struct Md5PasswordFlow {
    username: String,
    salt: [u8; 4],
    get_pre_hashed_password: LookupFn<String>,
    validate: Option<ValidateFn<Md5Credentials>>,
    completed: bool,
}

impl Md5PasswordFlow {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        username: &str,
        get_pre_hashed_password: LookupFn<String>,
        validate: Option<ValidateFn<Md5Credentials>>,
        rng: &mut R,
    ) -> Self {
        let mut salt = [0u8; 4];
        rng.fill_bytes(&mut salt);
        Self {
            username: username.to_string(),
            salt,
            get_pre_hashed_password,
            validate,
            completed: false,
        }
    }

    /// Salt used for this connection
    pub fn salt(&self) -> [u8; 4] {
        self.salt
    }

    /// `AuthenticationMD5Password` carrying the salt
    pub fn initial_message(&self) -> Bytes {
        encode_authentication_message(AuthenticationMessage::Md5Password { salt: self.salt })
    }

    /// Check the client's hashed `PasswordMessage`
    pub async fn handle_client_message(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<Option<Bytes>> {
        if self.completed {
            return Err(already_completed());
        }

        let client_hash = decode_password(message)?;

        let lookup = (self.get_pre_hashed_password)(self.username.clone(), state.clone());
        let pre_hashed_password = lookup
            .await
            .map_err(|e| {
                warn!(user = %self.username, error = %e, "md5 password lookup failed");
                password_failed(&self.username)
            })?;

        let valid = match &self.validate {
            Some(validate) => {
                let credentials = Md5Credentials {
                    username: self.username.clone(),
                    pre_hashed_password,
                    salt: self.salt,
                    client_hash: client_hash.to_vec(),
                };
                validate(credentials, state.clone()).await.map_err(|e| {
                    warn!(user = %self.username, error = %e, "md5 validator failed");
                    password_failed(&self.username)
                })?
            }
            None => {
                let expected = salt_md5_password(&pre_hashed_password, &self.salt);
                constant_time_eq(expected.as_bytes(), client_hash)
            }
        };

        if !valid {
            warn!(user = %self.username, "md5 password rejected");
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
