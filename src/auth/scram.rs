//! SCRAM-SHA-256 authentication (server side)
//!
//! Implements the server half of SCRAM-SHA-256 (RFC 5802, RFC 7677) as Postgres runs it
//! over SASL: `AuthenticationSASL` → client-first → `AuthenticationSASLContinue` →
//! client-final → `AuthenticationSASLFinal`.

use super::crypto::{self, constant_time_eq, HashAlgorithm};
use super::{already_completed, LookupFn, ValidateFn};
use crate::connection::ConnectionState;
use crate::protocol::{
    decode_sasl_initial_response, decode_sasl_response, encode_authentication_message,
    sqlstate, AuthenticationMessage, BackendError,
};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// SASL mechanism name
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Iteration count used by [`ScramSha256Data::from_password`] callers that have no
/// preference (Postgres' own default)
pub const DEFAULT_ITERATIONS: u32 = 4096;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const SERVER_NONCE_LEN: usize = 18;

/// Stored SCRAM verifier for one user.
///
/// Serializes with base64 byte fields (`salt`, `storedKey`, `serverKey`) so it can be kept
/// in any JSON-ish credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScramSha256Data {
    /// Salt for PBKDF2
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// PBKDF2 iteration count
    pub iterations: u32,
    /// `SHA256(HMAC(SaltedPassword, "Client Key"))`
    #[serde(with = "base64_bytes")]
    pub stored_key: Vec<u8>,
    /// `HMAC(SaltedPassword, "Server Key")`
    #[serde(with = "base64_bytes")]
    pub server_key: Vec<u8>,
}

impl ScramSha256Data {
    /// Derive a verifier from a password with a fresh 16-byte random salt
    pub fn from_password<R: RngCore + CryptoRng>(
        password: &str,
        iterations: u32,
        rng: &mut R,
    ) -> Result<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        Self::with_salt(password, salt, iterations)
    }

    /// Derive a verifier from a password and a given salt
    pub fn with_salt(password: &str, salt: Vec<u8>, iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::Config("SCRAM iteration count must be positive".into()));
        }

        // SaltedPassword := PBKDF2(password, salt, iterations, HMAC-SHA256)
        let salted_password = crypto::pbkdf2(
            password.as_bytes(),
            &salt,
            iterations,
            KEY_LEN,
            HashAlgorithm::Sha256,
        )?;

        // ClientKey := HMAC(SaltedPassword, "Client Key"); StoredKey := SHA256(ClientKey)
        let client_key = crypto::hmac(&salted_password, b"Client Key", HashAlgorithm::Sha256)?;
        let stored_key = crypto::hash(&client_key, HashAlgorithm::Sha256);

        // ServerKey := HMAC(SaltedPassword, "Server Key")
        let server_key = crypto::hmac(&salted_password, b"Server Key", HashAlgorithm::Sha256)?;

        Ok(Self {
            salt,
            iterations,
            stored_key,
            server_key,
        })
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Verify a client proof against the stored key.
///
/// `ClientKey := ClientProof XOR HMAC(StoredKey, AuthMessage)`; the proof is valid iff
/// `SHA256(ClientKey) == StoredKey`.
pub fn verify_client_proof(auth_message: &str, client_proof: &str, stored_key: &[u8]) -> bool {
    let proof = match BASE64.decode(client_proof) {
        Ok(proof) => proof,
        Err(_) => return false,
    };
    let client_signature =
        match crypto::hmac(stored_key, auth_message.as_bytes(), HashAlgorithm::Sha256) {
            Ok(sig) => sig,
            Err(_) => return false,
        };
    if proof.len() != client_signature.len() {
        return false;
    }

    let client_key: Vec<u8> = proof
        .iter()
        .zip(client_signature.iter())
        .map(|(p, s)| p ^ s)
        .collect();
    let computed_stored_key = crypto::hash(&client_key, HashAlgorithm::Sha256);

    constant_time_eq(&computed_stored_key, stored_key)
}

/// Input of a custom SCRAM validator
#[derive(Debug, Clone)]
pub struct ScramCredentials {
    /// User from the startup message
    pub username: String,
    /// `client-first-bare,server-first,client-final-without-proof`
    pub auth_message: String,
    /// Base64 client proof
    pub client_proof: String,
    /// Verifier returned by the lookup callback
    pub data: ScramSha256Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScramStep {
    Initial,
    ServerFirstMessage,
    Completed,
}

/// Attributes of a client-final-message
struct ClientFinal<'a> {
    channel_binding: &'a str,
    nonce: &'a str,
    proof: &'a str,
}

/// SCRAM-SHA-256 SASL exchange
pub struct ScramSha256Flow {
    username: String,
    get_data: LookupFn<ScramSha256Data>,
    validate: Option<ValidateFn<ScramCredentials>>,
    step: ScramStep,
    nonce_suffix: String,
    client_first_bare: String,
    server_first: String,
    server_nonce: String,
    data: Option<ScramSha256Data>,
}

impl ScramSha256Flow {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        username: &str,
        get_data: LookupFn<ScramSha256Data>,
        validate: Option<ValidateFn<ScramCredentials>>,
        rng: &mut R,
    ) -> Self {
        let mut nonce = [0u8; SERVER_NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        Self {
            username: username.to_string(),
            get_data,
            validate,
            step: ScramStep::Initial,
            nonce_suffix: BASE64.encode(nonce),
            client_first_bare: String::new(),
            server_first: String::new(),
            server_nonce: String::new(),
            data: None,
        }
    }

    /// `AuthenticationSASL` listing `SCRAM-SHA-256`
    pub fn initial_message(&self) -> Bytes {
        encode_authentication_message(AuthenticationMessage::Sasl {
            mechanisms: vec![SCRAM_SHA_256.to_string()],
        })
    }

    /// Advance the exchange with one client message
    pub async fn handle_client_message(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<Option<Bytes>> {
        match self.step {
            ScramStep::Initial => {
                let server_first = self.handle_client_first(message, state).await?;
                self.step = ScramStep::ServerFirstMessage;
                Ok(Some(encode_authentication_message(
                    AuthenticationMessage::SaslContinue {
                        data: server_first.into_bytes(),
                    },
                )))
            }
            ScramStep::ServerFirstMessage => {
                let server_final = self.handle_client_final(message, state).await?;
                self.step = ScramStep::Completed;
                Ok(Some(encode_authentication_message(
                    AuthenticationMessage::SaslFinal {
                        data: server_final.into_bytes(),
                    },
                )))
            }
            ScramStep::Completed => Err(already_completed()),
        }
    }

    /// Whether the client proof was verified
    pub fn is_completed(&self) -> bool {
        self.step == ScramStep::Completed
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::Backend(BackendError::fatal(
            sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
            message,
        ))
    }

    /// Fetch the verifier once per flow; later steps reuse it
    async fn credentials(&mut self, state: &ConnectionState) -> Result<ScramSha256Data> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        let data = (self.get_data)(self.username.clone(), state.clone())
            .await
            .map_err(|e| {
                warn!(user = %self.username, error = %e, "SCRAM credential lookup failed");
                self.fail(format!(
                    "password authentication failed for user \"{}\"",
                    self.username
                ))
            })?;
        self.data = Some(data.clone());
        Ok(data)
    }

    async fn handle_client_first(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<String> {
        let response = decode_sasl_initial_response(message)?;
        if response.mechanism != SCRAM_SHA_256 {
            return Err(self.fail(format!(
                "Unsupported SASL authentication mechanism \"{}\"",
                response.mechanism
            )));
        }

        let client_first = std::str::from_utf8(response.data)
            .map_err(|_| self.fail("Invalid client first message"))?;
        let bare = parse_client_first(client_first)
            .ok_or_else(|| self.fail("Invalid client first message"))?;
        let client_nonce = find_attribute(bare, 'r')
            .filter(|nonce| !nonce.is_empty())
            .ok_or_else(|| self.fail("Invalid client first message"))?;

        let data = self.credentials(state).await?;

        self.server_nonce = format!("{}{}", client_nonce, self.nonce_suffix);
        self.server_first = format!(
            "r={},s={},i={}",
            self.server_nonce,
            BASE64.encode(&data.salt),
            data.iterations
        );
        self.client_first_bare = bare.to_string();

        debug!(user = %self.username, "sent SCRAM server-first message");
        Ok(self.server_first.clone())
    }

    async fn handle_client_final(
        &mut self,
        message: &[u8],
        state: &ConnectionState,
    ) -> Result<String> {
        let payload = decode_sasl_response(message)?;
        let text = std::str::from_utf8(payload)
            .map_err(|_| self.fail("Invalid client final message"))?;
        let client_final =
            parse_client_final(text).ok_or_else(|| self.fail("Invalid client final message"))?;

        if client_final.nonce != self.server_nonce {
            return Err(self.fail("Nonce mismatch"));
        }

        let auth_message = format!(
            "{},{},c={},r={}",
            self.client_first_bare,
            self.server_first,
            client_final.channel_binding,
            client_final.nonce
        );

        let data = self.credentials(state).await?;
        let valid = match &self.validate {
            Some(validate) => {
                let credentials = ScramCredentials {
                    username: self.username.clone(),
                    auth_message: auth_message.clone(),
                    client_proof: client_final.proof.to_string(),
                    data: data.clone(),
                };
                validate(credentials, state.clone()).await.map_err(|e| {
                    warn!(user = %self.username, error = %e, "SCRAM validator failed");
                    self.fail(format!(
                        "password authentication failed for user \"{}\"",
                        self.username
                    ))
                })?
            }
            None => verify_client_proof(&auth_message, client_final.proof, &data.stored_key),
        };

        if !valid {
            warn!(user = %self.username, "SCRAM proof rejected");
            return Err(self.fail(format!(
                "password authentication failed for user \"{}\"",
                self.username
            )));
        }

        let server_signature =
            crypto::hmac(&data.server_key, auth_message.as_bytes(), HashAlgorithm::Sha256)?;
        Ok(format!("v={}", BASE64.encode(server_signature)))
    }
}

/// Split `gs2-header` off a client-first-message and return the bare part.
///
/// The header is `cbind-flag "," [authzid] ","`; the flag is `n`, `y` or `p=<name>`.
fn parse_client_first(message: &str) -> Option<&str> {
    let mut parts = message.splitn(3, ',');
    let flag = parts.next()?;
    let _authzid = parts.next()?;
    let bare = parts.next()?;
    let flag_ok = flag == "n" || flag == "y" || flag.starts_with("p=");
    flag_ok.then_some(bare)
}

/// Value of the first `key=value` attribute with the given key
fn find_attribute(message: &str, key: char) -> Option<&str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        if chars.next() == Some(key) && chars.next() == Some('=') {
            Some(&part[2..])
        } else {
            None
        }
    })
}

/// Parse `c=<cb>,r=<nonce>[,extensions],p=<proof>`
fn parse_client_final(message: &str) -> Option<ClientFinal<'_>> {
    let (without_proof, proof) = message.rsplit_once(",p=")?;
    let channel_binding = find_attribute(without_proof, 'c')?;
    let nonce = find_attribute(without_proof, 'r')?;
    if proof.is_empty() {
        return None;
    }
    Some(ClientFinal {
        channel_binding,
        nonce,
        proof,
    })
}
