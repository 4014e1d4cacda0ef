//! Frontend side of the protocol, just enough to drive the gateway in tests

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pgwire_gateway::auth::crypto::{self, HashAlgorithm};
use pgwire_gateway::{GatewayConfig, PostgresConnection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Install a subscriber honouring `RUST_LOG`; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run a gateway connection over an in-memory pipe; hooks used here never detach
pub fn spawn_gateway(
    config: GatewayConfig,
) -> (
    TestClient<DuplexStream>,
    JoinHandle<pgwire_gateway::Result<()>>,
) {
    init_tracing();
    let (client, server) = tokio::io::duplex(64 * 1024);
    let conn = PostgresConnection::new(server, Arc::new(config));
    let handle = tokio::spawn(async move { conn.run().await.map(|_| ()) });
    (TestClient::new(client), handle)
}

fn untyped(body: &[u8]) -> Vec<u8> {
    let mut msg = ((body.len() + 4) as i32).to_be_bytes().to_vec();
    msg.extend_from_slice(body);
    msg
}

fn typed(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = vec![tag];
    msg.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    msg.extend_from_slice(body);
    msg
}

/// Startup message with an explicit protocol version
pub fn startup_with_version(major: i16, minor: i16, params: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&major.to_be_bytes());
    body.extend_from_slice(&minor.to_be_bytes());
    for (key, value) in params {
        body.extend_from_slice(key.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    untyped(&body)
}

/// Protocol 3.0 startup message
pub fn startup(params: &[(&str, &str)]) -> Vec<u8> {
    startup_with_version(3, 0, params)
}

/// 8-byte negotiation request (SSLRequest / GSSENCRequest)
pub fn negotiation_request(code: i32) -> Vec<u8> {
    untyped(&code.to_be_bytes())
}

pub fn ssl_request() -> Vec<u8> {
    negotiation_request(SSL_REQUEST_CODE)
}

pub fn password(password: &[u8]) -> Vec<u8> {
    let mut body = password.to_vec();
    body.push(0);
    typed(b'p', &body)
}

pub fn sasl_initial_response(mechanism: &str, data: &[u8]) -> Vec<u8> {
    let mut body = mechanism.as_bytes().to_vec();
    body.push(0);
    body.extend_from_slice(&(data.len() as i32).to_be_bytes());
    body.extend_from_slice(data);
    typed(b'p', &body)
}

pub fn sasl_response(data: &[u8]) -> Vec<u8> {
    typed(b'p', data)
}

pub fn query(sql: &str) -> Vec<u8> {
    let mut body = sql.as_bytes().to_vec();
    body.push(0);
    typed(b'Q', &body)
}

pub fn sync() -> Vec<u8> {
    typed(b'S', &[])
}

pub fn terminate() -> Vec<u8> {
    typed(b'X', &[])
}

/// Authentication request code of an `R` message body
pub fn auth_code(body: &[u8]) -> i32 {
    i32::from_be_bytes([body[0], body[1], body[2], body[3]])
}

/// Fields of an ErrorResponse / NoticeResponse body, keyed by field code
pub fn error_fields(body: &[u8]) -> HashMap<u8, String> {
    let mut fields = HashMap::new();
    let mut rest = body;
    while let Some((&code, tail)) = rest.split_first() {
        if code == 0 {
            break;
        }
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        fields.insert(code, String::from_utf8_lossy(&tail[..end]).to_string());
        rest = tail.get(end + 1..).unwrap_or_default();
    }
    fields
}

/// A frontend talking to the gateway over any stream
pub struct TestClient<S> {
    stream: S,
}

impl<S> TestClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Single unframed byte (SSLRequest answer)
    pub async fn recv_byte(&mut self) -> u8 {
        self.stream.read_u8().await.unwrap()
    }

    /// Next backend message as `(tag, body)`
    pub async fn recv(&mut self) -> (u8, Vec<u8>) {
        let tag = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap();
        let mut body = vec![0; len as usize - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Next message, which must be an `ErrorResponse`; returns its fields
    pub async fn recv_error(&mut self) -> HashMap<u8, String> {
        let (tag, body) = self.recv().await;
        assert_eq!(tag, b'E', "expected ErrorResponse, got '{}'", tag as char);
        error_fields(&body)
    }

    /// Messages up to and including `ReadyForQuery`
    pub async fn recv_until_ready(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut messages = Vec::new();
        loop {
            let msg = self.recv().await;
            let done = msg.0 == b'Z';
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    /// Everything the server sends until it closes the connection
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await.unwrap();
        rest
    }

    /// Full SCRAM-SHA-256 exchange after the `AuthenticationSASL` request was received
    pub async fn scram_exchange(&mut self, user: &str, password: &str) -> (u8, Vec<u8>) {
        let mut scram = ScramClient::new(user, password);
        self.send(&sasl_initial_response("SCRAM-SHA-256", scram.client_first().as_bytes()))
            .await;

        let (tag, body) = self.recv().await;
        if tag != b'R' {
            return (tag, body);
        }
        assert_eq!(auth_code(&body), 11);
        let server_first = String::from_utf8(body[4..].to_vec()).unwrap();
        let client_final = scram.client_final(&server_first);
        self.send(&sasl_response(client_final.as_bytes())).await;

        let (tag, body) = self.recv().await;
        if tag == b'R' {
            assert_eq!(auth_code(&body), 12);
            let server_final = String::from_utf8(body[4..].to_vec()).unwrap();
            assert!(scram.verify_server_final(&server_final));
        }
        (tag, body)
    }
}

/// Client half of SCRAM-SHA-256 without channel binding
pub struct ScramClient {
    username: String,
    password: String,
    nonce: String,
    auth_message: String,
    salted_password: Vec<u8>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let nonce_bytes: [u8; 18] = rand::random();
        Self::with_nonce(username, password, &BASE64.encode(nonce_bytes))
    }

    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            nonce: nonce.to_string(),
            auth_message: String::new(),
            salted_password: Vec::new(),
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.nonce)
    }

    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    /// Client-final message for `server_first` (`r=..,s=..,i=..`)
    pub fn client_final(&mut self, server_first: &str) -> String {
        let mut nonce = "";
        let mut salt = "";
        let mut iterations = "";
        for part in server_first.split(',') {
            if let Some(v) = part.strip_prefix("r=") {
                nonce = v;
            } else if let Some(v) = part.strip_prefix("s=") {
                salt = v;
            } else if let Some(v) = part.strip_prefix("i=") {
                iterations = v;
            }
        }
        assert!(nonce.starts_with(&self.nonce), "server nonce must extend ours");

        let salt = BASE64.decode(salt).unwrap();
        let iterations: u32 = iterations.parse().unwrap();
        self.salted_password = crypto::pbkdf2(
            self.password.as_bytes(),
            &salt,
            iterations,
            32,
            HashAlgorithm::Sha256,
        )
        .unwrap();

        let without_proof = format!("c={},r={}", BASE64.encode("n,,"), nonce);
        self.auth_message = format!("{},{},{}", self.client_first_bare(), server_first, without_proof);

        let client_key =
            crypto::hmac(&self.salted_password, b"Client Key", HashAlgorithm::Sha256).unwrap();
        let stored_key = crypto::hash(&client_key, HashAlgorithm::Sha256);
        let signature =
            crypto::hmac(&stored_key, self.auth_message.as_bytes(), HashAlgorithm::Sha256)
                .unwrap();
        let proof: Vec<u8> = client_key
            .iter()
            .zip(signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        format!("{},p={}", without_proof, BASE64.encode(proof))
    }

    /// Check the server's `v=` signature
    pub fn verify_server_final(&self, server_final: &str) -> bool {
        let Some(signature) = server_final.strip_prefix("v=") else {
            return false;
        };
        let server_key =
            crypto::hmac(&self.salted_password, b"Server Key", HashAlgorithm::Sha256).unwrap();
        let expected =
            crypto::hmac(&server_key, self.auth_message.as_bytes(), HashAlgorithm::Sha256)
                .unwrap();
        BASE64.encode(expected) == signature
    }
}
