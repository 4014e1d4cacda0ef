//! Server side of a single client connection

use super::state::{ClientInfo, ConnectionState, ServerStep};
use super::transport::Transport;
use crate::auth::AuthFlow;
use crate::config::GatewayConfig;
use crate::hooks::MessageAction;
use crate::protocol::constants::{
    backend_message_name, frontend, frontend_message_name, MAX_AUTH_MESSAGE_LENGTH,
    MAX_STARTUP_MESSAGE_LENGTH,
};
use crate::protocol::{
    decode_initial_message, decode_query, encode_authentication_message, encode_error_response,
    encode_parameter_status, encode_ready_for_query, encode_ssl_response, message_tag, sqlstate,
    AuthenticationMessage, BackendError, InitialMessage, MessageBuffer, StartupMessage,
};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;

/// What the connection does after handling a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Continue,
    Close,
    Detach,
}

/// A connection handed back by a hook, with everything read but not yet processed
#[derive(Debug)]
pub struct Detached<S> {
    /// The client transport, TLS already established if it was upgraded
    pub transport: Transport<S>,
    /// State at the moment of detaching
    pub state: ConnectionState,
    /// Bytes received after the message that triggered the detach
    pub pending: Bytes,
}

/// One client connection, from the first byte to close.
///
/// Messages are handled strictly one at a time: nothing more is read from the socket
/// while a hook, credential lookup or TLS handshake is pending.
pub struct PostgresConnection<S> {
    transport: Option<Transport<S>>,
    config: Arc<GatewayConfig>,
    state: ConnectionState,
    buffer: MessageBuffer,
    read_buf: BytesMut,
    flow: Option<AuthFlow>,
    auth_start: Option<Instant>,
    closed: bool,
}

impl<S> PostgresConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted client stream
    pub fn new(stream: S, config: Arc<GatewayConfig>) -> Self {
        Self {
            transport: Some(Transport::Plain(stream)),
            buffer: MessageBuffer::with_max_message_length(config.max_message_length),
            config,
            state: ConnectionState::default(),
            read_buf: BytesMut::with_capacity(8192),
            flow: None,
            auth_start: None,
            closed: false,
        }
    }

    /// Current connection state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Serve the client until it disconnects, is rejected or is detached.
    ///
    /// A client that goes away (EOF, I/O or TLS failure) is a normal end and yields
    /// `Ok(None)`. Any other error has already been reported to the client as an
    /// `ErrorResponse` when this returns it. When `on_message` asks to detach, the
    /// transport is returned untouched in `Ok(Some(..))`.
    pub async fn run(mut self) -> Result<Option<Detached<S>>> {
        let result = match self.serve().await {
            Ok(Next::Detach) => return self.detach(),
            Ok(_) => Ok(None),
            Err(e) if e.is_transport() => {
                tracing::debug!(error = %e, "client disconnected");
                Ok(None)
            }
            Err(e) => {
                tracing::debug!(error = %e, "closing connection");
                if let Some(record) = e.to_backend_error() {
                    // Best effort: the client may already be gone
                    let _ = self.send(&encode_error_response(&record)).await;
                }
                Err(e)
            }
        };
        self.close().await;
        result
    }

    /// Shut the socket down. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown().await;
        }
    }

    fn detach(mut self) -> Result<Option<Detached<S>>> {
        self.closed = true;
        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
        tracing::debug!("connection detached");
        Ok(Some(Detached {
            transport,
            state: std::mem::take(&mut self.state),
            pending: self.buffer.take_buffered(),
        }))
    }

    async fn serve(&mut self) -> Result<Next> {
        loop {
            while let Some(msg) = self.next_message()? {
                match self.handle_message(msg).await? {
                    Next::Continue => {}
                    next => return Ok(next),
                }
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            self.read_buf.clear();
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                tracing::debug!("client closed the connection");
                return Ok(Next::Close);
            }
            self.buffer.merge_buffer(&self.read_buf[..n]);
        }
    }

    /// Next buffered message, under the length limit of the current phase
    fn next_message(&mut self) -> Result<Option<Bytes>> {
        self.buffer.set_max_message_length(self.message_limit());
        self.buffer.next_message(self.state.has_started)
    }

    /// Unauthenticated clients only get small messages
    fn message_limit(&self) -> usize {
        let max = self.config.max_message_length;
        if !self.state.has_started {
            max.min(MAX_STARTUP_MESSAGE_LENGTH)
        } else if !self.state.is_authenticated {
            max.min(MAX_AUTH_MESSAGE_LENGTH)
        } else {
            max
        }
    }

    async fn handle_message(&mut self, msg: Bytes) -> Result<Next> {
        let config = Arc::clone(&self.config);

        if let Some(hooks) = &config.hooks {
            match hooks.on_message(&msg, &self.state).await? {
                MessageAction::Continue => {}
                MessageAction::Respond(responses) => {
                    if !self.state.has_started
                        && matches!(decode_initial_message(&msg), Ok(InitialMessage::Startup(_)))
                    {
                        self.state.has_started = true;
                    }
                    for response in responses {
                        self.send(&response).await?;
                    }
                    return Ok(Next::Continue);
                }
                MessageAction::Detach => return Ok(Next::Detach),
            }
        }

        match self.state.step {
            ServerStep::AwaitingInitialMessage => self.handle_initial_message(msg).await,
            ServerStep::PerformingAuthentication => {
                let tag = message_tag(&msg)?;
                tracing::debug!(msg_type = frontend_message_name(tag), "received");
                if tag != frontend::PASSWORD {
                    return Err(Error::Protocol(format!(
                        "expected password response, got message type '{}'",
                        tag as char
                    )));
                }
                self.authenticate(&msg).await?;
                Ok(Next::Continue)
            }
            ServerStep::ReadyForQuery => self.handle_regular_message(msg).await,
        }
    }

    async fn handle_initial_message(&mut self, msg: Bytes) -> Result<Next> {
        if self.state.has_started {
            // A hook consumed the startup message but authentication never began
            return Err(Error::Protocol(format!(
                "unexpected message type '{}' before authentication",
                message_tag(&msg)? as char
            )));
        }

        match decode_initial_message(&msg)? {
            InitialMessage::SslRequest => {
                tracing::debug!(msg_type = "SSLRequest", "received");
                self.handle_ssl_request().await?;
                Ok(Next::Continue)
            }
            InitialMessage::GssEncRequest => {
                tracing::debug!(msg_type = "GSSENCRequest", "received");
                self.write_raw(&encode_ssl_response(false)).await?;
                Ok(Next::Continue)
            }
            InitialMessage::CancelRequest { process_id, .. } => {
                tracing::debug!(process_id, "cancel request ignored");
                Ok(Next::Close)
            }
            InitialMessage::Startup(startup) => {
                tracing::debug!(msg_type = "StartupMessage", "received");
                self.startup(&msg, startup).await?;
                Ok(Next::Continue)
            }
        }
    }

    /// Answer an `SSLRequest` and, when accepted, upgrade the transport in place.
    async fn handle_ssl_request(&mut self) -> Result<()> {
        if self.buffer.buffered_len() > 0 {
            return Err(Error::Protocol(
                "received unencrypted data after SSL request".to_string(),
            ));
        }
        if self.is_tls() {
            return Err(Error::Protocol("SSLRequest over an encrypted connection".to_string()));
        }

        let config = Arc::clone(&self.config);
        let provider = match &config.tls {
            Some(provider) if config.accepts_tls() => provider,
            _ => {
                tracing::debug!("TLS not enabled, declining SSLRequest");
                return self.write_raw(&encode_ssl_response(false)).await;
            }
        };

        self.write_raw(&encode_ssl_response(true)).await?;

        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
        let (transport, tls_info) = transport
            .upgrade_to_tls(provider, config.auth.requires_client_certificate())
            .await?;
        self.transport = Some(transport);

        tracing::info!(
            sni = tls_info.sni_server_name.as_deref().unwrap_or(""),
            client_certificate = tls_info.client_certificate.is_some(),
            client_authorized = tls_info.client_authorized(),
            "TLS connection established"
        );
        self.state.tls_info = Some(tls_info);

        if let Some(hooks) = &config.hooks {
            hooks.on_tls_upgrade(&self.state).await?;
        }
        Ok(())
    }

    /// Validate the startup message and start the configured auth flow
    async fn startup(&mut self, msg: &[u8], startup: StartupMessage) -> Result<()> {
        if self.config.ssl_mode.requires_tls() && !self.is_tls() {
            return Err(fatal(sqlstate::PROTOCOL_VIOLATION, "SSL connection is required"));
        }

        let StartupMessage {
            major_version,
            minor_version,
            parameters,
        } = startup;
        let client_info = ClientInfo::new(major_version, minor_version, parameters)
            .ok_or_else(|| fatal(sqlstate::CONNECTION_EXCEPTION, "user is required"))?;

        if (major_version, minor_version) != (3, 0) {
            return Err(fatal(
                sqlstate::CONNECTION_EXCEPTION,
                format!(
                    "Unsupported protocol version {}.{}",
                    major_version, minor_version
                ),
            ));
        }

        let user = client_info.user().to_string();
        let database = client_info.get("database").unwrap_or_default().to_string();

        async {
            self.state.client_info = Some(client_info);
            self.state.has_started = true;

            let config = Arc::clone(&self.config);
            if let Some(hooks) = &config.hooks {
                hooks.on_startup(&self.state).await?;
            }

            let flow = AuthFlow::new(&config.auth, &user, &mut OsRng);
            let method = flow.method();
            crate::metrics::counters::auth_attempted(method.as_str());
            self.auth_start = Some(Instant::now());
            tracing::debug!(method = method.as_str(), "starting authentication");

            if flow.is_completed() {
                self.flow = Some(flow);
                return self.complete_authentication().await;
            }

            self.state.step.transition(ServerStep::PerformingAuthentication)?;
            let challenge = flow.initial_message();
            self.flow = Some(flow);
            if let Some(challenge) = challenge {
                self.send(&challenge).await?;
            }

            // Certificate auth has no challenge; it checks the startup message itself
            if method == crate::auth::AuthMethod::Cert {
                self.authenticate(msg).await?;
            }
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %user,
            database = %database
        ))
        .await
    }

    /// Feed one message to the auth flow and finish authentication once it completes
    async fn authenticate(&mut self, msg: &[u8]) -> Result<()> {
        let flow = self.flow.as_mut().ok_or_else(|| Error::InvalidState {
            expected: "auth flow".to_string(),
            actual: "none".to_string(),
        })?;
        let method = flow.method();

        let reply = match flow.handle_client_message(msg, &self.state).await {
            Ok(reply) => reply,
            Err(e) => {
                let reason = e
                    .to_backend_error()
                    .map(|record| record.code)
                    .unwrap_or_else(|| "transport".to_string());
                crate::metrics::counters::auth_failed(method.as_str(), reason);
                return Err(e);
            }
        };
        let completed = flow.is_completed();

        if let Some(reply) = reply {
            self.send(&reply).await?;
        }
        if completed {
            self.complete_authentication().await?;
        }
        Ok(())
    }

    async fn complete_authentication(&mut self) -> Result<()> {
        let method = self
            .flow
            .as_ref()
            .map(AuthFlow::method)
            .unwrap_or(crate::auth::AuthMethod::Trust);
        crate::metrics::counters::auth_successful(method.as_str());
        if let Some(start) = self.auth_start.take() {
            crate::metrics::histograms::auth_duration(
                method.as_str(),
                start.elapsed().as_millis() as u64,
            );
        }

        self.state.is_authenticated = true;
        self.send(&encode_authentication_message(AuthenticationMessage::Ok))
            .await?;
        tracing::info!(method = method.as_str(), "client authenticated");

        let config = Arc::clone(&self.config);
        if let Some(hooks) = &config.hooks {
            hooks.on_authenticated(&self.state).await?;
        }
        if let Some(version) = &config.server_version {
            let version = version.resolve(&self.state).await?;
            self.send(&encode_parameter_status("server_version", &version))
                .await?;
        }

        self.state.step.transition(ServerStep::ReadyForQuery)?;
        self.send(&encode_ready_for_query()).await
    }

    async fn handle_regular_message(&mut self, msg: Bytes) -> Result<Next> {
        let tag = message_tag(&msg)?;
        tracing::debug!(msg_type = frontend_message_name(tag), "received");

        match tag {
            frontend::TERMINATE => Ok(Next::Close),
            frontend::QUERY => {
                self.handle_query(&msg).await?;
                Ok(Next::Continue)
            }
            _ => {
                let err = BackendError::error(
                    sqlstate::FEATURE_NOT_SUPPORTED,
                    "Message code not yet implemented",
                );
                self.send(&encode_error_response(&err)).await?;
                self.send(&encode_ready_for_query()).await?;
                Ok(Next::Continue)
            }
        }
    }

    async fn handle_query(&mut self, msg: &[u8]) -> Result<()> {
        let query = decode_query(msg)?;
        let config = Arc::clone(&self.config);

        let executor = match &config.query_executor {
            Some(executor) => executor,
            None => {
                let err = BackendError::error(
                    sqlstate::FEATURE_NOT_SUPPORTED,
                    "Queries not yet implemented",
                );
                self.send(&encode_error_response(&err)).await?;
                return self.send(&encode_ready_for_query()).await;
            }
        };

        match executor.execute(query, &self.state).await {
            Ok(responses) => {
                for response in responses {
                    self.send(&response).await?;
                }
            }
            Err(Error::Backend(err)) if err.is_fatal() => return Err(Error::Backend(err)),
            Err(Error::Backend(err)) => {
                self.send(&encode_error_response(&err)).await?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "query executor failed");
                let err = BackendError::error(sqlstate::INTERNAL_ERROR, e.to_string());
                self.send(&encode_error_response(&err)).await?;
            }
        }
        self.send(&encode_ready_for_query()).await
    }

    fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Write one complete backend message
    async fn send(&mut self, msg: &[u8]) -> Result<()> {
        if let Some(&tag) = msg.first() {
            tracing::debug!(msg_type = backend_message_name(tag), "sending");
        }
        self.write_raw(msg).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        transport.write_all(bytes).await?;
        transport.flush().await
    }
}

fn fatal(code: &str, message: impl Into<String>) -> Error {
    Error::Backend(BackendError::fatal(code, message))
}

impl<S> std::fmt::Debug for PostgresConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("state", &self.state)
            .field("flow", &self.flow)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{ConnectionHooks, MessageAction, QueryExecutor};
    use crate::protocol::{encode_message, BackendMessage};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn startup(user: &str) -> Vec<u8> {
        let mut body = vec![0, 3, 0, 0];
        body.extend_from_slice(b"user\0");
        body.extend_from_slice(user.as_bytes());
        body.extend_from_slice(b"\0\0");
        let mut msg = ((body.len() + 4) as i32).to_be_bytes().to_vec();
        msg.extend_from_slice(&body);
        msg
    }

    fn typed(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut msg = vec![tag];
        msg.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(body);
        msg
    }

    type Handle = tokio::task::JoinHandle<Result<Option<Detached<DuplexStream>>>>;

    fn spawn(config: GatewayConfig) -> (DuplexStream, Handle) {
        let (client, server) = tokio::io::duplex(4096);
        let conn = PostgresConnection::new(server, Arc::new(config));
        (client, tokio::spawn(conn.run()))
    }

    async fn read_message(stream: &mut DuplexStream) -> (u8, Vec<u8>) {
        let tag = stream.read_u8().await.unwrap();
        let len = stream.read_i32().await.unwrap();
        let mut body = vec![0; len as usize - 4];
        stream.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Read AuthenticationOk and everything up to ReadyForQuery
    async fn read_until_ready(stream: &mut DuplexStream) -> Vec<u8> {
        let mut tags = Vec::new();
        loop {
            let (tag, _) = read_message(stream).await;
            tags.push(tag);
            if tag == b'Z' {
                return tags;
            }
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_client, server) = tokio::io::duplex(64);
        let mut conn = PostgresConnection::new(server, Arc::new(GatewayConfig::default()));
        assert!(!conn.is_closed());
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_trust_startup_and_terminate() {
        let (mut client, handle) = spawn(GatewayConfig::default());
        client.write_all(&startup("alice")).await.unwrap();
        assert_eq!(read_until_ready(&mut client).await, vec![b'R', b'Z']);

        client.write_all(&typed(b'X', &[])).await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_server_version_reported() {
        let config = GatewayConfig::builder().server_version("16.0").build().unwrap();
        let (mut client, _handle) = spawn(config);
        client.write_all(&startup("alice")).await.unwrap();

        let (tag, _) = read_message(&mut client).await;
        assert_eq!(tag, b'R');
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'S');
        assert_eq!(body, b"server_version\x0016.0\x00");
        assert_eq!(read_message(&mut client).await, (b'Z', vec![b'I']));
    }

    #[tokio::test]
    async fn test_query_without_executor_is_not_fatal() {
        let (mut client, _handle) = spawn(GatewayConfig::default());
        client.write_all(&startup("alice")).await.unwrap();
        read_until_ready(&mut client).await;

        client.write_all(&typed(b'Q', b"select 1\0")).await.unwrap();
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'E');
        let body = String::from_utf8_lossy(&body).to_string();
        assert!(body.contains("SERROR"));
        assert!(body.contains("C0A000"));
        assert!(body.contains("Queries not yet implemented"));
        assert_eq!(read_message(&mut client).await, (b'Z', vec![b'I']));

        client.write_all(&typed(b'P', b"\0select 1\0\0\0")).await.unwrap();
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'E');
        assert!(String::from_utf8_lossy(&body).contains("Message code not yet implemented"));
        assert_eq!(read_message(&mut client).await.0, b'Z');
    }

    struct Echo;

    impl QueryExecutor for Echo {
        fn execute<'a>(
            &'a self,
            query: &'a str,
            _state: &'a ConnectionState,
        ) -> BoxFuture<'a, Result<Vec<Bytes>>> {
            async move {
                if query == "fail" {
                    return Err(Error::Protocol("boom".to_string()));
                }
                Ok(vec![encode_message(&BackendMessage::CommandComplete(
                    query.to_uppercase(),
                ))])
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_query_executor_output_followed_by_ready() {
        let config = GatewayConfig::builder()
            .query_executor(Arc::new(Echo))
            .build()
            .unwrap();
        let (mut client, _handle) = spawn(config);
        client.write_all(&startup("alice")).await.unwrap();
        read_until_ready(&mut client).await;

        client.write_all(&typed(b'Q', b"select\0")).await.unwrap();
        assert_eq!(read_message(&mut client).await, (b'C', b"SELECT\0".to_vec()));
        assert_eq!(read_message(&mut client).await, (b'Z', vec![b'I']));

        client.write_all(&typed(b'Q', b"fail\0")).await.unwrap();
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'E');
        assert!(String::from_utf8_lossy(&body).contains("CXX000"));
        assert_eq!(read_message(&mut client).await.0, b'Z');
    }

    #[tokio::test]
    async fn test_wrong_message_during_auth_is_protocol_violation() {
        let config = GatewayConfig::builder()
            .auth(crate::auth::AuthOptions::cleartext_password(|_, _| async {
                Ok("pw".to_string())
            }))
            .build()
            .unwrap();
        let (mut client, handle) = spawn(config);
        client.write_all(&startup("alice")).await.unwrap();
        assert_eq!(read_message(&mut client).await, (b'R', vec![0, 0, 0, 3]));

        client.write_all(&typed(b'Q', b"select 1\0")).await.unwrap();
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'E');
        let body = String::from_utf8_lossy(&body).to_string();
        assert!(body.contains("SFATAL"));
        assert!(body.contains("C08P01"));
        assert!(handle.await.unwrap().is_err());
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConnectionHooks for Recorder {
        fn on_startup<'a>(&'a self, state: &'a ConnectionState) -> BoxFuture<'a, Result<()>> {
            let user = state.client_info.as_ref().map(|c| c.user().to_string());
            self.events.lock().unwrap().push(format!("startup:{}", user.unwrap_or_default()));
            async { Ok(()) }.boxed()
        }

        fn on_authenticated<'a>(
            &'a self,
            state: &'a ConnectionState,
        ) -> BoxFuture<'a, Result<()>> {
            assert!(state.is_authenticated);
            self.events.lock().unwrap().push("authenticated".to_string());
            async { Ok(()) }.boxed()
        }

        fn on_message<'a>(
            &'a self,
            message: &'a [u8],
            _state: &'a ConnectionState,
        ) -> BoxFuture<'a, Result<MessageAction>> {
            async move {
                match message.first() {
                    Some(&b'Q') => {
                        let done = encode_message(&BackendMessage::CommandComplete("HOOK".into()));
                        Ok(MessageAction::Respond(vec![done, encode_ready_for_query()]))
                    }
                    Some(&b'd') => Ok(MessageAction::Detach),
                    _ => Ok(MessageAction::Continue),
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_detach_returns_transport_and_pending_bytes() {
        let config = GatewayConfig::builder()
            .hooks(Arc::new(Recorder::default()))
            .build()
            .unwrap();
        let (mut client, handle) = spawn(config);
        client.write_all(&startup("carol")).await.unwrap();
        read_until_ready(&mut client).await;

        let mut bytes = typed(b'd', b"copy");
        bytes.extend_from_slice(b"tail");
        client.write_all(&bytes).await.unwrap();

        let detached = handle.await.unwrap().unwrap().expect("detached");
        assert!(detached.state.is_authenticated);
        assert_eq!(detached.state.step, ServerStep::ReadyForQuery);
        assert_eq!(&detached.pending[..], b"tail");

        // The socket is still open and now belongs to the caller
        let mut transport = detached.transport;
        transport.write_all(b"hello").await.unwrap();
        transport.flush().await.unwrap();
        let mut buf = [0; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_server_version_callback_resolved_after_authentication() {
        let config = GatewayConfig::builder()
            .server_version_fn(|state: ConnectionState| async move {
                assert!(state.is_authenticated);
                let user = state.client_info.map(|info| info.user().to_string());
                Ok(format!("16.0-{}", user.unwrap_or_default()))
            })
            .build()
            .unwrap();
        let (mut client, _handle) = spawn(config);
        client.write_all(&startup("dave")).await.unwrap();

        assert_eq!(read_message(&mut client).await.0, b'R');
        let (tag, body) = read_message(&mut client).await;
        assert_eq!(tag, b'S');
        assert_eq!(body, b"server_version\x0016.0-dave\x00");
    }

    #[tokio::test]
    async fn test_message_limit_depends_on_phase() {
        let (_client, server) = tokio::io::duplex(64);
        let mut conn = PostgresConnection::new(server, Arc::new(GatewayConfig::default()));
        assert_eq!(conn.message_limit(), MAX_STARTUP_MESSAGE_LENGTH);
        conn.state.has_started = true;
        assert_eq!(conn.message_limit(), MAX_AUTH_MESSAGE_LENGTH);
        conn.state.is_authenticated = true;
        assert_eq!(conn.message_limit(), crate::protocol::constants::MAX_MESSAGE_LENGTH);
    }

    #[tokio::test]
    async fn test_hooks_run_in_order_and_can_answer_messages() {
        let recorder = Arc::new(Recorder::default());
        let config = GatewayConfig::builder()
            .hooks(recorder.clone())
            .build()
            .unwrap();
        let (mut client, _handle) = spawn(config);
        client.write_all(&startup("bob")).await.unwrap();
        read_until_ready(&mut client).await;
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["startup:bob".to_string(), "authenticated".to_string()]
        );

        client.write_all(&typed(b'Q', b"anything\0")).await.unwrap();
        assert_eq!(read_message(&mut client).await, (b'C', b"HOOK\0".to_vec()));
        assert_eq!(read_message(&mut client).await.0, b'Z');
    }

    #[tokio::test]
    async fn test_gssenc_declined_then_startup() {
        let (mut client, _handle) = spawn(GatewayConfig::default());
        let mut gss = 8i32.to_be_bytes().to_vec();
        gss.extend_from_slice(&80877104i32.to_be_bytes());
        client.write_all(&gss).await.unwrap();
        assert_eq!(client.read_u8().await.unwrap(), b'N');

        client.write_all(&startup("alice")).await.unwrap();
        assert_eq!(read_until_ready(&mut client).await, vec![b'R', b'Z']);
    }

    #[tokio::test]
    async fn test_cancel_request_closes_silently() {
        let (mut client, handle) = spawn(GatewayConfig::default());
        let mut cancel = 16i32.to_be_bytes().to_vec();
        cancel.extend_from_slice(&80877102i32.to_be_bytes());
        cancel.extend_from_slice(&42i32.to_be_bytes());
        cancel.extend_from_slice(&7i32.to_be_bytes());
        client.write_all(&cancel).await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(handle.await.unwrap().is_ok());
    }
}
