//! Extension points for the embedding application

use crate::connection::ConnectionState;
use crate::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Callbacks invoked at each stage of a connection.
///
/// Every method returns a future that the connection awaits before it processes anything
/// else, so a slow hook stalls reading from that client. All methods default to no-ops.
/// An error from a hook is reported to the client (FATAL `08P01` for protocol errors,
/// otherwise as the carried error record) and closes the connection.
pub trait ConnectionHooks: Send + Sync {
    /// The connection was upgraded to TLS; `state.tls_info` is set
    fn on_tls_upgrade<'a>(&'a self, state: &'a ConnectionState) -> BoxFuture<'a, Result<()>> {
        let _ = state;
        async { Ok(()) }.boxed()
    }

    /// A valid startup message was read; `state.client_info` is set
    fn on_startup<'a>(&'a self, state: &'a ConnectionState) -> BoxFuture<'a, Result<()>> {
        let _ = state;
        async { Ok(()) }.boxed()
    }

    /// Authentication finished; called after `AuthenticationOk` is sent
    fn on_authenticated<'a>(&'a self, state: &'a ConnectionState) -> BoxFuture<'a, Result<()>> {
        let _ = state;
        async { Ok(()) }.boxed()
    }

    /// Runs before the built-in handling of every client message (tag byte included)
    fn on_message<'a>(
        &'a self,
        message: &'a [u8],
        state: &'a ConnectionState,
    ) -> BoxFuture<'a, Result<MessageAction>> {
        let _ = (message, state);
        async { Ok(MessageAction::Continue) }.boxed()
    }
}

/// What the connection does with a message once `on_message` has seen it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    /// Run the built-in handling
    Continue,
    /// Write these responses instead of the built-in handling
    Respond(Vec<Bytes>),
    /// Stop serving and hand the transport back to the caller of
    /// [`PostgresConnection::run`](crate::PostgresConnection::run)
    Detach,
}

/// Runs simple queries once the client is authenticated
pub trait QueryExecutor: Send + Sync {
    /// Execute `query` and return the encoded backend messages to send.
    ///
    /// The connection appends `ReadyForQuery('I')` itself. An error is reported to the
    /// client as a non-fatal `ERROR` and the connection stays open.
    fn execute<'a>(
        &'a self,
        query: &'a str,
        state: &'a ConnectionState,
    ) -> BoxFuture<'a, Result<Vec<Bytes>>>;
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ConnectionHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let hooks = NoopHooks;
        let state = ConnectionState::default();
        hooks.on_tls_upgrade(&state).await.unwrap();
        hooks.on_startup(&state).await.unwrap();
        hooks.on_authenticated(&state).await.unwrap();
        assert_eq!(
            hooks.on_message(b"Q", &state).await.unwrap(),
            MessageAction::Continue
        );
    }
}
