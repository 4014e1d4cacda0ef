//! TCP accept loop

use crate::config::GatewayConfig;
use crate::connection::PostgresConnection;
use crate::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Accept connections forever, serving each on its own task.
///
/// Per-connection failures are logged and never end the loop; only an error from
/// `accept` itself is returned. A connection detached by `on_message` is closed here;
/// applications that take over sockets drive [`PostgresConnection::run`] themselves.
pub async fn serve(listener: TcpListener, config: Arc<GatewayConfig>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        crate::metrics::counters::connection_accepted();

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let conn = PostgresConnection::new(stream, Arc::clone(&config));
        tokio::spawn(
            async move {
                tracing::debug!("connection accepted");
                match conn.run().await {
                    Ok(Some(mut detached)) => {
                        tracing::debug!("detached connection has no owner, closing");
                        let _ = detached.transport.shutdown().await;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "connection rejected"),
                }
            }
            .instrument(tracing::info_span!("connection", %peer)),
        );
    }
}
