//! Transport abstraction (plain socket vs server-side TLS)

use super::state::TlsInfo;
use super::tls::{ClientCertCheck, TlsProvider};
use crate::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::sync::Arc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tracing::warn;

/// Client connection, before or after the TLS upgrade
pub enum Transport<S> {
    /// Unencrypted stream
    Plain(S),
    /// TLS-encrypted stream
    Tls(Box<TlsStream<S>>),
}

impl<S> std::fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
        }
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Whether the transport has been upgraded to TLS
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write bytes to the transport
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the transport
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    /// Run the server side of a TLS handshake over a plain transport.
    ///
    /// The ClientHello is read first so the SNI name can select the TLS options. A client
    /// certificate is requested only when `request_client_cert` is set; an untrusted one
    /// does not fail the handshake but is reported in `TlsInfo::client_certificate_error`.
    pub async fn upgrade_to_tls(
        self,
        provider: &TlsProvider,
        request_client_cert: bool,
    ) -> Result<(Self, TlsInfo)> {
        let stream = match self {
            Transport::Plain(stream) => stream,
            Transport::Tls(_) => {
                return Err(Error::Protocol("transport is already TLS-encrypted".into()))
            }
        };

        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

        let mut info = TlsInfo {
            sni_server_name: start.client_hello().server_name().map(str::to_string),
            ..TlsInfo::default()
        };

        let options = provider.resolve(&info).await?;
        let check = request_client_cert.then(|| Arc::new(ClientCertCheck::default()));
        let config = options.server_config(check.clone())?;
        let tls_stream = start
            .into_stream(config)
            .await
            .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

        let (_io, conn) = tls_stream.get_ref();
        info.client_certificate = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .cloned();
        if let Some(reason) = check.as_deref().and_then(ClientCertCheck::rejection) {
            if info.client_certificate.is_some() {
                warn!(error = reason, "client certificate not trusted");
                info.client_certificate_error = Some(reason.to_string());
            }
        }

        Ok((Transport::Tls(Box::new(tls_stream)), info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = Transport::Plain(client);
        let mut server = Transport::Plain(server);

        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = BytesMut::new();
        let n = server.read_buf(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(!server.is_tls());
    }

    #[tokio::test]
    async fn test_read_after_peer_shutdown_is_eof() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = Transport::Plain(client);
        let mut server = Transport::Plain(server);

        client.shutdown().await.unwrap();
        drop(client);
        let mut buf = BytesMut::new();
        assert_eq!(server.read_buf(&mut buf).await.unwrap(), 0);
    }

    #[test]
    fn test_debug() {
        let (a, _b) = tokio::io::duplex(8);
        assert_eq!(format!("{:?}", Transport::Plain(a)), "Transport::Plain");
    }
}
