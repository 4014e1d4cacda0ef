//! TLS material and server configuration.
//!
//! The gateway terminates TLS itself after answering an `SSLRequest` with `S`. Key
//! material comes from a [`TlsProvider`]: either fixed [`TlsOptions`] or a callback that
//! picks options per connection from the ClientHello's SNI name.

use super::state::TlsInfo;
use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Server certificate chain, private key and optional client CA roots
pub struct TlsOptions {
    /// Server certificate chain, leaf first
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key for the leaf certificate
    pub key: PrivateKeyDer<'static>,
    /// CA roots trusted for client certificates (None = platform roots)
    pub ca: Option<Vec<CertificateDer<'static>>>,
}

impl Clone for TlsOptions {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
            ca: self.ca.clone(),
        }
    }
}

impl std::fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsOptions")
            .field("cert_chain", &self.cert_chain.len())
            .field("key", &"<PrivateKeyDer>")
            .field("ca", &self.ca.as_ref().map(Vec::len))
            .finish()
    }
}

impl TlsOptions {
    /// Use DER material directly
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            key,
            ca: None,
        }
    }

    /// Trust these roots for client certificates instead of the platform store
    pub fn with_ca(mut self, ca: Vec<CertificateDer<'static>>) -> Self {
        self.ca = Some(ca);
        self
    }

    /// Parse PEM-encoded certificate chain, private key and optional CA bundle.
    ///
    /// Encrypted (passphrase-protected) keys are not supported.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], ca_pem: Option<&[u8]>) -> Result<Self> {
        let cert_chain = parse_certs(cert_pem, "certificate")?;
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?
            .ok_or_else(|| {
                Error::Config(
                    "No private key found (encrypted keys are not supported)".to_string(),
                )
            })?;
        let ca = ca_pem.map(|pem| parse_certs(pem, "CA certificate")).transpose()?;

        Ok(Self {
            cert_chain,
            key,
            ca,
        })
    }

    /// Load PEM files from disk
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        ca_path: Option<&Path>,
    ) -> Result<Self> {
        let cert_pem = read_file(cert_path.as_ref(), "certificate")?;
        let key_pem = read_file(key_path.as_ref(), "private key")?;
        let ca_pem = ca_path
            .map(|path| read_file(path, "CA certificate"))
            .transpose()?;
        Self::from_pem(&cert_pem, &key_pem, ca_pem.as_deref())
    }

    /// Build the rustls server configuration.
    ///
    /// With `client_cert` the handshake asks for a client certificate and checks any
    /// that is presented against the CA roots. Neither a missing nor an untrusted
    /// certificate fails the handshake: the verdict is recorded in `client_cert` so the
    /// certificate auth flow can reject the client with a proper error.
    pub fn server_config(
        &self,
        client_cert: Option<Arc<ClientCertCheck>>,
    ) -> Result<Arc<ServerConfig>> {
        let builder = ServerConfig::builder();
        let builder = match client_cert {
            Some(check) => {
                let roots = Arc::new(self.root_store()?);
                let inner = WebPkiClientVerifier::builder(roots)
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| Error::Tls(format!("client verifier error: {}", e)))?;
                builder.with_client_cert_verifier(Arc::new(RecordingVerifier { inner, check }))
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(|e| Error::Tls(format!("TLS configuration error: {}", e)))?;
        Ok(Arc::new(config))
    }

    fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        match &self.ca {
            Some(ca) => {
                let (added, _ignored) = store.add_parsable_certificates(ca.iter().cloned());
                if added == 0 {
                    return Err(Error::Config("No valid CA certificates provided".to_string()));
                }
            }
            None => {
                // Use system root certificates via rustls-native-certs
                let result = rustls_native_certs::load_native_certs();
                if !result.errors.is_empty() {
                    warn!(errors = result.errors.len(), "some system root certificates failed to load");
                }
                store.add_parsable_certificates(result.certs);
                if store.is_empty() {
                    return Err(Error::Config(
                        "Failed to load any system root certificates".to_string(),
                    ));
                }
            }
        }
        Ok(store)
    }
}

/// Outcome of checking one handshake's client certificate chain
#[derive(Debug, Default)]
pub struct ClientCertCheck {
    rejected: OnceLock<String>,
}

impl ClientCertCheck {
    /// Why the presented chain was not trusted, if it wasn't
    pub fn rejection(&self) -> Option<&str> {
        self.rejected.get().map(String::as_str)
    }

    fn reject(&self, reason: String) {
        let _ = self.rejected.set(reason);
    }
}

/// Runs the WebPKI chain check but records a failure instead of aborting the handshake.
///
/// Handshake signatures are still verified, so a client can't present a certificate
/// whose key it doesn't hold.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    check: Arc<ClientCertCheck>,
}

impl ClientCertVerifier for RecordingVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        if let Err(e) = self.inner.verify_client_cert(end_entity, intermediates, now) {
            self.check.reject(e.to_string());
        }
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read {} file '{}': {}",
            what,
            path.display(),
            e
        ))
    })
}

fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(Error::Config(format!("No valid {} found", what)));
    }
    Ok(certs)
}

/// Async per-connection TLS options lookup, given the SNI name
pub type TlsOptionsCallback =
    Arc<dyn Fn(TlsInfo) -> BoxFuture<'static, Result<TlsOptions>> + Send + Sync>;

/// Source of TLS options for a handshake
#[derive(Clone)]
pub enum TlsProvider {
    /// Same options for every connection
    Static(TlsOptions),
    /// Options chosen per connection from the ClientHello
    Sni(TlsOptionsCallback),
}

impl TlsProvider {
    /// Choose options with a callback that sees the SNI server name
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(TlsInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TlsOptions>> + Send + 'static,
    {
        TlsProvider::Sni(Arc::new(move |info| f(info).boxed()))
    }

    /// Options for a handshake whose ClientHello produced `info`
    pub async fn resolve(&self, info: &TlsInfo) -> Result<TlsOptions> {
        match self {
            TlsProvider::Static(options) => Ok(options.clone()),
            TlsProvider::Sni(callback) => callback(info.clone()).await,
        }
    }
}

impl From<TlsOptions> for TlsProvider {
    fn from(options: TlsOptions) -> Self {
        TlsProvider::Static(options)
    }
}

impl std::fmt::Debug for TlsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsProvider::Static(options) => f.debug_tuple("Static").field(options).finish(),
            TlsProvider::Sni(_) => f.write_str("Sni(<callback>)"),
        }
    }
}
