//! Socket handling for a session: plaintext or TLS streams behind one type,
//! and the TLS upgrade used for both implicit TLS and STARTTLS.

use std::sync::Arc;

use async_trait::async_trait;
use courier_common::tracing;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName},
};

use crate::{
    endpoint::Endpoint,
    error::{ClientError, Result},
    response::{ReplyReader, Response},
};

/// Anything a session can speak SMTP over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Wraps an established stream in TLS.
#[async_trait]
pub trait TlsUpgrade: Send + Sync {
    /// Perform the client handshake for `domain` over `stream`.
    async fn upgrade(&self, stream: BoxedStream, domain: &str) -> Result<BoxedStream>;
}

/// [`TlsUpgrade`] backed by rustls and the platform trust store.
#[derive(Clone)]
pub struct RustlsUpgrade {
    connector: TlsConnector,
}

impl RustlsUpgrade {
    /// Build a connector trusting the system certificates.
    ///
    /// With `accept_invalid_certs` every server certificate is accepted. Only
    /// use that against test servers with self-signed certificates.
    ///
    /// # Errors
    ///
    /// Returns an error if a system certificate cannot be added to the store.
    pub fn new(accept_invalid_certs: bool) -> Result<Self> {
        let mut root_store = RootCertStore::empty();

        let certs = rustls_native_certs::load_native_certs();
        for cert in certs.certs {
            root_store
                .add(cert)
                .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
        }
        if !certs.errors.is_empty() {
            tracing::warn!(?certs.errors, "Some certificates could not be loaded");
        }

        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::TlsError(format!("Unsupported TLS configuration: {e}")))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if accept_invalid_certs {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate validation is disabled for this connector"
            );
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl TlsUpgrade for RustlsUpgrade {
    async fn upgrade(&self, stream: BoxedStream, domain: &str) -> Result<BoxedStream> {
        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Box::new(tls_stream))
    }
}

/// A certificate verifier that accepts all certificates (for testing only).
#[derive(Debug)]
struct NoVerifier;

impl tokio_rustls::rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[tokio_rustls::rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::ServerCertVerified,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tokio_rustls::rustls::pki_types::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> std::result::Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        vec![
            tokio_rustls::rustls::SignatureScheme::RSA_PKCS1_SHA256,
            tokio_rustls::rustls::SignatureScheme::RSA_PSS_SHA256,
            tokio_rustls::rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            tokio_rustls::rustls::SignatureScheme::ED25519,
        ]
    }
}

/// One open socket plus the reply reader buffering it.
pub struct Connection {
    stream: BoxedStream,
    reader: ReplyReader,
    secure: bool,
}

impl Connection {
    /// Wrap an already-established stream. `secure` records whether the
    /// stream is encrypted.
    #[must_use]
    pub fn new(stream: BoxedStream, secure: bool) -> Self {
        Self {
            stream,
            reader: ReplyReader::new(),
            secure,
        }
    }

    /// Open a TCP socket to `endpoint`, wrapping it in TLS straight away for
    /// implicit-TLS endpoints.
    ///
    /// The caller bounds this with the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Connect` if the socket cannot be opened, or a TLS
    /// error if the implicit handshake fails or no upgrader was supplied.
    pub async fn open(endpoint: &Endpoint, tls: Option<&dyn TlsUpgrade>) -> Result<Self> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|source| ClientError::Connect {
                address: endpoint.address(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        let connection = Self::new(Box::new(stream), false);
        if endpoint.uses_implicit_tls() {
            let tls = tls.ok_or_else(|| {
                ClientError::TlsError(format!(
                    "{} requires implicit TLS but no TLS connector is configured",
                    endpoint.address()
                ))
            })?;
            connection.upgrade(tls, endpoint.host()).await
        } else {
            Ok(connection)
        }
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Sends data over the connection.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Sends a single command line, appending CRLF.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send(&data).await
    }

    /// Reads one complete (possibly multi-line) reply.
    pub async fn read_response(&mut self) -> Result<Response> {
        self.reader.read(&mut self.stream).await
    }

    /// Upgrades the connection to TLS.
    ///
    /// Any reply bytes already buffered arrived in plaintext after the point
    /// where the server should have stopped talking, so they are refused.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is already secure, plaintext bytes
    /// are pending, or the handshake fails.
    pub async fn upgrade(self, tls: &dyn TlsUpgrade, domain: &str) -> Result<Self> {
        if self.secure {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        }
        if self.reader.has_buffered() {
            return Err(ClientError::TlsError(
                "Server sent data before the TLS handshake".to_string(),
            ));
        }

        let stream = tls.upgrade(self.stream, domain).await?;
        Ok(Self::new(stream, true))
    }

    /// Flush and shut the write half. Errors are ignored; the socket is
    /// released when the connection is dropped.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
