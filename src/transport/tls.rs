//! TLS configuration for outgoing connections.
//!
//! [`TlsConfig`] is the user-facing description; [`TlsConfig::resolve_for`]
//! turns it into the per-destination configuration handed to dialers, and
//! [`TlsConfig::to_client_config`] builds the rustls configuration used by
//! the built-in dialer.
//!
//! # Resolution Rules
//!
//! | Field | Rule |
//! |-------|------|
//! | `next_protos` | `"h2"` prepended when absent, never duplicated |
//! | `server_name` | defaults to the destination host |
//! | everything else | copied verbatim |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{Error, Result};
use crate::protocol::NEXT_PROTO_TLS;

// ============================================================================
// TlsConfig
// ============================================================================

/// TLS settings for dialing destinations.
#[derive(Clone, Default)]
pub struct TlsConfig {
    /// Name to send in SNI and verify the certificate against.
    ///
    /// Defaults to the destination host.
    pub server_name: Option<String>,

    /// ALPN protocols to advertise, in preference order.
    pub next_protos: Vec<String>,

    /// Skip certificate chain and hostname verification.
    pub insecure_skip_verify: bool,

    /// Trust anchors. Defaults to the Mozilla roots from `webpki-roots`.
    pub root_store: Option<Arc<RootCertStore>>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("server_name", &self.server_name)
            .field("next_protos", &self.next_protos)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field(
                "root_store",
                &self.root_store.as_ref().map(|store| store.len()),
            )
            .finish()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TlsConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the SNI / verification name.
    #[inline]
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Sets the advertised ALPN protocols.
    #[must_use]
    pub fn with_next_protos<I, S>(mut self, protos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_protos = protos.into_iter().map(Into::into).collect();
        self
    }

    /// Disables certificate verification.
    #[inline]
    #[must_use]
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    /// Sets custom trust anchors.
    #[inline]
    #[must_use]
    pub fn with_root_store(mut self, store: RootCertStore) -> Self {
        self.root_store = Some(Arc::new(store));
        self
    }
}

// ============================================================================
// Resolution
// ============================================================================

impl TlsConfig {
    /// Derives the configuration used to dial `host`.
    #[must_use]
    pub fn resolve_for(&self, host: &str) -> Self {
        let mut resolved = self.clone();

        if !resolved.next_protos.iter().any(|p| p == NEXT_PROTO_TLS) {
            resolved.next_protos.insert(0, NEXT_PROTO_TLS.to_string());
        }

        if resolved.server_name.as_deref().is_none_or(str::is_empty) {
            resolved.server_name = Some(host.to_string());
        }

        resolved
    }

    /// Returns the server name as a rustls [`ServerName`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the name is missing or not a valid DNS name
    /// or IP address.
    pub fn handshake_name(&self) -> Result<ServerName<'static>> {
        let name = self
            .server_name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::tls("server name is not set"))?;

        ServerName::try_from(name).map_err(|e| Error::tls(format!("invalid server name: {e}")))
    }

    /// Builds the rustls client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if the protocol versions cannot be configured.
    pub fn to_client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(e.to_string()))?;

        let mut config = if self.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth()
        } else {
            let roots = match &self.root_store {
                Some(store) => (**store).clone(),
                None => {
                    let mut store = RootCertStore::empty();
                    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    store
                }
            };
            builder
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        config.alpn_protocols = self
            .next_protos
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect();

        Ok(Arc::new(config))
    }
}

// ============================================================================
// AcceptAnyServerCert
// ============================================================================

/// Verifier used when `insecure_skip_verify` is set.
///
/// Handshake signatures are still checked so the session keys are bound to
/// the presented certificate.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ============================================================================
// Tests
// ============================================================================
