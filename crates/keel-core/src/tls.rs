//! TLS material for server listeners.
//!
//! Certificates and keys are carried as PEM bytes and only parsed when the
//! server is constructed. Parsing failures surface as
//! [`ConfigurationError::InvalidTls`] before any socket is opened.

use crate::error::{ConfigurationError, ConfigurationResult};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Application protocol advertised during the TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alpn {
    /// `http/1.1`
    Http1,
    /// `h2`, required by gRPC clients.
    Http2,
}

impl Alpn {
    fn protocols(self) -> Vec<Vec<u8>> {
        match self {
            Self::Http1 => vec![b"http/1.1".to_vec()],
            Self::Http2 => vec![b"h2".to_vec()],
        }
    }
}

/// PEM encoded certificate chain and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    cert_chain_pem: Vec<u8>,
    private_key_pem: Vec<u8>,
}

impl TlsMaterial {
    /// Creates TLS material from in-memory PEM data.
    #[must_use]
    pub fn from_pem(cert_chain_pem: impl Into<Vec<u8>>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_chain_pem: cert_chain_pem.into(),
            private_key_pem: private_key_pem.into(),
        }
    }

    /// Reads TLS material from a certificate chain file and a key file.
    pub fn from_files(cert_chain: impl AsRef<Path>, private_key: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            cert_chain_pem: std::fs::read(cert_chain)?,
            private_key_pem: std::fs::read(private_key)?,
        })
    }

    /// Checks that the chain holds at least one certificate and that a
    /// private key can be decoded.
    pub fn validate(&self) -> ConfigurationResult<()> {
        self.decode().map(|_| ())
    }

    /// Builds a rustls server configuration advertising `alpn`.
    pub fn server_config(&self, alpn: Alpn) -> ConfigurationResult<Arc<rustls::ServerConfig>> {
        let (certs, key) = self.decode()?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigurationError::InvalidTls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigurationError::InvalidTls(e.to_string()))?;
        config.alpn_protocols = alpn.protocols();

        Ok(Arc::new(config))
    }

    fn decode(&self) -> ConfigurationResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let certs = rustls_pemfile::certs(&mut self.cert_chain_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigurationError::InvalidTls(format!("certificate chain: {e}")))?;
        if certs.is_empty() {
            return Err(ConfigurationError::InvalidTls(
                "no certificate found in chain".to_string(),
            ));
        }

        let key = rustls_pemfile::private_key(&mut self.private_key_pem.as_slice())
            .map_err(|e| ConfigurationError::InvalidTls(format!("private key: {e}")))?
            .ok_or_else(|| ConfigurationError::InvalidTls("no private key found".to_string()))?;

        Ok((certs, key))
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_chain_pem", &format_args!("{} bytes", self.cert_chain_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> TlsMaterial {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        TlsMaterial::from_pem(cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn test_valid_material() {
        let material = self_signed();
        assert!(material.validate().is_ok());
    }

    #[test]
    fn test_server_config_sets_alpn() {
        let material = self_signed();

        let h2 = material.server_config(Alpn::Http2).unwrap();
        assert_eq!(h2.alpn_protocols, vec![b"h2".to_vec()]);

        let h1 = material.server_config(Alpn::Http1).unwrap();
        assert_eq!(h1.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_garbage_certificate_rejected() {
        let material = TlsMaterial::from_pem("not a certificate", self_signed().private_key_pem);
        let err = material.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidTls(_)));
        assert!(err.to_string().contains("no certificate"));
    }

    #[test]
    fn test_missing_key_rejected() {
        let material = TlsMaterial::from_pem(self_signed().cert_chain_pem, "");
        let err = material.validate().unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", self_signed());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
