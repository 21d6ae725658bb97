//! Authenticators and per-call credential attachment.
//!
//! An [`Authenticator`] is shared by reference between the routing client
//! and every connection it dials. The credential payload inside it sits
//! behind a single swappable `Arc`, so rotating credentials is one reference
//! replace that in-flight and future calls observe without reconnecting.

use crate::error::{RoutingError, RoutingResult};
use crate::rpc::CallMetadata;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Kind of an authenticator. Credentials can only be swapped within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorKind {
    /// Username and password sent as a `Basic` authorization header.
    Basic,
    /// TLS client certificate presented during the handshake.
    Certificate,
}

impl std::fmt::Display for AuthenticatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthenticatorKind::Basic => write!(f, "basic"),
            AuthenticatorKind::Certificate => write!(f, "certificate"),
        }
    }
}

/// Basic-auth credentials, stored pre-encoded.
#[derive(Debug)]
pub struct BasicAuthenticator {
    encoded: RwLock<Arc<str>>,
}

impl BasicAuthenticator {
    /// Create basic credentials from a username and password.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            encoded: RwLock::new(encode_basic(username, password)),
        }
    }

    /// Replace the username and password.
    pub fn update_credentials(&self, username: &str, password: &str) {
        *self.encoded.write() = encode_basic(username, password);
    }

    /// The base64 `user:password` payload currently in effect.
    pub fn encoded(&self) -> Arc<str> {
        Arc::clone(&self.encoded.read())
    }

    /// The full `authorization` header value currently in effect.
    pub fn header_value(&self) -> String {
        format!("Basic {}", self.encoded())
    }

    fn store(&self, encoded: Arc<str>) {
        *self.encoded.write() = encoded;
    }
}

fn encode_basic(username: &str, password: &str) -> Arc<str> {
    Arc::from(STANDARD.encode(format!("{}:{}", username, password)))
}

/// A DER encoded client certificate chain and its private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    /// Certificate chain, leaf first.
    pub certificate_chain: Vec<Vec<u8>>,
    /// Private key of the leaf certificate.
    pub private_key: Vec<u8>,
}

impl ClientCertificate {
    /// Create a client certificate.
    pub fn new(certificate_chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        Self {
            certificate_chain,
            private_key,
        }
    }
}

/// Client-certificate credentials.
///
/// A TLS dialer reads [`client_certificate`](Self::client_certificate) when
/// the server requests a certificate during the handshake.
#[derive(Debug)]
pub struct CertificateAuthenticator {
    certificate: RwLock<Arc<ClientCertificate>>,
}

impl CertificateAuthenticator {
    /// Create certificate credentials.
    pub fn new(certificate: ClientCertificate) -> Self {
        Self {
            certificate: RwLock::new(Arc::new(certificate)),
        }
    }

    /// The certificate currently in effect.
    pub fn client_certificate(&self) -> Arc<ClientCertificate> {
        Arc::clone(&self.certificate.read())
    }

    /// Replace the certificate.
    pub fn update_certificate(&self, certificate: ClientCertificate) {
        self.store(Arc::new(certificate));
    }

    fn store(&self, certificate: Arc<ClientCertificate>) {
        *self.certificate.write() = certificate;
    }
}

/// Credentials attached to every call made through the routing client.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// Basic authentication.
    Basic(Arc<BasicAuthenticator>),
    /// Client certificate authentication.
    Certificate(Arc<CertificateAuthenticator>),
}

impl Authenticator {
    /// Basic authenticator from a username and password.
    pub fn basic(username: &str, password: &str) -> Self {
        Authenticator::Basic(Arc::new(BasicAuthenticator::new(username, password)))
    }

    /// Certificate authenticator.
    pub fn certificate(certificate: ClientCertificate) -> Self {
        Authenticator::Certificate(Arc::new(CertificateAuthenticator::new(certificate)))
    }

    /// The authenticator's kind.
    pub fn kind(&self) -> AuthenticatorKind {
        match self {
            Authenticator::Basic(_) => AuthenticatorKind::Basic,
            Authenticator::Certificate(_) => AuthenticatorKind::Certificate,
        }
    }

    /// Metadata to attach to an outgoing call.
    ///
    /// Certificate credentials travel in the handshake, so they add nothing
    /// per call.
    pub fn call_metadata(&self) -> CallMetadata {
        match self {
            Authenticator::Basic(basic) => CallMetadata {
                authorization: Some(basic.header_value()),
            },
            Authenticator::Certificate(_) => CallMetadata::default(),
        }
    }

    /// Copy the credential payload of `other` into this authenticator.
    ///
    /// Everything sharing this authenticator sees the new payload on its next
    /// read.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::AuthenticatorMismatch`] if the kinds differ;
    /// the current payload is left untouched.
    pub fn replace_from(&self, other: &Authenticator) -> RoutingResult<()> {
        match (self, other) {
            (Authenticator::Basic(current), Authenticator::Basic(new)) => {
                current.store(new.encoded());
                debug!("Replaced basic credentials");
                Ok(())
            }
            (Authenticator::Certificate(current), Authenticator::Certificate(new)) => {
                current.store(new.client_certificate());
                debug!("Replaced client certificate");
                Ok(())
            }
            _ => Err(RoutingError::AuthenticatorMismatch {
                current: self.kind(),
                requested: other.kind(),
            }),
        }
    }
}
