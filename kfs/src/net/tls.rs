//! TLS configuration.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::{
    self,
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
};
use tokio_rustls::TlsAcceptor;
use tracing::info;

#[derive(Debug, Error)]
pub enum Error {
    #[error("TLS material: {0}")]
    Pem(#[from] rustls::pki_types::pem::Error),

    #[error("TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Create a TLS acceptor from the certificate chain and key.
///
/// Both files are mandatory; the gateway refuses to serve plaintext.
pub fn load_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor, Error> {
    let certs = CertificateDer::pem_file_iter(cert)?.collect::<Result<Vec<_>, _>>()?;
    let key = PrivateKeyDer::from_pem_file(key)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    info!("TLS on");

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_files() {
        let result = load_acceptor(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"));
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_pem() {
        let mut cert = NamedTempFile::new().unwrap();
        let mut key = NamedTempFile::new().unwrap();
        cert.write_all(b"not a certificate").unwrap();
        key.write_all(b"not a key").unwrap();

        let result = load_acceptor(cert.path(), key.path());
        assert!(result.is_err());
    }
}
