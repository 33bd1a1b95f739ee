//! GSSAPI-specific error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for GSSAPI operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("keytab file not found: {0}")]
    KeytabNotFound(PathBuf),

    #[error("invalid principal: {0}")]
    InvalidPrincipal(String),

    #[error("failed to acquire credentials: {0}")]
    CredentialAcquisitionFailed(String),

    #[error("GSSAPI context error: {0}")]
    Context(String),

    #[error("password authentication failed for {0}")]
    PasswordAuth(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("no credential")]
    NoCredential,

    #[error("GSSAPI support not compiled in")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "gssapi")]
impl From<libgssapi::error::Error> for Error {
    fn from(err: libgssapi::error::Error) -> Self {
        Self::Context(err.to_string())
    }
}
