use thiserror::Error;

use super::gssapi;

#[derive(Debug, Error)]
pub enum Error {
    #[error("GSSAPI: {0}")]
    Gssapi(#[from] gssapi::Error),

    #[error("user {0} didn't delegate us their credentials")]
    NoDelegation(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("user lookup failed: {0}")]
    Lookup(nix::errno::Errno),

    #[error("chown: {0}")]
    Chown(nix::errno::Errno),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
