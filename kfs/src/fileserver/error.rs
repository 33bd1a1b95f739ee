use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidRoute(String),

    #[error("invalid argument: {0}: {1}")]
    InvalidExport(String, std::io::Error),

    #[error("no export file-system specified")]
    NoRoutes,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
