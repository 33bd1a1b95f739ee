use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend request: {0}")]
    Http(#[from] hyper::Error),

    #[error("backend URI: {0}")]
    Uri(#[from] hyper::http::uri::InvalidUri),

    #[error("host header: {0}")]
    HostHeader(#[from] hyper::header::InvalidHeaderValue),
}
