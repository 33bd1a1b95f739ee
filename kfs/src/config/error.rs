use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no TLS certificate file specified in configuration")]
    MissingTlsCert,

    #[error("no TLS key file specified in configuration")]
    MissingTlsKey,

    #[error("empty route definition: \"{0}\" -> \"{1}\"")]
    EmptyRoute(String, String),

    #[error("cannot determine hostname: {0}")]
    Hostname(#[from] nix::errno::Errno),
}
