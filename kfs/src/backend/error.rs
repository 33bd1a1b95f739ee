use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("starting command: {0}")]
    Start(std::io::Error),

    #[error("setting stdout pipe")]
    NoStdout,

    #[error("server not started after 1s")]
    StartTimeout,
}
