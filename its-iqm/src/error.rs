use thiserror::Error;

#[derive(Error, Debug)]
pub enum IqmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown central authority type '{0}'")]
    UnknownAuthorityType(String),

    #[error("unsupported neighbour type '{0}' for '{1}', only mqtt is supported")]
    UnsupportedNeighbourType(String, String),

    #[error(transparent)]
    Core(#[from] its_core::CoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IqmError>;
