use thiserror::Error;

/// Errors surfaced by the core ITS messaging fabric components.
///
/// Transport and remote errors are absorbed by the adapter layer and never
/// reach this enum in normal operation; it exists for the configuration
/// and validation failures that must abort the caller synchronously.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid quadkey digit(s) '{0}'")]
    InvalidQuadKeyDigits(String),

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside (-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("heading {0} outside [0, 360)")]
    HeadingOutOfRange(f64),

    #[error("subcause {subcause:?} does not belong to cause {cause:?}")]
    SubCauseMismatch { cause: String, subcause: String },

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("malformed ETSI message: {0}")]
    MalformedMessage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::v5::ClientError),

    #[error("authority source error: {0}")]
    Authority(String),

    #[error("filter configuration error: {0}")]
    FilterConfig(String),

    #[error("bootstrap handshake error: {0}")]
    Bootstrap(String),

    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
