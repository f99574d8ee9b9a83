use thiserror::Error;

/// Errors that can stop conntrail from starting or running
#[derive(Error, Debug)]
pub enum ConntrailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Packet capture support not compiled in (rebuild with the `capture` feature)")]
    CaptureUnavailable,
}

pub type Result<T> = std::result::Result<T, ConntrailError>;
