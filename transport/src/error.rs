use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("frame decoding failed: {0}")]
    Decode(String),

    #[error("transport closed")]
    Closed,

    #[error("decryption failed: authentication check failed")]
    Decrypt,
}
