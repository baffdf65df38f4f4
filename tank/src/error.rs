use thiserror::Error;

#[derive(Debug, Error)]
pub enum TankError {
    #[error("transport error: {0}")]
    Transport(#[from] aquaring_transport::TransportError),

    #[error("config error: {0}")]
    Config(String),
}
