use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transport error: {0}")]
    Transport(#[from] aquaring_transport::TransportError),

    #[error("config error: {0}")]
    Config(String),
}
