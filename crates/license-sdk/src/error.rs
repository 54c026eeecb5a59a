use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(#[from] authority_net::NetError),

    #[error("Issuer error: {0}")]
    Issuer(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
