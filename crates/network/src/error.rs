use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl NetError {
    /// Timeouts, refused connections and 5xx responses: the remote side may
    /// answer later.
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Timeout(_) | NetError::Connection(_) => true,
            NetError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetError::Timeout(e.to_string())
        } else if e.is_connect() {
            NetError::Connection(e.to_string())
        } else if e.is_decode() {
            NetError::Decode(e.to_string())
        } else {
            NetError::Http(e.to_string())
        }
    }
}
