use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IssuerError>;

#[derive(Error, Debug)]
pub enum IssuerError {
    #[error("Failed to read {what}: {reason}")]
    Read { what: String, reason: String },

    #[error("License {0} already exists")]
    AlreadyExists(String),

    #[error("Failed to delete license {0}")]
    Finalize(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Credit failed: {0}")]
    Credit(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Token already recorded for account {0}")]
    RecordConflict(String),

    #[error("Notification delivery failed: {0}")]
    Notify(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IssuerError {
    pub fn read(what: impl Into<String>, reason: impl ToString) -> Self {
        IssuerError::Read {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<license_sdk::SdkError> for IssuerError {
    fn from(e: license_sdk::SdkError) -> Self {
        match e {
            license_sdk::SdkError::InvalidInput(reason) => IssuerError::InvalidRequest(reason),
            license_sdk::SdkError::Crypto(reason) => IssuerError::Crypto(reason),
            other => IssuerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for IssuerError {
    fn into_response(self) -> Response {
        let status = match &self {
            IssuerError::Read { .. } => StatusCode::NOT_FOUND,
            IssuerError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            IssuerError::RecordConflict(_) | IssuerError::AlreadyExists(_) => StatusCode::CONFLICT,
            IssuerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IssuerError::Finalize(_)
            | IssuerError::Credit(_)
            | IssuerError::Ledger(_)
            | IssuerError::Notify(_)
            | IssuerError::Config(_)
            | IssuerError::Crypto(_)
            | IssuerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
