/// License objects and the wire types exchanged with the issuer service.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::debt::DebtStatus;
use crate::error::{Result, SdkError};

/// Namespaced identity of a declarative object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One-shot redemption command. Deleted at the end of every reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub key: ObjectKey,
    /// Account the credit is applied to
    pub uid: String,
    /// Opaque redemption credential
    pub token: String,
}

impl License {
    pub fn new(key: ObjectKey, uid: &str, token: &str) -> Result<Self> {
        let license = Self {
            key,
            uid: uid.trim().to_string(),
            token: token.trim().to_string(),
        };
        license.validate()?;
        Ok(license)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.namespace.is_empty() || self.key.name.is_empty() {
            return Err(SdkError::InvalidInput("namespace and name are required".into()));
        }
        if self.uid.is_empty() {
            return Err(SdkError::InvalidInput("uid is required".into()));
        }
        if self.token.is_empty() {
            return Err(SdkError::InvalidInput("token is required".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitLicenseRequest {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub token: String,
}

impl SubmitLicenseRequest {
    pub fn into_license(self) -> Result<License> {
        License::new(ObjectKey::new(self.namespace, self.name), &self.uid, &self.token)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionOutcome {
    Redeemed,
    Duplicate,
    Invalid,
    AuthorityUnavailable,
    CreditFailed,
}

impl RedemptionOutcome {
    /// Whether resubmitting the same token may succeed. Nothing is written to
    /// the ledger for these outcomes, so the token was not consumed.
    pub fn retry_advised(&self) -> bool {
        matches!(
            self,
            RedemptionOutcome::CreditFailed | RedemptionOutcome::AuthorityUnavailable
        )
    }
}

impl fmt::Display for RedemptionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RedemptionOutcome::Redeemed => "redeemed",
            RedemptionOutcome::Duplicate => "duplicate",
            RedemptionOutcome::Invalid => "invalid",
            RedemptionOutcome::AuthorityUnavailable => "authority-unavailable",
            RedemptionOutcome::CreditFailed => "credit-failed",
        };
        f.write_str(label)
    }
}

/// Result of a single reconciliation attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedemptionReport {
    pub key: ObjectKey,
    pub uid: String,
    pub outcome: RedemptionOutcome,
    /// Amount applied to the balance, if any
    pub credited: Option<i64>,
    /// User-facing message sent with the notification
    pub message: String,
    pub deleted: bool,
    /// States visited, in order
    pub trail: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountView {
    pub uid: String,
    pub balance: i64,
    pub debt_status: DebtStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NetworkModeRequest {
    pub external: bool,
}
