/// Outcome notices addressed to the namespace that raised a license.
///
/// Delivery is best-effort: [`NotificationEmitter::emit`] logs failures and
/// timeouts and never returns them.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use license_sdk::RedemptionOutcome;

use crate::error::{IssuerError, Result};

pub const LICENSE_NOTICE_TITLE: &str = "License Notice";
pub const NOTICE_FROM: &str = "license-issuer";

pub const VALID_LICENSE_MESSAGE: &str = "License redeemed successfully.";
pub const DUPLICATE_LICENSE_MESSAGE: &str =
    "This license has already been redeemed and cannot be used again.";
pub const INVALID_LICENSE_MESSAGE: &str =
    "This license is invalid. Please check the license and contact support if the problem persists.";
pub const AUTHORITY_UNAVAILABLE_MESSAGE: &str =
    "The license authority could not be reached. Please submit the license again later.";
pub const RECHARGE_FAILED_MESSAGE: &str =
    "The license is valid but the account could not be credited. The license has not been used; please submit it again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub from: String,
    pub message: String,
    pub outcome: RedemptionOutcome,
}

/// User-facing message for each outcome.
pub fn outcome_message(outcome: RedemptionOutcome) -> &'static str {
    match outcome {
        RedemptionOutcome::Redeemed => VALID_LICENSE_MESSAGE,
        RedemptionOutcome::Duplicate => DUPLICATE_LICENSE_MESSAGE,
        RedemptionOutcome::Invalid => INVALID_LICENSE_MESSAGE,
        RedemptionOutcome::AuthorityUnavailable => AUTHORITY_UNAVAILABLE_MESSAGE,
        RedemptionOutcome::CreditFailed => RECHARGE_FAILED_MESSAGE,
    }
}

impl Notice {
    pub fn for_outcome(outcome: RedemptionOutcome) -> Self {
        Self {
            level: NoticeLevel::High,
            title: LICENSE_NOTICE_TITLE.to_string(),
            from: NOTICE_FROM.to_string(),
            message: outcome_message(outcome).to_string(),
            outcome,
        }
    }
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, notice: &Notice, receivers: &[String]) -> Result<()>;
}

/// Writes notices to the log.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn deliver(&self, notice: &Notice, receivers: &[String]) -> Result<()> {
        info!(
            level = ?notice.level,
            outcome = %notice.outcome,
            receivers = ?receivers,
            "[{}] {}",
            notice.title,
            notice.message
        );
        Ok(())
    }
}

/// Keeps delivered notices in memory.
#[derive(Default)]
pub struct MemoryTransport {
    delivered: RwLock<Vec<(Notice, Vec<String>)>>,
    failing: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            delivered: RwLock::new(Vec::new()),
            failing: true,
        }
    }

    pub async fn delivered(&self) -> Vec<(Notice, Vec<String>)> {
        self.delivered.read().await.clone()
    }
}

#[async_trait]
impl NotificationTransport for MemoryTransport {
    async fn deliver(&self, notice: &Notice, receivers: &[String]) -> Result<()> {
        if self.failing {
            return Err(IssuerError::Notify("transport unavailable".into()));
        }
        self.delivered
            .write()
            .await
            .push((notice.clone(), receivers.to_vec()));
        Ok(())
    }
}

pub struct NotificationEmitter {
    transport: Arc<dyn NotificationTransport>,
    timeout: Duration,
}

impl NotificationEmitter {
    pub fn new(transport: Arc<dyn NotificationTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Sends the outcome notice to `namespace`. Returns whether it was delivered.
    pub async fn emit(&self, outcome: RedemptionOutcome, namespace: &str) -> bool {
        let notice = Notice::for_outcome(outcome);
        let receivers = vec![namespace.to_string()];

        match tokio::time::timeout(self.timeout, self.transport.deliver(&notice, &receivers)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(namespace, outcome = %outcome, "Failed to deliver notice: {}", e);
                false
            }
            Err(_) => {
                warn!(namespace, outcome = %outcome, "Notice delivery timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
