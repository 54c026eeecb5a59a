/// Account debt tiers and the cooldown table account throttling reads.
///
/// Once debt is observed for an account, restrictions stay active for the
/// tier's cooldown after the status was last updated. `Large` has no
/// cooldown by default and the table answers `None` for it until an
/// operator sets one with [`DebtThresholds::with_large`].
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SdkError;

pub const DEBT_PREFIX: &str = "debt-";

pub const NORMAL_PRICE: u64 = 0;
/// 3 days
pub const SMALL_BLOCK_WAIT_SECS: u64 = 3 * 24 * 60 * 60;
/// 4 days
pub const MEDIUM_BLOCK_WAIT_SECS: u64 = 4 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebtStatus {
    #[default]
    Normal,
    Small,
    Medium,
    Large,
}

impl DebtStatus {
    pub const ALL: [DebtStatus; 4] = [
        DebtStatus::Normal,
        DebtStatus::Small,
        DebtStatus::Medium,
        DebtStatus::Large,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DebtStatus::Normal => "Normal",
            DebtStatus::Small => "Small",
            DebtStatus::Medium => "Medium",
            DebtStatus::Large => "Large",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.label() == label)
    }
}

impl fmt::Display for DebtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DebtStatus {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| SdkError::InvalidInput(format!("unknown debt status: {}", s)))
    }
}

/// Name of the debt object tracked for a user.
pub fn debt_object_name(user_name: &str) -> String {
    format!("{}{}", DEBT_PREFIX, user_name)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtThresholds {
    pub small: Duration,
    pub medium: Duration,
    pub large: Option<Duration>,
}

impl Default for DebtThresholds {
    fn default() -> Self {
        Self {
            small: Duration::from_secs(SMALL_BLOCK_WAIT_SECS),
            medium: Duration::from_secs(MEDIUM_BLOCK_WAIT_SECS),
            large: None,
        }
    }
}

impl DebtThresholds {
    pub fn with_large(mut self, cooldown: Duration) -> Self {
        self.large = Some(cooldown);
        self
    }

    /// `None` means the tier has no cooldown configured.
    pub fn threshold(&self, status: DebtStatus) -> Option<Duration> {
        match status {
            DebtStatus::Normal => Some(Duration::from_secs(NORMAL_PRICE)),
            DebtStatus::Small => Some(self.small),
            DebtStatus::Medium => Some(self.medium),
            DebtStatus::Large => self.large,
        }
    }

    pub fn threshold_for_label(&self, label: &str) -> Option<Duration> {
        DebtStatus::from_label(label).and_then(|status| self.threshold(status))
    }

    /// `(label, seconds)` rows in tier order, `None` for unconfigured tiers.
    pub fn table(&self) -> Vec<(&'static str, Option<u64>)> {
        DebtStatus::ALL
            .iter()
            .map(|status| (status.label(), self.threshold(*status).map(|d| d.as_secs())))
            .collect()
    }
}

/// Observed debt state for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtRecord {
    pub user_name: String,
    /// Unix seconds of the last status update
    pub last_update_timestamp: i64,
    #[serde(rename = "status")]
    pub account_debt_status: DebtStatus,
}

impl DebtRecord {
    pub fn object_name(&self) -> String {
        debt_object_name(&self.user_name)
    }

    /// Whether debt restrictions still apply at `now` (unix seconds).
    ///
    /// `None` when the tier has no configured cooldown, so the caller
    /// decides what an unconfigured tier means.
    pub fn restriction_active(&self, thresholds: &DebtThresholds, now: i64) -> Option<bool> {
        let cooldown = thresholds.threshold(self.account_debt_status)?;
        if cooldown.is_zero() {
            return Some(false);
        }
        let elapsed = now.saturating_sub(self.last_update_timestamp);
        Some(elapsed < 0 || (elapsed as u64) < cooldown.as_secs())
    }
}
