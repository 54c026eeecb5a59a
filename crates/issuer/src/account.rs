/// Tenant accounts and the credit applier.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use license_sdk::{AccountView, DebtStatus, LicensePayload};

use crate::error::{IssuerError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uid: String,
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub debt_status: DebtStatus,
}

impl Account {
    pub fn new(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            balance: 0,
            debt_status: DebtStatus::Normal,
        }
    }

    pub fn view(&self) -> AccountView {
        AccountView {
            uid: self.uid.clone(),
            balance: self.balance,
            debt_status: self.debt_status,
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, uid: &str) -> Result<Account>;

    /// Adds `amount` to the balance and returns the new balance.
    async fn credit(&self, uid: &str, amount: i64) -> Result<i64>;

    async fn set_debt_status(&self, uid: &str, status: DebtStatus) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let map = accounts
            .into_iter()
            .map(|account| (account.uid.clone(), account))
            .collect();
        Self {
            accounts: RwLock::new(map),
        }
    }

    /// Seeds the store from a JSON array of accounts.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| IssuerError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let accounts: Vec<Account> = serde_json::from_slice(&data)
            .map_err(|e| IssuerError::Config(format!("Invalid accounts file: {}", e)))?;
        info!("Loaded {} accounts from {}", accounts.len(), path.display());
        Ok(Self::with_accounts(accounts))
    }

    pub async fn insert(&self, account: Account) {
        self.accounts
            .write()
            .await
            .insert(account.uid.clone(), account);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, uid: &str) -> Result<Account> {
        self.accounts
            .read()
            .await
            .get(uid)
            .cloned()
            .ok_or_else(|| IssuerError::AccountNotFound(uid.to_string()))
    }

    async fn credit(&self, uid: &str, amount: i64) -> Result<i64> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(uid)
            .ok_or_else(|| IssuerError::AccountNotFound(uid.to_string()))?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| IssuerError::Credit(format!("balance overflow for {}", uid)))?;
        Ok(account.balance)
    }

    async fn set_debt_status(&self, uid: &str, status: DebtStatus) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(uid)
            .ok_or_else(|| IssuerError::AccountNotFound(uid.to_string()))?;
        account.debt_status = status;
        Ok(())
    }
}

/// Applies a payload's credit to an account.
///
/// Not deduplicating: every call with a non-zero amount mutates the balance.
pub struct CreditApplier {
    accounts: Arc<dyn AccountStore>,
    timeout: Duration,
}

impl CreditApplier {
    pub fn new(accounts: Arc<dyn AccountStore>, timeout: Duration) -> Self {
        Self { accounts, timeout }
    }

    /// Returns the amount applied, or `None` when the payload carries no credit.
    ///
    /// The account lookup and the balance update share one deadline.
    pub async fn credit(&self, uid: &str, payload: &LicensePayload) -> Result<Option<i64>> {
        tokio::time::timeout(self.timeout, self.apply(uid, payload))
            .await
            .map_err(|_| {
                IssuerError::Credit(format!(
                    "credit to {} timed out after {:?}",
                    uid, self.timeout
                ))
            })?
    }

    async fn apply(&self, uid: &str, payload: &LicensePayload) -> Result<Option<i64>> {
        let account = self.accounts.get(uid).await?;
        let Some(amount) = payload.credit_amount() else {
            debug!(uid = %account.uid, "Payload carries no credit");
            return Ok(None);
        };

        let balance = self.accounts.credit(&account.uid, amount).await?;
        info!(uid = %account.uid, amount, balance, "Credited account");
        Ok(Some(amount))
    }
}
