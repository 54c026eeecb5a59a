/// The redemption state machine.
///
/// One call to [`Reconciler::reconcile`] walks a license object through
/// `Start -> Loaded -> DedupChecked -> Validated -> Credited -> Recorded ->
/// Notified -> Finalized`, leaving early for duplicates, invalid licenses and
/// failed credits. Every attempt that loads the license deletes it at the end.
/// Only a failed read or a failed delete is returned as an error.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use license_sdk::{License, LicensePayload, ObjectKey, RedemptionOutcome, RedemptionReport};

use crate::account::{AccountStore, CreditApplier};
use crate::error::{IssuerError, Result};
use crate::ledger::RedemptionLedger;
use crate::notification::{outcome_message, NotificationEmitter};
use crate::recorder::DuplicateRecorder;
use crate::store::{ConfigObject, ObjectStore};
use crate::validator::{LicenseValidator, NetworkMode, ValidationOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedemptionState {
    Start,
    Loaded,
    DedupChecked,
    Validated,
    Credited,
    Recorded,
    Notified,
    Finalized,
}

impl fmt::Display for RedemptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RedemptionState::Start => "start",
            RedemptionState::Loaded => "loaded",
            RedemptionState::DedupChecked => "dedup-checked",
            RedemptionState::Validated => "validated",
            RedemptionState::Credited => "credited",
            RedemptionState::Recorded => "recorded",
            RedemptionState::Notified => "notified",
            RedemptionState::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

/// Everything one attempt knows, passed from step to step.
#[derive(Debug)]
pub struct RedemptionContext {
    pub license: License,
    pub config: ConfigObject,
    pub payload: Option<LicensePayload>,
    pub credited: Option<i64>,
    pub trail: Vec<RedemptionState>,
}

impl RedemptionContext {
    fn new(license: License, config: ConfigObject) -> Self {
        Self {
            license,
            config,
            payload: None,
            credited: None,
            trail: vec![RedemptionState::Start, RedemptionState::Loaded],
        }
    }

    fn enter(&mut self, state: RedemptionState) {
        self.trail.push(state);
    }

    pub fn state(&self) -> RedemptionState {
        self.trail
            .last()
            .copied()
            .unwrap_or(RedemptionState::Start)
    }

    fn into_report(self, outcome: RedemptionOutcome, deleted: bool) -> RedemptionReport {
        RedemptionReport {
            key: self.license.key.clone(),
            uid: self.license.uid.clone(),
            outcome,
            credited: self.credited,
            message: outcome_message(outcome).to_string(),
            deleted,
            trail: self.trail.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Collaborators the reconciler drives.
pub struct Collaborators {
    pub store: Arc<dyn ObjectStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn RedemptionLedger>,
    pub recorder: Arc<DuplicateRecorder>,
    pub validator: Arc<LicenseValidator>,
    pub network_mode: Arc<NetworkMode>,
    pub credit: CreditApplier,
    pub notifier: NotificationEmitter,
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn RedemptionLedger>,
    recorder: Arc<DuplicateRecorder>,
    validator: Arc<LicenseValidator>,
    network_mode: Arc<NetworkMode>,
    credit: CreditApplier,
    notifier: NotificationEmitter,
    /// The namespace-scoped license-history config object
    history_key: ObjectKey,
    active: ActiveKeys,
}

/// Keys with an attempt underway, counted per attempt.
#[derive(Default)]
struct ActiveKeys(Mutex<HashMap<ObjectKey, usize>>);

impl ActiveKeys {
    fn mark(&self, key: &ObjectKey) -> ActiveKey<'_> {
        let mut active = self.0.lock().unwrap_or_else(|p| p.into_inner());
        *active.entry(key.clone()).or_insert(0) += 1;
        ActiveKey {
            active: self,
            key: key.clone(),
        }
    }

    fn contains(&self, key: &ObjectKey) -> bool {
        let active = self.0.lock().unwrap_or_else(|p| p.into_inner());
        active.contains_key(key)
    }
}

struct ActiveKey<'a> {
    active: &'a ActiveKeys,
    key: ObjectKey,
}

impl Drop for ActiveKey<'_> {
    fn drop(&mut self) {
        let mut active = self.active.0.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = active.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}

impl Reconciler {
    pub fn new(parts: Collaborators, history_key: ObjectKey) -> Self {
        Self {
            store: parts.store,
            accounts: parts.accounts,
            ledger: parts.ledger,
            recorder: parts.recorder,
            validator: parts.validator,
            network_mode: parts.network_mode,
            credit: parts.credit,
            notifier: parts.notifier,
            history_key,
            active: ActiveKeys::default(),
        }
    }

    pub fn network_mode(&self) -> &Arc<NetworkMode> {
        &self.network_mode
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn accounts(&self) -> &Arc<dyn AccountStore> {
        &self.accounts
    }

    /// Creates an empty history object if the store has none.
    pub async fn ensure_history_object(&self) -> Result<()> {
        if self.store.get_config(&self.history_key).await.is_err() {
            info!("Creating config object {}", self.history_key);
            self.store
                .put_config(ConfigObject::new(self.history_key.clone()))
                .await?;
        }
        Ok(())
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Result<RedemptionReport> {
        info!(namespace = %key.namespace, name = %key.name, "Reconciling license");
        let _active = self.active.mark(key);

        let mut ctx = self.load(key).await?;
        let outcome = self.redeem(&mut ctx).await;
        self.notify(&mut ctx, outcome).await;
        let report = self.finalize(ctx, outcome).await?;

        info!(
            namespace = %key.namespace,
            name = %key.name,
            uid = %report.uid,
            outcome = %report.outcome,
            credited = ?report.credited,
            "License reconciled"
        );
        Ok(report)
    }

    /// Reconciles every license object still in the store, skipping those
    /// with an attempt already underway.
    pub async fn sweep(&self) -> Vec<(ObjectKey, Result<RedemptionReport>)> {
        let keys = match self.store.list_licenses().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list licenses: {}", e);
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if self.active.contains(&key) {
                debug!("Skipping license {}, attempt in progress", key);
                continue;
            }
            let result = self.reconcile(&key).await;
            results.push((key, result));
        }
        results
    }

    /// Start -> Loaded
    async fn load(&self, key: &ObjectKey) -> Result<RedemptionContext> {
        let license = self.store.get_license(key).await.map_err(|e| {
            error!("Failed to read license {}: {}", key, e);
            e
        })?;
        let config = self.store.get_config(&self.history_key).await.map_err(|e| {
            error!("Failed to read config {}: {}", self.history_key, e);
            e
        })?;
        Ok(RedemptionContext::new(license, config))
    }

    /// Loaded -> ... -> Recorded, stopping at the first terminal outcome.
    async fn redeem(&self, ctx: &mut RedemptionContext) -> RedemptionOutcome {
        let Some(_claim) = self.recorder.claim(&ctx.license.uid, &ctx.license.token) else {
            debug!("License {} token is already being redeemed", ctx.license.key);
            ctx.enter(RedemptionState::DedupChecked);
            return RedemptionOutcome::Duplicate;
        };

        if self.is_duplicate(&ctx.license).await {
            ctx.enter(RedemptionState::DedupChecked);
            return RedemptionOutcome::Duplicate;
        }
        ctx.enter(RedemptionState::DedupChecked);

        let payload = match self.validate(ctx).await {
            ValidationOutcome::Valid(payload) => payload,
            ValidationOutcome::DuplicateToken => return RedemptionOutcome::Duplicate,
            ValidationOutcome::InvalidCredential => return RedemptionOutcome::Invalid,
            ValidationOutcome::AuthorityUnavailable => {
                return RedemptionOutcome::AuthorityUnavailable
            }
        };
        ctx.enter(RedemptionState::Validated);

        match self.apply_credit(&ctx.license, &payload).await {
            Ok(credited) => ctx.credited = credited,
            Err(e) => {
                warn!("Credit for license {} failed: {}", ctx.license.key, e);
                return RedemptionOutcome::CreditFailed;
            }
        }
        ctx.enter(RedemptionState::Credited);

        let outcome = self.record(ctx, &payload).await;
        ctx.payload = Some(payload);
        outcome
    }

    /// Recorder first, then the ledger. An unreadable ledger counts as a duplicate.
    async fn is_duplicate(&self, license: &License) -> bool {
        if self.recorder.find(&license.uid, &license.token).await {
            debug!("License {} token found in recorder", license.key);
            return true;
        }
        match self.ledger.exists(&license.uid, &license.token).await {
            Ok(found) => {
                if found {
                    debug!("License {} token found in ledger", license.key);
                }
                found
            }
            Err(e) => {
                error!("Failed to check ledger for license {}: {}", license.key, e);
                true
            }
        }
    }

    async fn validate(&self, ctx: &RedemptionContext) -> ValidationOutcome {
        let strategy = self.network_mode.strategy(Some(&ctx.config));
        debug!("Validating license {} with {:?} strategy", ctx.license.key, strategy);
        self.validator.validate(&ctx.license, strategy).await
    }

    async fn apply_credit(&self, license: &License, payload: &LicensePayload) -> Result<Option<i64>> {
        self.credit.credit(&license.uid, payload).await
    }

    /// Credited -> Recorded
    async fn record(&self, ctx: &mut RedemptionContext, payload: &LicensePayload) -> RedemptionOutcome {
        let license = &ctx.license;
        match self.ledger.record(&license.uid, &license.token, payload).await {
            Ok(()) => {
                self.recorder.add(&license.uid, &license.token).await;
                ctx.enter(RedemptionState::Recorded);
                RedemptionOutcome::Redeemed
            }
            Err(IssuerError::RecordConflict(uid)) => {
                warn!(
                    "Ledger already holds license {} for {}, treating as duplicate",
                    license.key, uid
                );
                RedemptionOutcome::Duplicate
            }
            Err(e) => {
                error!(
                    uid = %license.uid,
                    credited = ?ctx.credited,
                    "Credit applied but ledger write failed for license {}: {}",
                    license.key,
                    e
                );
                self.recorder.add(&license.uid, &license.token).await;
                RedemptionOutcome::Redeemed
            }
        }
    }

    /// -> Notified. Never fails.
    async fn notify(&self, ctx: &mut RedemptionContext, outcome: RedemptionOutcome) {
        self.notifier
            .emit(outcome, &ctx.license.key.namespace)
            .await;
        ctx.enter(RedemptionState::Notified);
    }

    /// -> Finalized. Deleting the license is the last act of every attempt.
    async fn finalize(
        &self,
        mut ctx: RedemptionContext,
        outcome: RedemptionOutcome,
    ) -> Result<RedemptionReport> {
        if let Err(e) = self.store.delete_license(&ctx.license).await {
            error!("Failed to delete license {}: {}", ctx.license.key, e);
            return Err(IssuerError::Finalize(ctx.license.key.to_string()));
        }
        ctx.enter(RedemptionState::Finalized);
        Ok(ctx.into_report(outcome, true))
    }
}
