mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::tempdir;

use async_trait::async_trait;
use common::{signed_token, signer, Harness, HarnessBuilder, ACCOUNT, NAMESPACE, OTHER_ACCOUNT};
use license_issuer::notification::{DUPLICATE_LICENSE_MESSAGE, INVALID_LICENSE_MESSAGE};
use license_issuer::{
    FileLedger, IssuerError, MemoryLedger, MemoryTransport, ObjectStore, RedemptionLedger,
};
use license_sdk::{LicensePayload, ObjectKey, RedemptionOutcome};

#[tokio::test]
async fn test_fresh_token_credits_and_records() {
    let h = Harness::new().await;
    let token = signed_token(100);
    let key = h.submit("license-1", &token).await;

    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(report.credited, Some(100));
    assert!(report.deleted);
    assert_eq!(
        report.trail,
        vec![
            "start",
            "loaded",
            "dedup-checked",
            "validated",
            "credited",
            "recorded",
            "notified",
            "finalized"
        ]
    );
    assert_eq!(h.balance().await, 100);
    assert!(h.ledger.exists(ACCOUNT, &token).await.unwrap());
    assert!(h.store.get_license(&key).await.is_err());

    let delivered = h.transport.delivered().await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(delivered[0].1, vec![NAMESPACE.to_string()]);
}

#[tokio::test]
async fn test_resubmitted_token_is_duplicate() {
    let h = Harness::new().await;
    let token = signed_token(100);

    let first = h.submit("license-1", &token).await;
    h.reconciler.reconcile(&first).await.unwrap();

    let second = h.submit("license-2", &token).await;
    let report = h.reconciler.reconcile(&second).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Duplicate);
    assert_eq!(report.message, DUPLICATE_LICENSE_MESSAGE);
    assert_eq!(report.credited, None);
    assert!(report.deleted);
    assert_eq!(h.balance().await, 100);
    assert!(h.store.get_license(&second).await.is_err());
}

#[tokio::test]
async fn test_invalid_token_burns_deterministically() {
    let h = Harness::new().await;
    let forged = format!(
        "{}.{}",
        hex::encode(LicensePayload::with_amount(1_000).to_bytes().unwrap()),
        "00".repeat(128)
    );

    for name in ["license-a", "license-b"] {
        let key = h.submit(name, &forged).await;
        let report = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(report.outcome, RedemptionOutcome::Invalid);
        assert_eq!(report.message, INVALID_LICENSE_MESSAGE);
        assert!(report.deleted);
        assert!(h.store.get_license(&key).await.is_err());
    }

    assert_eq!(h.balance().await, 0);
    assert!(!h.ledger.exists(ACCOUNT, &forged).await.unwrap());
}

#[tokio::test]
async fn test_no_public_key_rejects_everything() {
    let h = HarnessBuilder::default().without_key().build().await;
    let key = h.submit("license-1", &signed_token(10)).await;
    let report = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(report.outcome, RedemptionOutcome::Invalid);
}

#[tokio::test]
async fn test_credit_failure_leaves_token_redeemable() {
    let h = Harness::new().await;
    let token = signed_token(50);

    h.accounts.fail_credits.store(true, Ordering::SeqCst);
    let key = h.submit("license-1", &token).await;
    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::CreditFailed);
    assert!(report.outcome.retry_advised());
    assert!(report.deleted);
    assert!(!h.ledger.exists(ACCOUNT, &token).await.unwrap());
    assert!(h.store.get_license(&key).await.is_err());
    assert_eq!(h.balance().await, 0);

    h.accounts.fail_credits.store(false, Ordering::SeqCst);
    let retry = h.submit("license-1-retry", &token).await;
    let report = h.reconciler.reconcile(&retry).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(report.credited, Some(50));
    assert_eq!(h.balance().await, 50);
}

#[tokio::test]
async fn test_unknown_account_is_credit_failure() {
    let h = Harness::new().await;
    let key = ObjectKey::new(NAMESPACE, "license-ghost");
    let license = license_sdk::License::new(key.clone(), "ghost", &signed_token(10)).unwrap();
    h.store.put_license(license).await.unwrap();

    let report = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(report.outcome, RedemptionOutcome::CreditFailed);
    assert!(report.deleted);
}

#[tokio::test]
async fn test_payload_without_amount_records_without_credit() {
    let h = Harness::new().await;
    let mut payload = LicensePayload::default();
    payload
        .extra
        .insert("feature".into(), serde_json::Value::String("gpu".into()));
    let token = signer().issue(&payload).unwrap();

    let key = h.submit("license-feature", &token).await;
    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(report.credited, None);
    assert_eq!(h.accounts.credit_calls.load(Ordering::SeqCst), 0);
    assert!(h.ledger.exists(ACCOUNT, &token).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_credit_at_most_once() {
    let h = Harness::new().await;
    let token = signed_token(100);

    let mut keys = Vec::new();
    for i in 0..12 {
        keys.push(h.submit(&format!("license-{}", i), &token).await);
    }

    let mut handles = Vec::new();
    for key in keys {
        let reconciler = h.reconciler.clone();
        handles.push(tokio::spawn(async move { reconciler.reconcile(&key).await }));
    }

    let mut redeemed = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.deleted);
        match report.outcome {
            RedemptionOutcome::Redeemed => redeemed += 1,
            RedemptionOutcome::Duplicate => {}
            other => panic!("unexpected outcome {}", other),
        }
    }

    assert_eq!(redeemed, 1);
    assert_eq!(h.accounts.credit_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.balance().await, 100);
    assert!(h.store.list_licenses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_catches_what_a_fresh_recorder_misses() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let token = signed_token(100);

    {
        let ledger = Arc::new(FileLedger::open(&path).unwrap());
        let h = HarnessBuilder::default().ledger(ledger).build().await;
        let key = h.submit("license-1", &token).await;
        let report = h.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    }

    // New process: empty recorder, same ledger file.
    let ledger = Arc::new(FileLedger::open(&path).unwrap());
    let h = HarnessBuilder::default().ledger(ledger).build().await;
    let key = h.submit("license-1", &token).await;
    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Duplicate);
    assert_eq!(h.accounts.credit_calls.load(Ordering::SeqCst), 0);
    assert!(report.deleted);
}

#[tokio::test]
async fn test_missing_license_is_read_failure() {
    let h = Harness::new().await;
    let err = h
        .reconciler
        .reconcile(&ObjectKey::new(NAMESPACE, "absent"))
        .await
        .unwrap_err();
    assert!(matches!(err, IssuerError::Read { .. }));
    assert!(h.transport.delivered().await.is_empty());
}

#[tokio::test]
async fn test_missing_history_object_is_read_failure() {
    let h = Harness::new().await;
    let key = h.submit("license-1", &signed_token(5)).await;

    let fresh_store = Arc::new(license_issuer::InMemoryObjectStore::new());
    fresh_store
        .put_license(h.store.get_license(&key).await.unwrap())
        .await
        .unwrap();
    // No history object in this store, and nothing creates one.
    let reconciler = build_without_history(fresh_store.clone());

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, IssuerError::Read { .. }));
    assert!(fresh_store.get_license(&key).await.is_ok());
}

fn build_without_history(store: Arc<license_issuer::InMemoryObjectStore>) -> license_issuer::Reconciler {
    use license_issuer::*;
    use std::time::Duration;

    let accounts = Arc::new(InMemoryAccountStore::new());
    let parts = Collaborators {
        store,
        accounts: accounts.clone(),
        ledger: Arc::new(MemoryLedger::new()),
        recorder: Arc::new(DuplicateRecorder::new()),
        validator: Arc::new(LicenseValidator::new(
            LocalValidator::new(Some(signer().verifier())),
            RemoteValidator::new(None, None, Duration::from_secs(1)).unwrap(),
        )),
        network_mode: Arc::new(NetworkMode::new(false)),
        credit: CreditApplier::new(accounts, Duration::from_secs(1)),
        notifier: NotificationEmitter::new(Arc::new(LogTransport), Duration::from_secs(1)),
    };
    Reconciler::new(parts, common::history_key())
}

#[tokio::test]
async fn test_notification_failure_does_not_block_finalization() {
    let h = HarnessBuilder::default()
        .transport(Arc::new(MemoryTransport::failing()))
        .build()
        .await;
    let key = h.submit("license-1", &signed_token(20)).await;

    let report = h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert!(report.trail.contains(&"notified".to_string()));
    assert!(report.deleted);
    assert_eq!(h.balance().await, 20);
}

#[tokio::test]
async fn test_sweep_reconciles_leftovers() {
    let h = Harness::new().await;
    h.submit("left-1", &signed_token(10)).await;
    h.submit("left-2", &signed_token(15)).await;
    h.submit("left-3", "garbage").await;

    let results = h.reconciler.sweep().await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(h.balance().await, 25);
    assert!(h.store.list_licenses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shared_token_outcome_independent_of_recorder_warmth() {
    let token = signed_token(40);

    // Warm: bob's attempt follows alice's in the same process.
    let warm = Harness::new().await;
    let key = warm.submit_as("license-a", ACCOUNT, &token).await;
    warm.reconciler.reconcile(&key).await.unwrap();
    let key = warm.submit_as("license-b", OTHER_ACCOUNT, &token).await;
    let warm_report = warm.reconciler.reconcile(&key).await.unwrap();

    // Cold: bob's attempt runs in a new process over alice's ledger.
    let ledger: Arc<dyn RedemptionLedger> = Arc::new(MemoryLedger::new());
    let first = HarnessBuilder::default().ledger(ledger.clone()).build().await;
    let key = first.submit_as("license-a", ACCOUNT, &token).await;
    first.reconciler.reconcile(&key).await.unwrap();
    let cold = HarnessBuilder::default().ledger(ledger).build().await;
    let key = cold.submit_as("license-b", OTHER_ACCOUNT, &token).await;
    let cold_report = cold.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(warm_report.outcome, cold_report.outcome);
    assert_eq!(warm_report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(warm.balance_of(OTHER_ACCOUNT).await, 40);
    assert_eq!(cold.balance_of(OTHER_ACCOUNT).await, 40);
}

/// Reports every record as already present, as after a lost race with
/// another issuer.
struct ConflictLedger;

#[async_trait]
impl RedemptionLedger for ConflictLedger {
    async fn exists(&self, _uid: &str, _token: &str) -> license_issuer::Result<bool> {
        Ok(false)
    }

    async fn record(
        &self,
        uid: &str,
        _token: &str,
        _payload: &LicensePayload,
    ) -> license_issuer::Result<()> {
        Err(IssuerError::RecordConflict(uid.to_string()))
    }
}

/// Readable but refuses every write.
struct ReadOnlyLedger;

#[async_trait]
impl RedemptionLedger for ReadOnlyLedger {
    async fn exists(&self, _uid: &str, _token: &str) -> license_issuer::Result<bool> {
        Ok(false)
    }

    async fn record(
        &self,
        _uid: &str,
        _token: &str,
        _payload: &LicensePayload,
    ) -> license_issuer::Result<()> {
        Err(IssuerError::Ledger("disk full".into()))
    }
}

#[tokio::test]
async fn test_record_conflict_reports_duplicate() {
    let h = HarnessBuilder::default()
        .ledger(Arc::new(ConflictLedger))
        .build()
        .await;
    let token = signed_token(30);
    let key = h.submit("license-1", &token).await;

    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Duplicate);
    assert!(report.trail.contains(&"credited".to_string()));
    assert!(!report.trail.contains(&"recorded".to_string()));
    assert!(report.deleted);
    assert!(!h.recorder.find(ACCOUNT, &token).await);
    assert!(h.store.get_license(&key).await.is_err());
}

#[tokio::test]
async fn test_failed_record_still_redeems_and_remembers() {
    let h = HarnessBuilder::default()
        .ledger(Arc::new(ReadOnlyLedger))
        .build()
        .await;
    let token = signed_token(30);
    let key = h.submit("license-1", &token).await;

    let report = h.reconciler.reconcile(&key).await.unwrap();

    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(report.credited, Some(30));
    assert!(!report.trail.contains(&"recorded".to_string()));
    assert!(report.deleted);
    assert!(h.recorder.find(ACCOUNT, &token).await);
    assert_eq!(h.balance().await, 30);

    // The recorder keeps the same process from crediting it twice.
    let again = h.submit("license-2", &token).await;
    let report = h.reconciler.reconcile(&again).await.unwrap();
    assert_eq!(report.outcome, RedemptionOutcome::Duplicate);
    assert_eq!(h.balance().await, 30);
}
