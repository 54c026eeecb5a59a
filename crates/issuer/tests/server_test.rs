mod common;

use serde_json::Value;
use std::sync::Arc;

use common::{signed_token, Harness, ACCOUNT, NAMESPACE};
use license_issuer::server::{router, IssuerState};
use license_issuer::{IssuerConfig, ObjectStore};
use license_sdk::{ClientConfig, LicenseClient, RedemptionOutcome, SdkError, SubmitLicenseRequest};

async fn spawn_issuer(h: &Harness) -> String {
    let state = Arc::new(IssuerState::with_reconciler(
        IssuerConfig::default(),
        h.reconciler.clone(),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn request(name: &str, token: &str) -> SubmitLicenseRequest {
    SubmitLicenseRequest {
        namespace: NAMESPACE.into(),
        name: name.into(),
        uid: ACCOUNT.into(),
        token: token.into(),
    }
}

#[tokio::test]
async fn test_submit_and_read_account() {
    let h = Harness::new().await;
    let client = LicenseClient::new(ClientConfig::new(&spawn_issuer(&h).await)).unwrap();
    let token = signed_token(100);

    let report = client.submit(&request("license-1", &token)).await.unwrap();
    assert_eq!(report.outcome, RedemptionOutcome::Redeemed);
    assert_eq!(report.credited, Some(100));

    let again = client.submit(&request("license-2", &token)).await.unwrap();
    assert_eq!(again.outcome, RedemptionOutcome::Duplicate);

    let account = client.account(ACCOUNT).await.unwrap();
    assert_eq!(account.balance, 100);
}

#[tokio::test]
async fn test_unknown_account_is_404() {
    let h = Harness::new().await;
    let client = LicenseClient::new(ClientConfig::new(&spawn_issuer(&h).await)).unwrap();
    match client.account("nobody").await {
        Err(SdkError::Network(authority_net::NetError::Status { status, .. })) => {
            assert_eq!(status, 404)
        }
        other => panic!("expected 404, got {:?}", other.map(|a| a.uid)),
    }
}

#[tokio::test]
async fn test_network_mode_switch() {
    let h = Harness::new().await;
    let client = LicenseClient::new(ClientConfig::new(&spawn_issuer(&h).await)).unwrap();

    assert!(!h.mode.is_external());
    let ack = client.set_network_mode(true).await.unwrap();
    assert!(ack.external);
    assert!(h.mode.is_external());
}

#[tokio::test]
async fn test_health_and_thresholds() {
    let h = Harness::new().await;
    let base = spawn_issuer(&h).await;
    let http = authority_net::default_client().unwrap();

    let health: Value = http.get_json(&format!("{}/health", base)).await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["external_network"], false);

    let table: Value = http
        .get_json(&format!("{}/debt/thresholds", base))
        .await
        .unwrap();
    assert_eq!(table[1]["status"], "Small");
    assert_eq!(table[1]["cooldown_secs"], 3 * 24 * 60 * 60);
    assert_eq!(table[3]["status"], "Large");
    assert!(table[3]["cooldown_secs"].is_null());
}

#[tokio::test]
async fn test_oversized_submission_rejected() {
    let h = Harness::new().await;
    let base = spawn_issuer(&h).await;
    let http = authority_net::default_client().unwrap();

    let huge = "a".repeat(license_issuer::server::MAX_BODY_BYTES + 1);
    let err = http
        .post(&format!("{}/licenses", base), &request("license-big", &huge))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        authority_net::NetError::Status { status: 413, .. }
    ));
    assert!(h.store.list_licenses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_over_pending_license_is_409() {
    let h = Harness::new().await;
    let client = LicenseClient::new(ClientConfig::new(&spawn_issuer(&h).await)).unwrap();
    let pending = signed_token(10);
    let key = h.submit("license-1", &pending).await;

    match client.submit(&request("license-1", &signed_token(20))).await {
        Err(SdkError::Network(authority_net::NetError::Status { status, .. })) => {
            assert_eq!(status, 409)
        }
        other => panic!("expected 409, got {:?}", other.map(|r| r.outcome)),
    }
    assert_eq!(h.store.get_license(&key).await.unwrap().token, pending);
    assert_eq!(h.balance().await, 0);
}
