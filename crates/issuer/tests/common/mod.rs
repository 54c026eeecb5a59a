#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use license_issuer::{
    Account, AccountStore, Collaborators, ConfigObject, CreditApplier, DuplicateRecorder,
    InMemoryAccountStore, InMemoryObjectStore, IssuerError, LicenseValidator, LocalValidator,
    MemoryLedger, MemoryTransport, NetworkMode, NotificationEmitter, ObjectStore, Reconciler,
    RedemptionLedger, RemoteValidator, Result,
};
use license_sdk::{DebtStatus, License, LicensePayload, LicenseSigner, ObjectKey};

pub const NAMESPACE: &str = "ns-alice";
pub const ACCOUNT: &str = "alice";
pub const OTHER_ACCOUNT: &str = "bob";

pub fn history_key() -> ObjectKey {
    ObjectKey::new("license-system", "license-history")
}

pub fn signer() -> &'static LicenseSigner {
    static SIGNER: OnceLock<LicenseSigner> = OnceLock::new();
    SIGNER.get_or_init(|| LicenseSigner::new(1024).unwrap())
}

pub fn signed_token(amount: i64) -> String {
    signer().issue(&LicensePayload::with_amount(amount)).unwrap()
}

/// Account store that can be switched into failing every credit.
pub struct FlakyAccounts {
    pub inner: InMemoryAccountStore,
    pub fail_credits: AtomicBool,
    pub credit_calls: AtomicUsize,
}

impl FlakyAccounts {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            inner: InMemoryAccountStore::with_accounts(accounts),
            fail_credits: AtomicBool::new(false),
            credit_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AccountStore for FlakyAccounts {
    async fn get(&self, uid: &str) -> Result<Account> {
        self.inner.get(uid).await
    }

    async fn credit(&self, uid: &str, amount: i64) -> Result<i64> {
        self.credit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(IssuerError::Credit("account store write failed".into()));
        }
        // Widen the window between dedup and record for concurrency tests.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.inner.credit(uid, amount).await
    }

    async fn set_debt_status(&self, uid: &str, status: DebtStatus) -> Result<()> {
        self.inner.set_debt_status(uid, status).await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryObjectStore>,
    pub accounts: Arc<FlakyAccounts>,
    pub ledger: Arc<dyn RedemptionLedger>,
    pub transport: Arc<MemoryTransport>,
    pub mode: Arc<NetworkMode>,
    pub recorder: Arc<DuplicateRecorder>,
    pub reconciler: Arc<Reconciler>,
}

pub struct HarnessBuilder {
    ledger: Arc<dyn RedemptionLedger>,
    transport: Arc<MemoryTransport>,
    authority_url: Option<String>,
    authority_timeout: Duration,
    external: bool,
    with_key: bool,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            transport: Arc::new(MemoryTransport::new()),
            authority_url: None,
            authority_timeout: Duration::from_secs(1),
            external: false,
            with_key: true,
        }
    }
}

impl HarnessBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn RedemptionLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn transport(mut self, transport: Arc<MemoryTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn remote(mut self, url: &str, timeout: Duration) -> Self {
        self.authority_url = Some(url.to_string());
        self.authority_timeout = timeout;
        self.external = true;
        self
    }

    pub fn without_key(mut self) -> Self {
        self.with_key = false;
        self
    }

    pub async fn build(self) -> Harness {
        let store = Arc::new(InMemoryObjectStore::new());
        let accounts = Arc::new(FlakyAccounts::new([Account::new(ACCOUNT), Account::new(OTHER_ACCOUNT)]));
        let mode = Arc::new(NetworkMode::new(self.external));
        let recorder = Arc::new(DuplicateRecorder::new());

        let local = LocalValidator::new(self.with_key.then(|| signer().verifier()));
        let remote = RemoteValidator::new(self.authority_url, None, self.authority_timeout).unwrap();

        let parts = Collaborators {
            store: store.clone(),
            accounts: accounts.clone(),
            ledger: self.ledger.clone(),
            recorder: recorder.clone(),
            validator: Arc::new(LicenseValidator::new(local, remote)),
            network_mode: mode.clone(),
            credit: CreditApplier::new(accounts.clone(), Duration::from_secs(2)),
            notifier: NotificationEmitter::new(self.transport.clone(), Duration::from_secs(1)),
        };
        let reconciler = Arc::new(Reconciler::new(parts, history_key()));
        reconciler.ensure_history_object().await.unwrap();

        Harness {
            store,
            accounts,
            ledger: self.ledger,
            transport: self.transport,
            mode,
            recorder,
            reconciler,
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        HarnessBuilder::default().build().await
    }

    /// Stores a license object and returns its key.
    pub async fn submit(&self, name: &str, token: &str) -> ObjectKey {
        self.submit_as(name, ACCOUNT, token).await
    }

    pub async fn submit_as(&self, name: &str, uid: &str, token: &str) -> ObjectKey {
        let key = ObjectKey::new(NAMESPACE, name);
        let license = License::new(key.clone(), uid, token).unwrap();
        self.store.put_license(license).await.unwrap();
        key
    }

    pub async fn balance(&self) -> i64 {
        self.balance_of(ACCOUNT).await
    }

    pub async fn balance_of(&self, uid: &str) -> i64 {
        self.accounts.get(uid).await.unwrap().balance
    }

    pub async fn set_history(&self, name: &str, value: &str) {
        self.store
            .put_config(ConfigObject::new(history_key()).with_entry(name, value))
            .await
            .unwrap();
    }
}
