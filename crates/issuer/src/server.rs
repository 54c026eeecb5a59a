use axum::{
    extract::{DefaultBodyLimit, Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use license_sdk::{
    AccountView, DebtThresholds, NetworkModeRequest, ObjectKey, RedemptionReport,
    SubmitLicenseRequest,
};

use crate::account::{AccountStore, CreditApplier, InMemoryAccountStore};
use crate::config::IssuerConfig;
use crate::error::Result;
use crate::ledger::FileLedger;
use crate::notification::{LogTransport, NotificationEmitter};
use crate::reconciler::{Collaborators, Reconciler};
use crate::recorder::DuplicateRecorder;
use crate::store::InMemoryObjectStore;
use crate::validator::{LicenseValidator, LocalValidator, NetworkMode, RemoteValidator};

/// License bodies are small; anything larger is rejected before parsing.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub struct IssuerState {
    pub config: IssuerConfig,
    pub reconciler: Arc<Reconciler>,
    pub thresholds: DebtThresholds,
}

impl IssuerState {
    /// Wires the file ledger, in-memory stores and the log transport from
    /// `config`.
    pub async fn new(config: IssuerConfig) -> anyhow::Result<Self> {
        let ledger = Arc::new(FileLedger::open(&config.ledger_path)?);
        info!("Ledger: {}", ledger.path().display());

        let accounts: Arc<dyn AccountStore> = match &config.accounts_path {
            Some(path) => Arc::new(InMemoryAccountStore::load(path)?),
            None => Arc::new(InMemoryAccountStore::new()),
        };

        let local = match &config.public_key_path {
            Some(path) => LocalValidator::from_pem_file(path)?,
            None => LocalValidator::new(None),
        };
        let remote = RemoteValidator::new(
            config.authority_url.clone(),
            config.authority_proxy.as_deref(),
            config.authority_timeout,
        )?;

        let parts = Collaborators {
            store: Arc::new(InMemoryObjectStore::new()),
            accounts: accounts.clone(),
            ledger,
            recorder: Arc::new(DuplicateRecorder::new()),
            validator: Arc::new(LicenseValidator::new(local, remote)),
            network_mode: Arc::new(NetworkMode::new(config.enable_external_network)),
            credit: CreditApplier::new(accounts, config.credit_timeout),
            notifier: NotificationEmitter::new(Arc::new(LogTransport), config.notify_timeout),
        };
        let history_key = ObjectKey::new(config.namespace.clone(), config.history_name.clone());
        let reconciler = Arc::new(Reconciler::new(parts, history_key));
        reconciler.ensure_history_object().await?;

        Ok(Self::with_reconciler(config, reconciler))
    }

    pub fn with_reconciler(config: IssuerConfig, reconciler: Arc<Reconciler>) -> Self {
        Self {
            config,
            reconciler,
            thresholds: DebtThresholds::default(),
        }
    }
}

/// All routes, without rate limiting.
pub fn router(state: Arc<IssuerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/licenses", post(submit_license))
        .route("/accounts/:uid", get(get_account))
        .route("/debt/thresholds", get(get_thresholds))
        .route("/options/network", put(set_network_mode))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn run(state: Arc<IssuerState>) -> anyhow::Result<()> {
    // 10 requests per second per IP
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(20)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?;

    let app = router(state.clone()).layer(GovernorLayer {
        config: Arc::new(governor_conf),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("License issuer listening on {} (rate limited: 10 req/s per IP)", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    external_network: bool,
}

#[derive(Serialize)]
struct ThresholdRow {
    status: &'static str,
    /// `None` when the tier has no cooldown configured
    cooldown_secs: Option<u64>,
}

async fn health(State(state): State<Arc<IssuerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        external_network: state.reconciler.network_mode().is_external(),
    })
}

async fn submit_license(
    State(state): State<Arc<IssuerState>>,
    Json(request): Json<SubmitLicenseRequest>,
) -> Result<Json<RedemptionReport>> {
    let license = request.into_license()?;
    let key = license.key.clone();
    info!("License submitted: {} for {}", key, license.uid);

    state.reconciler.store().put_license(license).await?;
    let report = state.reconciler.reconcile(&key).await?;
    Ok(Json(report))
}

async fn get_account(
    State(state): State<Arc<IssuerState>>,
    Path(uid): Path<String>,
) -> Result<Json<AccountView>> {
    let account = state.reconciler.accounts().get(&uid).await?;
    Ok(Json(account.view()))
}

async fn get_thresholds(State(state): State<Arc<IssuerState>>) -> Json<Vec<ThresholdRow>> {
    let rows = state
        .thresholds
        .table()
        .into_iter()
        .map(|(status, cooldown_secs)| ThresholdRow {
            status,
            cooldown_secs,
        })
        .collect();
    Json(rows)
}

async fn set_network_mode(
    State(state): State<Arc<IssuerState>>,
    Json(request): Json<NetworkModeRequest>,
) -> Json<NetworkModeRequest> {
    state.reconciler.network_mode().set_external(request.external);
    info!(
        "Network mode set to {}",
        if request.external { "external" } else { "local" }
    );
    Json(request)
}
