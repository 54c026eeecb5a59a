use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "license-system";
pub const DEFAULT_HISTORY_NAME: &str = "license-history";
pub const DEFAULT_LEDGER_PATH: &str = "license_ledger.json";

#[derive(Clone, Debug)]
pub struct IssuerConfig {
    pub host: String,
    pub port: u16,
    /// Namespace holding accounts and the license-history config object
    pub namespace: String,
    pub history_name: String,
    pub ledger_path: PathBuf,
    /// PEM public key used by local validation
    pub public_key_path: Option<PathBuf>,
    pub enable_external_network: bool,
    pub authority_url: Option<String>,
    pub authority_proxy: Option<String>,
    pub authority_timeout: Duration,
    pub credit_timeout: Duration,
    pub notify_timeout: Duration,
    pub sweep_interval: Duration,
    /// JSON file of accounts to preload
    pub accounts_path: Option<PathBuf>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            namespace: DEFAULT_NAMESPACE.to_string(),
            history_name: DEFAULT_HISTORY_NAME.to_string(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            public_key_path: None,
            enable_external_network: false,
            authority_url: None,
            authority_proxy: None,
            authority_timeout: Duration::from_secs(5),
            credit_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(30),
            accounts_path: None,
        }
    }
}

impl IssuerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.port);

        let namespace = std::env::var("ISSUER_NAMESPACE").unwrap_or(defaults.namespace);
        let history_name = std::env::var("LICENSE_HISTORY_NAME").unwrap_or(defaults.history_name);

        let ledger_path = std::env::var("LEDGER_PATH")
            .map(|p| expand_path(&p))
            .unwrap_or(defaults.ledger_path);
        let public_key_path = std::env::var("LICENSE_PUBKEY_PATH").ok().map(|p| expand_path(&p));
        let accounts_path = std::env::var("ACCOUNTS_PATH").ok().map(|p| expand_path(&p));

        let enable_external_network = std::env::var("ENABLE_EXTERNAL_NETWORK")
            .map(|v| parse_bool(&v))
            .unwrap_or(defaults.enable_external_network);
        let authority_url = std::env::var("AUTHORITY_URL").ok().filter(|s| !s.is_empty());
        let authority_proxy = std::env::var("AUTHORITY_PROXY").ok().filter(|s| !s.is_empty());

        if enable_external_network && authority_url.is_none() {
            tracing::warn!(
                "ENABLE_EXTERNAL_NETWORK is set but AUTHORITY_URL is not. \
                 Every remote validation will report the authority as unavailable."
            );
        }
        if public_key_path.is_none() {
            tracing::warn!("LICENSE_PUBKEY_PATH not set! Local validation will reject every license.");
        }

        Ok(Self {
            host,
            port,
            namespace,
            history_name,
            ledger_path,
            public_key_path,
            enable_external_network,
            authority_url,
            authority_proxy,
            authority_timeout: env_secs("AUTHORITY_TIMEOUT_SECS", defaults.authority_timeout),
            credit_timeout: env_secs("CREDIT_TIMEOUT_SECS", defaults.credit_timeout),
            notify_timeout: env_secs("NOTIFY_TIMEOUT_SECS", defaults.notify_timeout),
            sweep_interval: env_secs("SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            accounts_path,
        })
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).to_string())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
