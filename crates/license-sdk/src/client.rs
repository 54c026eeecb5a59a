/// Talks to a running issuer: submit licenses, read accounts, flip network mode
use authority_net::{Config as NetConfig, HttpClient};

use crate::error::{Result, SdkError};
use crate::license::{AccountView, NetworkModeRequest, RedemptionReport, SubmitLicenseRequest};

pub struct ClientConfig {
    /// Issuer base URL, e.g. `http://127.0.0.1:8080`
    pub issuer_url: String,
    pub timeout_secs: u64,
    /// Optional proxy for reaching the issuer
    pub proxy_addr: Option<String>,
}

impl ClientConfig {
    pub fn new(issuer_url: &str) -> Self {
        Self {
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            timeout_secs: authority_net::DEFAULT_TIMEOUT_SECS,
            proxy_addr: None,
        }
    }
}

pub struct LicenseClient {
    config: ClientConfig,
    http: HttpClient,
}

impl LicenseClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut net_config = NetConfig::default().with_timeout(config.timeout_secs);
        if let Some(proxy) = &config.proxy_addr {
            net_config = net_config.with_proxy(proxy);
        }
        let http = HttpClient::new(net_config)?;
        Ok(Self { config, http })
    }

    pub async fn submit(&self, request: &SubmitLicenseRequest) -> Result<RedemptionReport> {
        if request.uid.trim().is_empty() || request.token.trim().is_empty() {
            return Err(SdkError::InvalidInput("uid and token are required".into()));
        }
        let url = format!("{}/licenses", self.config.issuer_url);
        self.http
            .post_json(&url, request)
            .await
            .map_err(|e| SdkError::Issuer(e.to_string()))
    }

    pub async fn account(&self, uid: &str) -> Result<AccountView> {
        let url = format!("{}/accounts/{}", self.config.issuer_url, uid);
        Ok(self.http.get_json(&url).await?)
    }

    pub async fn set_network_mode(&self, external: bool) -> Result<NetworkModeRequest> {
        let url = format!("{}/options/network", self.config.issuer_url);
        Ok(self
            .http
            .put_json(&url, &NetworkModeRequest { external })
            .await?)
    }

    pub fn issuer_url(&self) -> &str {
        &self.config.issuer_url
    }
}
