/// License validation: local signature check or a remote authority call.
///
/// The strategy is chosen per call from the shared [`NetworkMode`] switch and
/// the namespace config object, so flipping either takes effect on the next
/// reconciliation without a restart.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use authority_net::{Config as NetConfig, HttpClient};
use license_sdk::{License, LicensePayload, LicenseVerifier};

use crate::error::{IssuerError, Result};
use crate::store::ConfigObject;

/// Config-object key that overrides the network mode for a call.
pub const EXTERNAL_NETWORK_KEY: &str = "externalNetwork";

#[derive(Clone, Debug, PartialEq)]
pub enum ValidationOutcome {
    Valid(LicensePayload),
    DuplicateToken,
    InvalidCredential,
    AuthorityUnavailable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationStrategy {
    Local,
    Remote,
}

/// Runtime switch between local and remote validation.
#[derive(Debug, Default)]
pub struct NetworkMode {
    external: AtomicBool,
}

impl NetworkMode {
    pub fn new(external: bool) -> Self {
        Self {
            external: AtomicBool::new(external),
        }
    }

    pub fn is_external(&self) -> bool {
        self.external.load(Ordering::SeqCst)
    }

    pub fn set_external(&self, external: bool) {
        self.external.store(external, Ordering::SeqCst);
    }

    /// The strategy for one call. A parseable `externalNetwork` entry in the
    /// config object wins over the switch.
    pub fn strategy(&self, config: Option<&ConfigObject>) -> ValidationStrategy {
        let external = config
            .and_then(|c| c.get(EXTERNAL_NETWORK_KEY))
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or_else(|| self.is_external());
        if external {
            ValidationStrategy::Remote
        } else {
            ValidationStrategy::Local
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Offline validation against the authority's public key.
pub struct LocalValidator {
    verifier: Option<LicenseVerifier>,
}

impl LocalValidator {
    pub fn new(verifier: Option<LicenseVerifier>) -> Self {
        Self { verifier }
    }

    pub fn from_pem_file(path: &std::path::Path) -> Result<Self> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            IssuerError::Config(format!("Failed to read public key {}: {}", path.display(), e))
        })?;
        Ok(Self::new(Some(LicenseVerifier::from_pem(&pem)?)))
    }

    pub fn validate(&self, license: &License) -> ValidationOutcome {
        self.validate_at(license, now_unix())
    }

    pub fn validate_at(&self, license: &License, now: u64) -> ValidationOutcome {
        let Some(verifier) = &self.verifier else {
            warn!("No public key configured, rejecting license {}", license.key);
            return ValidationOutcome::InvalidCredential;
        };

        let payload = match verifier.verify(&license.token) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("License {} failed verification: {}", license.key, e);
                return ValidationOutcome::InvalidCredential;
            }
        };

        if let Some(bound) = &payload.uid {
            if bound != &license.uid {
                debug!("License {} is bound to a different account", license.key);
                return ValidationOutcome::InvalidCredential;
            }
        }
        if payload.is_expired_at(now) {
            debug!("License {} has expired", license.key);
            return ValidationOutcome::InvalidCredential;
        }

        ValidationOutcome::Valid(payload)
    }
}

#[derive(Serialize)]
struct AuthorityRequest<'a> {
    uid: &'a str,
    token: &'a str,
}

#[derive(Deserialize)]
struct AuthorityResponse {
    valid: bool,
    #[serde(default)]
    payload: Option<LicensePayload>,
}

/// Delegates judgement to the external authority.
pub struct RemoteValidator {
    client: HttpClient,
    authority_url: Option<String>,
    timeout: Duration,
}

impl RemoteValidator {
    pub fn new(authority_url: Option<String>, proxy: Option<&str>, timeout: Duration) -> Result<Self> {
        // HTTP client timeouts are whole seconds; the outer timeout is exact.
        let secs = timeout.as_secs().max(1) + u64::from(timeout.subsec_nanos() > 0);
        let mut net_config = NetConfig::default().with_timeout(secs);
        if let Some(proxy) = proxy {
            net_config = net_config.with_proxy(proxy);
        }
        let client = HttpClient::new(net_config)
            .map_err(|e| IssuerError::Config(format!("Failed to build authority client: {}", e)))?;
        Ok(Self {
            client,
            authority_url,
            timeout,
        })
    }

    pub async fn validate(&self, license: &License) -> ValidationOutcome {
        let Some(url) = &self.authority_url else {
            warn!("Remote validation requested but no authority URL is configured");
            return ValidationOutcome::AuthorityUnavailable;
        };

        let request = AuthorityRequest {
            uid: &license.uid,
            token: &license.token,
        };
        let call = self.client.post_json::<_, AuthorityResponse>(url, &request);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(AuthorityResponse { valid: true, payload })) => {
                ValidationOutcome::Valid(payload.unwrap_or_default())
            }
            Ok(Ok(AuthorityResponse { valid: false, .. })) => ValidationOutcome::InvalidCredential,
            Ok(Err(e)) => {
                warn!("Authority call for {} failed: {}", license.key, e);
                ValidationOutcome::AuthorityUnavailable
            }
            Err(_) => {
                warn!("Authority call for {} timed out after {:?}", license.key, self.timeout);
                ValidationOutcome::AuthorityUnavailable
            }
        }
    }
}

pub struct LicenseValidator {
    local: LocalValidator,
    remote: RemoteValidator,
}

impl LicenseValidator {
    pub fn new(local: LocalValidator, remote: RemoteValidator) -> Self {
        Self { local, remote }
    }

    pub async fn validate(&self, license: &License, strategy: ValidationStrategy) -> ValidationOutcome {
        match strategy {
            ValidationStrategy::Local => self.local.validate(license),
            ValidationStrategy::Remote => self.remote.validate(license).await,
        }
    }
}
