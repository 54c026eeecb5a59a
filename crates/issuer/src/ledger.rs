/// Durable record of redeemed tokens.
///
/// The ledger is the authority on whether a token was consumed. `record`
/// is insert-if-absent: a second record for the same (account, token) pair
/// fails with [`IssuerError::RecordConflict`] rather than overwriting.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::info;

use license_sdk::{token::token_key, LicensePayload};

use crate::error::{IssuerError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub uid: String,
    /// Hex SHA-256 of the token
    pub token_hash: String,
    pub payload: LicensePayload,
    /// Unix seconds
    pub recorded_at: u64,
}

fn record_key(uid: &str, token_hash: &str) -> String {
    format!("{}:{}", uid, token_hash)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
pub trait RedemptionLedger: Send + Sync {
    async fn exists(&self, uid: &str, token: &str) -> Result<bool>;

    async fn record(&self, uid: &str, token: &str, payload: &LicensePayload) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<BTreeMap<String, RedemptionRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<RedemptionRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RedemptionLedger for MemoryLedger {
    async fn exists(&self, uid: &str, token: &str) -> Result<bool> {
        let key = record_key(uid, &token_key(token));
        Ok(self.records.read().await.contains_key(&key))
    }

    async fn record(&self, uid: &str, token: &str, payload: &LicensePayload) -> Result<()> {
        let token_hash = token_key(token);
        let key = record_key(uid, &token_hash);
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(IssuerError::RecordConflict(uid.to_string()));
        }
        records.insert(
            key,
            RedemptionRecord {
                uid: uid.to_string(),
                token_hash,
                payload: payload.clone(),
                recorded_at: now_unix(),
            },
        );
        Ok(())
    }
}

/// On-disk form of [`FileLedger`]: the encoded record list and its
/// SHA-256, committed together by one rename.
#[derive(Serialize, Deserialize)]
struct LedgerFile {
    /// Hex SHA-256 of `records`
    checksum: String,
    /// JSON array of [`RedemptionRecord`]
    records: String,
}

/// JSON-file ledger carrying its own checksum.
///
/// Every record rewrites the whole file through a temp file, fsync and
/// rename while holding the write lock, so concurrent records of the same
/// pair serialize and exactly one wins. A crash before the rename leaves
/// the previous file whole.
pub struct FileLedger {
    path: PathBuf,
    records: RwLock<BTreeMap<String, RedemptionRecord>>,
}

impl FileLedger {
    fn compute_checksum(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Loads the ledger at `path`, or starts empty if the file is absent.
    ///
    /// A checksum mismatch or unreadable file is an error. Starting empty
    /// would re-open every consumed token.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let data = std::fs::read(&path)
                .map_err(|e| IssuerError::Ledger(format!("Failed to read ledger: {}", e)))?;
            let file: LedgerFile = serde_json::from_slice(&data)
                .map_err(|e| IssuerError::Ledger(format!("Failed to parse ledger: {}", e)))?;

            if file.checksum != Self::compute_checksum(file.records.as_bytes()) {
                return Err(IssuerError::Ledger(format!(
                    "Ledger checksum mismatch for {}; refusing to load a corrupted ledger",
                    path.display()
                )));
            }

            let list: Vec<RedemptionRecord> = serde_json::from_str(&file.records)
                .map_err(|e| IssuerError::Ledger(format!("Failed to parse ledger records: {}", e)))?;
            info!("Loaded {} redemption records from disk (checksum verified)", list.len());
            list.into_iter()
                .map(|record| (record_key(&record.uid, &record.token_hash), record))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    fn encode(records: &BTreeMap<String, RedemptionRecord>) -> Result<Vec<u8>> {
        let list: Vec<&RedemptionRecord> = records.values().collect();
        let records = serde_json::to_string(&list)
            .map_err(|e| IssuerError::Ledger(format!("Failed to encode ledger: {}", e)))?;
        let file = LedgerFile {
            checksum: Self::compute_checksum(records.as_bytes()),
            records,
        };
        serde_json::to_vec_pretty(&file)
            .map_err(|e| IssuerError::Ledger(format!("Failed to encode ledger: {}", e)))
    }

    /// Writes the encoded ledger off the async runtime. The caller keeps the
    /// write lock across the await.
    async fn persist(&self, records: &BTreeMap<String, RedemptionRecord>) -> Result<()> {
        let data = Self::encode(records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &data))
            .await
            .map_err(|e| IssuerError::Ledger(format!("Ledger write task failed: {}", e)))?
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let temp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&temp_path)
            .map_err(|e| IssuerError::Ledger(format!("Failed to create temp ledger: {}", e)))?;
        file.write_all(data)
            .map_err(|e| IssuerError::Ledger(format!("Failed to write ledger: {}", e)))?;
        file.sync_all()
            .map_err(|e| IssuerError::Ledger(format!("Failed to sync ledger: {}", e)))?;
    }

    std::fs::rename(&temp_path, path)
        .map_err(|e| IssuerError::Ledger(format!("Failed to rename ledger: {}", e)))?;
    Ok(())
}

#[async_trait]
impl RedemptionLedger for FileLedger {
    async fn exists(&self, uid: &str, token: &str) -> Result<bool> {
        let key = record_key(uid, &token_key(token));
        Ok(self.records.read().await.contains_key(&key))
    }

    async fn record(&self, uid: &str, token: &str, payload: &LicensePayload) -> Result<()> {
        let token_hash = token_key(token);
        let key = record_key(uid, &token_hash);

        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(IssuerError::RecordConflict(uid.to_string()));
        }
        records.insert(
            key.clone(),
            RedemptionRecord {
                uid: uid.to_string(),
                token_hash,
                payload: payload.clone(),
                recorded_at: now_unix(),
            },
        );

        if let Err(e) = self.persist(&records).await {
            // Not durable, so not recorded.
            records.remove(&key);
            return Err(e);
        }
        Ok(())
    }
}
