/// Declarative object storage: license objects and namespace config objects.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use license_sdk::{License, ObjectKey};

use crate::error::{IssuerError, Result};

/// Namespace-scoped key/value object, e.g. the license-history config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub key: ObjectKey,
    pub data: BTreeMap<String, String>,
}

impl ConfigObject {
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            data: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, name: &str, value: &str) -> Self {
        self.data.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_license(&self, key: &ObjectKey) -> Result<License>;

    /// Deletes the license only if the stored object is the one given.
    async fn delete_license(&self, license: &License) -> Result<()>;

    /// Creates a license object. Fails if the key is taken.
    async fn put_license(&self, license: License) -> Result<()>;

    async fn list_licenses(&self) -> Result<Vec<ObjectKey>>;

    async fn get_config(&self, key: &ObjectKey) -> Result<ConfigObject>;

    async fn put_config(&self, config: ConfigObject) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    licenses: RwLock<HashMap<ObjectKey, License>>,
    configs: RwLock<HashMap<ObjectKey, ConfigObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains_license(&self, key: &ObjectKey) -> bool {
        self.licenses.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_license(&self, key: &ObjectKey) -> Result<License> {
        self.licenses
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| IssuerError::read(format!("license {}", key), "not found"))
    }

    async fn delete_license(&self, license: &License) -> Result<()> {
        let mut licenses = self.licenses.write().await;
        match licenses.get(&license.key) {
            Some(stored) if stored == license => {
                licenses.remove(&license.key);
                Ok(())
            }
            _ => Err(IssuerError::Finalize(license.key.to_string())),
        }
    }

    async fn put_license(&self, license: License) -> Result<()> {
        license.validate()?;
        match self.licenses.write().await.entry(license.key.clone()) {
            Entry::Occupied(_) => Err(IssuerError::AlreadyExists(license.key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(license);
                Ok(())
            }
        }
    }

    async fn list_licenses(&self) -> Result<Vec<ObjectKey>> {
        let mut keys: Vec<ObjectKey> = self.licenses.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_config(&self, key: &ObjectKey) -> Result<ConfigObject> {
        self.configs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| IssuerError::read(format!("config {}", key), "not found"))
    }

    async fn put_config(&self, config: ConfigObject) -> Result<()> {
        self.configs.write().await.insert(config.key.clone(), config);
        Ok(())
    }
}
