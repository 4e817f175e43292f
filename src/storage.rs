//! Extension storage surface and the typed reads the engine performs on it.
//!
//! The engine only ever reads these keys. Writes belong to the settings UI.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

pub const EXTENSION_ENABLED_KEY: &str = "extensionEnabled";
pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const BLACKLIST_KEY: &str = "blacklist";

/// Blacklist used whenever the stored one cannot be read. Blocking is
/// best-effort, so an unreadable list blocks nothing.
pub const EMPTY_BLACKLIST: &[String] = &[];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Local,
    Sync,
    Session,
    Managed,
}

impl StorageArea {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sync => "sync",
            Self::Session => "session",
            Self::Managed => "managed",
        }
    }

    pub fn from_area_name(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "sync" => Some(Self::Sync),
            "session" => Some(Self::Session),
            "managed" => Some(Self::Managed),
            _ => None,
        }
    }

    /// Areas whose change notifications the content script reacts to.
    pub fn is_watched(self) -> bool {
        matches!(self, Self::Local | Self::Sync)
    }
}

#[async_trait]
pub trait ExtensionStorage: Send + Sync {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>>;
}

/// Reads the blacklist from the sync area, falling back to
/// [`EMPTY_BLACKLIST`] when the read fails or the value is not an array.
pub async fn read_blacklist(storage: &dyn ExtensionStorage) -> Vec<String> {
    match storage.get(StorageArea::Sync, BLACKLIST_KEY).await {
        Ok(Some(Value::Array(items))) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(pattern) if !pattern.is_empty() => Some(pattern),
                _ => None,
            })
            .collect(),
        Ok(Some(other)) => {
            warn!("Blacklist in storage is not an array: {}", other);
            EMPTY_BLACKLIST.to_vec()
        }
        Ok(None) => EMPTY_BLACKLIST.to_vec(),
        Err(e) => {
            warn!("Failed to read blacklist from storage: {:#}", e);
            EMPTY_BLACKLIST.to_vec()
        }
    }
}

/// Only an explicit `false` disables the extension.
pub async fn read_extension_enabled(storage: &dyn ExtensionStorage) -> Result<bool> {
    let value = storage
        .get(StorageArea::Local, EXTENSION_ENABLED_KEY)
        .await
        .context("Failed to read extension enabled flag")?;
    Ok(!matches!(value, Some(Value::Bool(false))))
}

pub async fn read_auth_token(storage: &dyn ExtensionStorage) -> Result<Option<String>> {
    let value = storage
        .get(StorageArea::Local, AUTH_TOKEN_KEY)
        .await
        .context("Failed to read auth token")?;
    Ok(match value {
        Some(Value::String(token)) if !token.is_empty() => Some(token),
        _ => None,
    })
}

pub async fn read_authenticated(storage: &dyn ExtensionStorage) -> Result<bool> {
    Ok(read_auth_token(storage).await?.is_some())
}

/// Key/value storage held in memory, one map per area.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    areas: RwLock<FxHashMap<StorageArea, FxHashMap<String, Value>>>,
    failing: RwLock<Vec<StorageArea>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, area: StorageArea, key: &str, value: Value) {
        let mut areas = self.areas.write().unwrap_or_else(PoisonError::into_inner);
        areas.entry(area).or_default().insert(key.to_string(), value);
    }

    pub fn remove(&self, area: StorageArea, key: &str) {
        let mut areas = self.areas.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = areas.get_mut(&area) {
            map.remove(key);
        }
    }

    /// Makes every read from `area` fail until cleared.
    pub fn set_failing(&self, area: StorageArea, failing: bool) {
        let mut areas = self.failing.write().unwrap_or_else(PoisonError::into_inner);
        areas.retain(|a| *a != area);
        if failing {
            areas.push(area);
        }
    }
}

#[async_trait]
impl ExtensionStorage for MemoryStorage {
    async fn get(&self, area: StorageArea, key: &str) -> Result<Option<Value>> {
        let failing = self.failing.read().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&area) {
            anyhow::bail!("storage area `{}` is unavailable", area.as_str());
        }
        drop(failing);

        let areas = self.areas.read().unwrap_or_else(PoisonError::into_inner);
        Ok(areas.get(&area).and_then(|map| map.get(key)).cloned())
    }
}
