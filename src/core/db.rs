//! Local key-value persistence for key material.
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Kind of object stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjType {
    PgpKey,
    NaclKey,
    Alias,
}

impl ObjType {
    pub fn as_byte(self) -> u8 {
        match self {
            ObjType::PgpKey => 0x03,
            ObjType::NaclKey => 0x04,
            ObjType::Alias => 0x05,
        }
    }
}

/// Typed key into the local store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbKey {
    pub typ: ObjType,
    pub key: String,
}

impl DbKey {
    pub fn new(typ: ObjType, key: impl Into<String>) -> Self {
        Self {
            typ,
            key: key.into(),
        }
    }
}

impl fmt::Display for DbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{}", self.typ.as_byte(), self.key)
    }
}

/// Storage collaborator used to persist and reload key bundles.
pub trait LocalDb: Send + Sync {
    /// Store `value` under `key`, and make each alias resolve to it.
    fn put(&self, key: &DbKey, aliases: &[DbKey], value: Value) -> Result<()>;

    /// Fetch the value under `key` (or an alias of it).
    fn get(&self, key: &DbKey) -> Result<Option<Value>>;

    fn delete(&self, key: &DbKey) -> Result<()>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryDb {
    objects: Mutex<HashMap<DbKey, Value>>,
    aliases: Mutex<HashMap<DbKey, DbKey>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, key: &DbKey) -> Result<DbKey> {
        let aliases = self
            .aliases
            .lock()
            .map_err(|_| anyhow!("alias table lock poisoned"))?;
        Ok(aliases.get(key).cloned().unwrap_or_else(|| key.clone()))
    }
}

impl LocalDb for MemoryDb {
    fn put(&self, key: &DbKey, aliases: &[DbKey], value: Value) -> Result<()> {
        {
            let mut objects = self
                .objects
                .lock()
                .map_err(|_| anyhow!("object table lock poisoned"))?;
            objects.insert(key.clone(), value);
        }
        let mut table = self
            .aliases
            .lock()
            .map_err(|_| anyhow!("alias table lock poisoned"))?;
        for alias in aliases {
            table.insert(alias.clone(), key.clone());
        }
        log::debug!("Stored {} with {} alias(es)", key, aliases.len());
        Ok(())
    }

    fn get(&self, key: &DbKey) -> Result<Option<Value>> {
        let key = self.resolve(key)?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("object table lock poisoned"))?;
        Ok(objects.get(&key).cloned())
    }

    fn delete(&self, key: &DbKey) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| anyhow!("object table lock poisoned"))?;
        objects.remove(key);
        let mut table = self
            .aliases
            .lock()
            .map_err(|_| anyhow!("alias table lock poisoned"))?;
        table.retain(|_, target| target != key);
        Ok(())
    }
}
