// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, bail};

use crate::{
    cfg::config::Config,
    storage::{SharedBlockStore, file::FileBlockStore},
};

/// One exported target: unique iqn name, optional alias, backing store.
pub struct TargetEntry {
    pub name: String,
    pub alias: Option<String>,
    pub store: SharedBlockStore,
}

impl std::fmt::Debug for TargetEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetEntry")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("size_in_bytes", &self.store.size_in_bytes())
            .finish()
    }
}

/// Registry of exported targets, keyed by name.
///
/// Read-mostly: lookups take the shared lock, add/remove the exclusive
/// one.  Sessions hold `Arc<TargetEntry>` references, which is what
/// makes in-use removal detectable.
#[derive(Default)]
pub struct TargetRegistry {
    targets: RwLock<Vec<Arc<TargetEntry>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the configuration, opening every
    /// backing file.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let registry = Self::new();
        for t in &cfg.targets {
            let store = FileBlockStore::open(&t.storage_file.file_path)
                .with_context(|| format!("target {:?}", t.target_name))?;
            registry.insert(
                t.target_name.clone(),
                t.target_alias.clone(),
                Arc::new(store),
            )?;
        }
        Ok(registry)
    }

    pub fn insert(
        &self,
        name: String,
        alias: Option<String>,
        store: SharedBlockStore,
    ) -> Result<Arc<TargetEntry>> {
        let mut targets = self.write_locked()?;
        if targets.iter().any(|t| t.name == name) {
            bail!("target {name:?} is already registered");
        }
        let entry = Arc::new(TargetEntry { name, alias, store });
        targets.push(Arc::clone(&entry));
        Ok(entry)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<TargetEntry>> {
        self.targets
            .read()
            .ok()?
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Removes a target; refused while any session still references it.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut targets = self.write_locked()?;
        let idx = targets
            .iter()
            .position(|t| t.name == name)
            .with_context(|| format!("target {name:?} not found"))?;
        // one reference is the registry's own
        if Arc::strong_count(&targets[idx]) > 1 {
            bail!("target {name:?} is in use");
        }
        targets.remove(idx);
        Ok(())
    }

    /// Snapshot of all entries, in registration order (SendTargets).
    pub fn entries(&self) -> Vec<Arc<TargetEntry>> {
        self.targets.read().map(|t| t.clone()).unwrap_or_default()
    }

    fn write_locked(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Arc<TargetEntry>>>> {
        self.targets
            .write()
            .map_err(|_| anyhow::anyhow!("target registry lock poisoned"))
    }
}
