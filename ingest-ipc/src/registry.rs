// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide mapping from region name to a live region handle and its
//! registry metadata.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::IpcError;
use crate::region::Region;

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Which side of the protocol created the local registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Server,
    Client,
}

/// Bookkeeping kept alongside a live [`Region`] handle.
pub struct RegionMetadata {
    pub created_at: f64,
    pub owner: Owner,
    access_count: AtomicU64,
}

impl RegionMetadata {
    fn new(owner: Owner) -> Self {
        RegionMetadata {
            created_at: now_secs(),
            owner,
            access_count: AtomicU64::new(0),
        }
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    fn record_access(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

struct Entry {
    region: Arc<Region>,
    metadata: Arc<RegionMetadata>,
}

/// Process-wide registry of live shared-memory regions.
///
/// All map mutations (insert/remove) are serialized by a single mutex, per
/// structural changes; a region's own payload reads and writes go straight to the `Region`
/// handle and are not globally serialized.
#[derive(Default)]
pub struct RegionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates (or, with `exist_ok`, adopts) a named region.
    ///
    /// - If a local entry for `name` already exists: with `exist_ok`, the old
    ///   entry is closed first; otherwise this fails with [`IpcError::AlreadyExists`].
    /// - If the OS namespace collides and `exist_ok` is set, the existing
    ///   region is adopted without reinitializing its header; otherwise this
    ///   fails with [`IpcError::AlreadyExists`].
    pub fn create(
        &self,
        name: &str,
        payload_size: u32,
        data_type: u32,
        exist_ok: bool,
    ) -> Result<Arc<Region>, IpcError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(name) {
            if !exist_ok {
                return Err(IpcError::AlreadyExists(name.to_owned()));
            }
            if let Some(old) = entries.remove(name) {
                drop(entries);
                Arc::try_unwrap(old.region).ok().map(Region::close);
                entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            }
        }

        let region = match Region::create(name, payload_size, data_type) {
            Ok(region) => region,
            Err(IpcError::Io { .. }) if exist_ok => {
                // OS-level collision: adopt the existing region as-is.
                info!(region = name, "adopting pre-existing shared-memory object");
                Region::open(name)?
            }
            Err(e) => return Err(e),
        };

        let entry = Entry {
            region: Arc::new(region),
            metadata: Arc::new(RegionMetadata::new(Owner::Server)),
        };
        let handle = entry.region.clone();
        entries.insert(name.to_owned(), entry);
        debug!(region = name, "created region");
        Ok(handle)
    }

    /// Attaches to an existing OS region, registering it locally with
    /// `owner = client` if no local entry existed yet.
    pub fn open(&self, name: &str) -> Result<Arc<Region>, IpcError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get(name) {
            entry.metadata.record_access();
            return Ok(entry.region.clone());
        }
        let region = Arc::new(Region::open(name)?);
        entries.insert(
            name.to_owned(),
            Entry {
                region: region.clone(),
                metadata: Arc::new(RegionMetadata::new(Owner::Client)),
            },
        );
        debug!(region = name, "opened region");
        Ok(region)
    }

    /// Looks up an already-registered region without touching the OS namespace.
    pub fn get(&self, name: &str) -> Option<Arc<Region>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(name).map(|entry| {
            entry.metadata.record_access();
            entry.region.clone()
        })
    }

    /// Detaches the local mapping and unlinks the OS name. Idempotent.
    pub fn close(&self, name: &str) {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(name)
        };
        if let Some(entry) = removed {
            if let Ok(region) = Arc::try_unwrap(entry.region) {
                region.close();
            }
        }
    }

    /// Snapshots `(name, header, metadata)` for every locally-known region,
    /// backing `GET /shm/list`.
    pub fn list(&self) -> Vec<(String, crate::frame::Header, u64, f64, Owner)> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter_map(|(name, entry)| {
                let header = entry.region.read_header().ok()?;
                Some((
                    name.clone(),
                    header,
                    entry.metadata.access_count(),
                    entry.metadata.created_at,
                    entry.metadata.owner,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!(
            "ingest-ipc-test-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn create_then_lookup_roundtrips() {
        let registry = RegionRegistry::new();
        let name = unique_name("create");
        let region = registry.create(&name, 1024, 0, false).unwrap();
        let header = region.read_header().unwrap();
        assert_eq!(header.buffer_size, 1024);
        assert!(header.is_valid());
        assert!(registry.get(&name).is_some());
        registry.close(&name);
        assert!(registry.get(&name).is_none());
    }

    #[test]
    fn create_without_exist_ok_rejects_duplicate() {
        let registry = RegionRegistry::new();
        let name = unique_name("dup");
        registry.create(&name, 64, 0, false).unwrap();
        let err = registry.create(&name, 64, 0, false).unwrap_err();
        assert!(matches!(err, IpcError::AlreadyExists(_)));
        registry.close(&name);
    }

    #[test]
    fn create_with_exist_ok_replaces_local_entry() {
        let registry = RegionRegistry::new();
        let name = unique_name("replace");
        registry.create(&name, 64, 0, false).unwrap();
        let region = registry.create(&name, 128, 0, true).unwrap();
        assert_eq!(region.read_header().unwrap().buffer_size, 128);
        registry.close(&name);
    }
}
