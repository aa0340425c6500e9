//! Pluggable cache backends (spec.md §4.2): an in-memory map for a
//! single-process deployment, and a persistent `sled` tree so a producer
//! process (running the prefetch workers) and a consumer process (serving
//! reads only) can share a cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use log::warn;

use crate::error::{CacheError, CacheResult};
use crate::kind::DatumKind;

pub const PERSISTENT_TTL: Duration = Duration::from_secs(10 * 60);

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, kind: DatumKind, block: i64) -> CacheResult<Option<Vec<u8>>>;
    async fn put(&self, kind: DatumKind, block: i64, bytes: Vec<u8>) -> CacheResult<()>;
}

struct Entry {
    bytes: Vec<u8>,
    inserted_at: Instant,
}

/// Unbounded in-memory map keyed by `(kind, block)`. Never evicts on its
/// own; callers rely on the ledger's GC horizon (spec.md §4.3) to keep the
/// working set bounded.
#[derive(Default)]
pub struct InMemoryBackend {
    map: DashMap<(u8, i64), Entry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, kind: DatumKind, block: i64) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.map.get(&(kind.tag(), block)).map(|e| e.bytes.clone()))
    }

    async fn put(&self, kind: DatumKind, block: i64, bytes: Vec<u8>) -> CacheResult<()> {
        self.map.insert(
            (kind.tag(), block),
            Entry {
                bytes,
                inserted_at: Instant::now(),
            },
        );
        Ok(())
    }
}

/// Persistent backend over a `sled` tree. Entries older than
/// [`PERSISTENT_TTL`] are treated as misses and lazily removed on read;
/// `sled` itself has no TTL support.
pub struct SledBackend {
    tree: sled::Tree,
}

impl SledBackend {
    pub fn open(db: &sled::Db, tree_name: &str) -> CacheResult<Self> {
        let tree = db
            .open_tree(tree_name)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self { tree })
    }

    fn key(kind: DatumKind, block: i64) -> [u8; 9] {
        let mut k = [0u8; 9];
        k[0] = kind.tag();
        k[1..9].copy_from_slice(&block.to_be_bytes());
        k
    }
}

#[async_trait]
impl CacheBackend for SledBackend {
    async fn get(&self, kind: DatumKind, block: i64) -> CacheResult<Option<Vec<u8>>> {
        let key = Self::key(kind, block);
        let Some(raw) = self
            .tree
            .get(key)
            .map_err(|e| CacheError::Backend(e.to_string()))?
        else {
            return Ok(None);
        };
        if raw.len() < 8 {
            return Ok(None);
        }
        let inserted_at_secs = u64::from_be_bytes(raw[..8].try_into().unwrap());
        let now_secs = compute_validator_common::time::get_current_time_in_seconds();
        if now_secs.saturating_sub(inserted_at_secs) > PERSISTENT_TTL.as_secs() {
            if let Err(e) = self.tree.remove(key) {
                warn!("failed to evict expired persistent cache entry: {e}");
            }
            return Ok(None);
        }
        Ok(Some(raw[8..].to_vec()))
    }

    async fn put(&self, kind: DatumKind, block: i64, bytes: Vec<u8>) -> CacheResult<()> {
        let key = Self::key(kind, block);
        let now_secs = compute_validator_common::time::get_current_time_in_seconds();
        let mut value = Vec::with_capacity(8 + bytes.len());
        value.extend_from_slice(&now_secs.to_be_bytes());
        value.extend_from_slice(&bytes);
        self.tree
            .insert(key, value)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }
}
