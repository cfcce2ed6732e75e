//! Local cache of what one peer advertises.
//!
//! Each capability kind holds an immutable snapshot behind an `Arc`. Readers
//! clone the `Arc` under a read lock and never see a half-applied refresh;
//! a refresh builds the replacement off-lock and swaps it in.
//!
//! Population is lazy. After that the cache only changes through
//! [`CapabilityRegistry::refresh`] or the invalidation calls, which mark
//! names (or a whole kind) stale so the next lookup refreshes first.

use crate::mcp::capability::{CapabilityDescriptor, CapabilityKind};
use crate::mcp::error::BridgeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Where the registry fetches descriptors from.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    fn peer_id(&self) -> &str;

    async fn fetch(&self, kind: CapabilityKind) -> Result<Vec<CapabilityDescriptor>, BridgeError>;
}

pub type Snapshot = Arc<Vec<CapabilityDescriptor>>;

#[derive(Debug, Default)]
struct KindCache {
    snapshot: Option<Snapshot>,
    /// Stale name -> mark number. Marks newer than a refresh's start survive it.
    stale: HashMap<String, u64>,
    all_stale: Option<u64>,
    next_mark: u64,
    generation: u64,
}

impl KindCache {
    fn mark(&mut self) -> u64 {
        self.next_mark += 1;
        self.next_mark
    }

    fn is_stale(&self, name: &str) -> bool {
        if self.all_stale.is_some() || self.stale.contains_key(name) {
            return true;
        }
        // Notifications may name a resource by URI or by display name.
        self.snapshot.as_ref().is_some_and(|snapshot| {
            snapshot
                .iter()
                .filter(|descriptor| descriptor.matches(name))
                .any(|descriptor| {
                    self.stale.contains_key(descriptor.key())
                        || self.stale.contains_key(&descriptor.name)
                })
        })
    }
}

pub struct CapabilityRegistry {
    source: Arc<dyn CapabilitySource>,
    caches: [RwLock<KindCache>; 3],
    refresh_locks: [Mutex<()>; 3],
}

fn slot(kind: CapabilityKind) -> usize {
    match kind {
        CapabilityKind::Tool => 0,
        CapabilityKind::Resource => 1,
        CapabilityKind::Prompt => 2,
    }
}

impl CapabilityRegistry {
    pub fn new(source: Arc<dyn CapabilitySource>) -> Self {
        Self {
            source,
            caches: Default::default(),
            refresh_locks: Default::default(),
        }
    }

    pub fn peer_id(&self) -> &str {
        self.source.peer_id()
    }

    fn cache(&self, kind: CapabilityKind) -> &RwLock<KindCache> {
        &self.caches[slot(kind)]
    }

    pub async fn list_tools(&self) -> Result<Snapshot, BridgeError> {
        self.list(CapabilityKind::Tool).await
    }

    pub async fn list_resources(&self) -> Result<Snapshot, BridgeError> {
        self.list(CapabilityKind::Resource).await
    }

    pub async fn list_prompts(&self) -> Result<Snapshot, BridgeError> {
        self.list(CapabilityKind::Prompt).await
    }

    /// Current entries of one kind, fetching on first use or after the whole
    /// kind was invalidated. Per-name stale marks do not force a refresh here.
    pub async fn list(&self, kind: CapabilityKind) -> Result<Snapshot, BridgeError> {
        {
            let cache = self.cache(kind).read().await;
            if let (Some(snapshot), None) = (&cache.snapshot, cache.all_stale) {
                return Ok(Arc::clone(snapshot));
            }
        }
        self.refresh(kind).await
    }

    /// Looks up one entry. A stale name is refreshed before answering; a
    /// name that is simply absent from a current cache is `NotFound`.
    pub async fn find(
        &self,
        kind: CapabilityKind,
        name: &str,
    ) -> Result<CapabilityDescriptor, BridgeError> {
        let snapshot = {
            let cache = self.cache(kind).read().await;
            match &cache.snapshot {
                Some(snapshot) if !cache.is_stale(name) => Some(Arc::clone(snapshot)),
                _ => None,
            }
        };
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                debug!(peer_id = %self.peer_id(), kind = %kind, name = %name, "Refreshing before lookup");
                self.refresh(kind).await?
            }
        };

        snapshot
            .iter()
            .find(|descriptor| descriptor.matches(name))
            .cloned()
            .ok_or_else(|| BridgeError::not_found(self.peer_id(), kind, name))
    }

    /// Fetches the kind from the peer and swaps the result in. On failure the
    /// previous snapshot and stale marks stay as they were.
    pub async fn refresh(&self, kind: CapabilityKind) -> Result<Snapshot, BridgeError> {
        let _serialized = self.refresh_locks[slot(kind)].lock().await;
        let started_at = self.cache(kind).read().await.next_mark;

        let fresh = Arc::new(self.source.fetch(kind).await?);

        let mut cache = self.cache(kind).write().await;
        cache.snapshot = Some(Arc::clone(&fresh));
        cache.stale.retain(|_, mark| *mark > started_at);
        if cache.all_stale.is_some_and(|mark| mark <= started_at) {
            cache.all_stale = None;
        }
        cache.generation += 1;
        debug!(
            peer_id = %self.peer_id(),
            kind = %kind,
            entries = fresh.len(),
            generation = cache.generation,
            "Capability cache refreshed"
        );
        Ok(fresh)
    }

    /// Marks individual names stale; the next `find` for any of them
    /// refreshes the kind first.
    pub async fn invalidate<I, S>(&self, kind: CapabilityKind, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cache = self.cache(kind).write().await;
        for name in names {
            let mark = cache.mark();
            cache.stale.insert(name.into(), mark);
        }
    }

    /// Marks the whole kind stale; the next `list` or `find` refreshes it.
    pub async fn invalidate_all(&self, kind: CapabilityKind) {
        let mut cache = self.cache(kind).write().await;
        let mark = cache.mark();
        cache.all_stale = Some(mark);
    }

    /// The cached snapshot, without fetching.
    pub async fn cached(&self, kind: CapabilityKind) -> Option<Snapshot> {
        self.cache(kind).read().await.snapshot.clone()
    }

    /// Number of successful refreshes of this kind.
    pub async fn generation(&self, kind: CapabilityKind) -> u64 {
        self.cache(kind).read().await.generation
    }

    pub async fn is_stale(&self, kind: CapabilityKind, name: &str) -> bool {
        self.cache(kind).read().await.is_stale(name)
    }
}
