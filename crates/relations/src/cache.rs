//! Relation Cache - longer-lived snapshots of loaded relationship fields
//!
//! Outlives a single session. Sessions read a snapshot instead of loading from
//! storage and publish snapshots of loaded fields back. Only fully loaded
//! values are cached; pending mutations of unloaded fields never are.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use crate::config::InstanceCacheConfig;
use crate::key::{EntityId, EntityIdentity, PrimaryKey};

/// Cache key: one relationship field of one entity instance
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    identity: EntityIdentity,
    field: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    keys: Vec<PrimaryKey>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, config: &InstanceCacheConfig) -> bool {
        config
            .ttl
            .map(|ttl| self.created_at.elapsed() > ttl)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
struct CacheMetrics {
    hits: usize,
    misses: usize,
    stores: usize,
    expired: usize,
    evicted: usize,
}

/// Public cache statistics
#[derive(Debug, Clone)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub entity_type_counts: HashMap<EntityId, usize>,
    pub hits: usize,
    pub misses: usize,
    pub stores: usize,
    pub expired: usize,
    pub evicted: usize,
    pub hit_rate: f64,
}

/// Instance cache shared by all sessions of a schema
#[derive(Debug)]
pub struct RelationCache {
    entries: DashMap<CacheKey, CacheEntry>,
    config: InstanceCacheConfig,
    metrics: Mutex<CacheMetrics>,
}

impl RelationCache {
    pub fn new(config: InstanceCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            metrics: Mutex::new(CacheMetrics::default()),
        }
    }

    pub fn config(&self) -> &InstanceCacheConfig {
        &self.config
    }

    /// Publish the loaded keys of one field
    pub fn store(&self, identity: &EntityIdentity, field: usize, keys: Vec<PrimaryKey>) {
        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            CacheKey {
                identity: identity.clone(),
                field,
            },
            CacheEntry {
                keys,
                created_at: Instant::now(),
            },
        );
        self.metrics.lock().stores += 1;
    }

    /// Cached keys of one field, if present and not expired
    pub fn get(&self, identity: &EntityIdentity, field: usize) -> Option<Vec<PrimaryKey>> {
        let key = CacheKey {
            identity: identity.clone(),
            field,
        };

        let expired = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired(&self.config) => {
                self.metrics.lock().hits += 1;
                return Some(entry.keys.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(&key);
        }
        let mut metrics = self.metrics.lock();
        metrics.misses += 1;
        if expired {
            metrics.expired += 1;
        }
        None
    }

    /// Drop the snapshot of one field
    pub fn invalidate(&self, identity: &EntityIdentity, field: usize) -> bool {
        self.entries
            .remove(&CacheKey {
                identity: identity.clone(),
                field,
            })
            .is_some()
    }

    /// Drop every snapshot of an entity instance
    pub fn invalidate_entity(&self, identity: &EntityIdentity) {
        self.entries.retain(|key, _| &key.identity != identity);
    }

    pub fn clear_all(&self) {
        self.entries.clear();
        *self.metrics.lock() = CacheMetrics::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired snapshots
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(&self.config));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.metrics.lock().expired += removed;
        }
        removed
    }

    pub fn stats(&self) -> CacheStatistics {
        let metrics = self.metrics.lock().clone();

        let mut entity_type_counts = HashMap::new();
        for entry in self.entries.iter() {
            *entity_type_counts.entry(entry.key().identity.entity).or_insert(0) += 1;
        }

        CacheStatistics {
            total_entries: self.entries.len(),
            entity_type_counts,
            hits: metrics.hits,
            misses: metrics.misses,
            stores: metrics.stores,
            expired: metrics.expired,
            evicted: metrics.evicted,
            hit_rate: if metrics.hits + metrics.misses > 0 {
                metrics.hits as f64 / (metrics.hits + metrics.misses) as f64
            } else {
                0.0
            },
        }
    }

    /// Evict the oldest snapshots down to 80% of capacity
    fn evict_oldest(&self) {
        let target = (self.config.max_entries as f64 * 0.8) as usize;

        let mut ages: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().created_at))
            .collect();
        ages.sort_by_key(|(_, created_at)| *created_at);

        let excess = ages.len().saturating_sub(target);
        for (key, _) in ages.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        self.metrics.lock().evicted += excess;
    }
}

impl Default for RelationCache {
    fn default() -> Self {
        Self::new(InstanceCacheConfig::default())
    }
}
