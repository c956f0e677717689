//! Per-execution field-value cache.
//!
//! Keyed by `(entityType, entityId, field, timeBucket)` so that two rule
//! executions for the same entity within the same bucket window reuse a
//! fetched value instead of re-issuing the request, while a value from an
//! hour ago (bucket width is configurable) is treated as stale (§4.4).

use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::field::FieldName;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    entity_type: String,
    entity_id: String,
    field: FieldName,
    bucket: u64,
}

/// Identifies the entity a resolution run is fetching fields for.
#[derive(Debug, Clone)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

pub struct ResolutionCache {
    store: DashMap<CacheKey, Value>,
    bucket_width: Duration,
}

impl ResolutionCache {
    pub fn new(bucket_width: Duration) -> Self {
        ResolutionCache { store: DashMap::new(), bucket_width }
    }

    fn bucket(&self) -> u64 {
        let width_ms = self.bucket_width.as_millis().max(1) as u64;
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        now_ms / width_ms
    }

    pub fn get(&self, entity: &EntityRef, field: &FieldName) -> Option<Value> {
        let key = CacheKey {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
            field: field.clone(),
            bucket: self.bucket(),
        };
        self.store.get(&key).map(|v| v.clone())
    }

    pub fn put(&self, entity: &EntityRef, field: &FieldName, value: Value) {
        let key = CacheKey {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
            field: field.clone(),
            bucket: self.bucket(),
        };
        self.store.insert(key, value);
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
