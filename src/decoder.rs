//! On-demand geometry decoding, fronted by a bounded LRU.
//!
//! Decoded polygons are shared as `Arc` values keyed by district id. The
//! cache is a warm-path accelerator, not a working set: capacities in the
//! tens are the intended range, and capacity 0 bypasses caching entirely.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use geo::MultiPolygon;
use lru::LruCache;

use crate::error::{DistrictError, Result};
use crate::geometry::decode_multipolygon;
use crate::store::DistrictStore;

/// Thread-safe LRU with an `Option`-gated inner cache so capacity 0 is a
/// valid, cache-free configuration.
pub struct BoundedLru<V: Clone> {
    inner: Option<Mutex<LruCache<String, V>>>,
    capacity: usize,
}

impl<V: Clone> BoundedLru<V> {
    pub fn new(capacity: usize) -> Self {
        let inner = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self { inner, capacity }
    }

    /// Fetch a value and mark its key most-recently used.
    pub fn get(&self, key: &str) -> Option<V> {
        let cache = self.inner.as_ref()?;
        cache.lock().unwrap().get(key).cloned()
    }

    /// Insert or refresh a key, evicting the least-recently-used entry when
    /// the cache is full. Refreshing an existing key does not change size.
    pub fn put(&self, key: String, value: V) {
        if let Some(cache) = &self.inner {
            cache.lock().unwrap().put(key, value);
        }
    }

    /// Whether the key is cached, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        match &self.inner {
            Some(cache) => cache.lock().unwrap().peek(key).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            Some(cache) => cache.lock().unwrap().len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Decodes stored geometry blobs into shareable polygons.
pub struct GeometryDecoder {
    store: Arc<DistrictStore>,
    cache: BoundedLru<Arc<MultiPolygon<f64>>>,
}

impl GeometryDecoder {
    pub fn new(store: Arc<DistrictStore>, cache_capacity: usize) -> Self {
        Self {
            store,
            cache: BoundedLru::new(cache_capacity),
        }
    }

    /// Geometry for one district, from cache or the store.
    ///
    /// An unknown id, an undecodable blob, and a blob that decodes to
    /// non-polygonal geometry are all `GeometryDecode` errors carrying the
    /// district id.
    pub async fn decode(&self, district_id: &str) -> Result<Arc<MultiPolygon<f64>>> {
        if let Some(hit) = self.cache.get(district_id) {
            return Ok(hit);
        }

        let blob = self
            .store
            .geometry_blob(district_id)
            .await?
            .ok_or_else(|| DistrictError::GeometryDecode {
                district_id: district_id.to_string(),
            })?;

        let geometry = decode_multipolygon(&blob).ok_or_else(|| DistrictError::GeometryDecode {
            district_id: district_id.to_string(),
        })?;

        let geometry = Arc::new(geometry);
        self.cache.put(district_id.to_string(), geometry.clone());
        Ok(geometry)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }
}
