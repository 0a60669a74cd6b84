//! Named cache regions with time-based expiry for read-mostly listings.
//!
//! Overview pages re-read a whole type on every request. An embedder can
//! hand the store a [`CacheProvider`] and tag those reads with a region
//! name; entries then serve from memory until the TTL lapses or a write to
//! the type drops them.

use std::{
  collections::HashMap,
  sync::Mutex,
  time::{Duration, Instant},
};

use gantry_core::record::Record;

struct CacheEntry {
  stored:  Instant,
  records: Vec<Record>,
}

/// Shared, thread-safe record cache keyed by `(region, key)`.
///
/// Keys are either a type name (whole listings) or `type:id` (single
/// fetches); [`invalidate_type`](Self::invalidate_type) covers both forms.
pub struct CacheProvider {
  ttl:     Duration,
  regions: Mutex<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl CacheProvider {
  pub fn new(ttl: Duration) -> Self {
    CacheProvider { ttl, regions: Mutex::new(HashMap::new()) }
  }

  /// A still-fresh entry, or `None`. Expired entries are dropped on read.
  pub fn get(&self, region: &str, key: &str) -> Option<Vec<Record>> {
    let mut regions = self.regions.lock().unwrap();
    let entries = regions.get_mut(region)?;
    match entries.get(key) {
      Some(entry) if entry.stored.elapsed() < self.ttl => {
        Some(entry.records.clone())
      }
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  pub fn put(&self, region: &str, key: &str, records: Vec<Record>) {
    self
      .regions
      .lock()
      .unwrap()
      .entry(region.to_owned())
      .or_default()
      .insert(key.to_owned(), CacheEntry { stored: Instant::now(), records });
  }

  /// Drop every entry for `type_name` across all regions. Write paths call
  /// this after committing.
  pub fn invalidate_type(&self, type_name: &str) {
    let prefix = format!("{type_name}:");
    let mut regions = self.regions.lock().unwrap();
    for entries in regions.values_mut() {
      entries.retain(|key, _| key != type_name && !key.starts_with(&prefix));
    }
  }

  /// Drop one region wholesale.
  pub fn invalidate_region(&self, region: &str) {
    self.regions.lock().unwrap().remove(region);
  }

  pub fn clear(&self) {
    self.regions.lock().unwrap().clear();
  }
}
