//! Merge buffer - caller-facing accumulator for hot records
//!
//! Submissions merge into the active map under one lock. When a new key would
//! push the map past its threshold the whole map is sealed as an immutable
//! batch and a fresh active map takes the new key.
//!
//! # Concurrency Model
//! - Active buffer: mutable, accepts merges from any caller thread
//! - Immutable batches: sealed, waiting for the writer to flush them
//! - Queries read active + immutable + persistent store
//! - A batch leaves the immutable list only after the writer applied or
//!   dropped it, so there is no window where its counts are visible nowhere

use crate::types::{MergeKey, MergeValue};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A sealed set of merged entries
pub type Batch = Vec<(MergeKey, MergeValue)>;

pub struct MergeBuffer {
    /// Active buffer (mutable, accepts merges)
    active: Mutex<BTreeMap<MergeKey, MergeValue>>,

    /// Sealed batches, oldest first
    immutable: RwLock<Vec<Arc<Batch>>>,

    /// Maximum distinct keys in the active buffer
    threshold: usize,
}

impl MergeBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            active: Mutex::new(BTreeMap::new()),
            immutable: RwLock::new(Vec::new()),
            threshold: threshold.max(1),
        }
    }

    /// Merge an entry into the active buffer.
    ///
    /// # Returns
    /// - `true`: the previous contents were sealed, caller should signal a flush
    /// - `false`: merged or inserted without sealing
    pub fn insert(&self, key: MergeKey, value: MergeValue) -> bool {
        let mut active = self.active.lock();

        if let Some(existing) = active.get_mut(&key) {
            existing.absorb(&value);
            return false;
        }

        let sealed = active.len() >= self.threshold;
        if sealed {
            let batch: Batch = std::mem::take(&mut *active).into_iter().collect();
            self.immutable.write().push(Arc::new(batch));
        }

        active.insert(key, value);
        sealed
    }

    /// Seal the active buffer if it has entries. Returns whether anything was sealed.
    pub fn seal(&self) -> bool {
        let mut active = self.active.lock();
        if active.is_empty() {
            return false;
        }
        let batch: Batch = std::mem::take(&mut *active).into_iter().collect();
        self.immutable.write().push(Arc::new(batch));
        true
    }

    /// Oldest sealed batch, left in place until `retire` or `discard`.
    pub fn oldest(&self) -> Option<Arc<Batch>> {
        self.immutable.read().first().cloned()
    }

    /// Remove a batch once it is durable in the store.
    pub fn retire(&self, batch: &Arc<Batch>) {
        let mut immutable = self.immutable.write();
        if let Some(pos) = immutable.iter().position(|b| Arc::ptr_eq(b, batch)) {
            immutable.remove(pos);
        }
    }

    /// Drop a sealed batch without applying it.
    pub fn discard(&self, batch: &Arc<Batch>) -> usize {
        self.retire(batch);
        batch.len()
    }

    /// Clear matching URL fields in every buffered entry, active and sealed.
    ///
    /// A matching page URL takes the page title with it; the argument URL is
    /// checked on its own. Sealed batches are replaced, so only call this from
    /// the writer while no batch from `oldest` is in flight.
    ///
    /// # Returns
    /// Number of entries that had at least one field cleared
    pub fn scrub_urls<F>(&self, matches: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut active = self.active.lock();
        let mut immutable = self.immutable.write();
        let mut scrubbed = 0;

        for batch in immutable.iter_mut() {
            if !batch.iter().any(|(key, _)| key_matches(key, &matches)) {
                continue;
            }
            let mut entries = batch.as_ref().clone();
            for (key, value) in entries.iter_mut() {
                if scrub_entry(key, value, &matches) {
                    scrubbed += 1;
                }
            }
            *batch = Arc::new(entries);
        }

        if active.keys().any(|key| key_matches(key, &matches)) {
            let mut rebuilt = BTreeMap::new();
            for (mut key, mut value) in std::mem::take(&mut *active) {
                if scrub_entry(&mut key, &mut value, &matches) {
                    scrubbed += 1;
                }
                merge_into(&mut rebuilt, &key, &value);
            }
            *active = rebuilt;
        }

        scrubbed
    }

    /// All buffered entries matching `predicate`, merged across active and
    /// sealed batches. Neither source is modified.
    pub fn collect<F>(&self, predicate: F) -> Vec<(MergeKey, MergeValue)>
    where
        F: Fn(&MergeKey) -> bool,
    {
        // Lock order matches `insert`: active, then immutable.
        let active = self.active.lock();
        let immutable = self.immutable.read();

        let mut merged: BTreeMap<MergeKey, MergeValue> = BTreeMap::new();
        for (key, value) in immutable.iter().flat_map(|batch| batch.iter()) {
            if predicate(key) {
                merge_into(&mut merged, key, value);
            }
        }
        for (key, value) in active.iter() {
            if predicate(key) {
                merge_into(&mut merged, key, value);
            }
        }
        merged.into_iter().collect()
    }

    /// Distinct keys in the active buffer plus entries in sealed batches
    pub fn len(&self) -> usize {
        let active = self.active.lock();
        let immutable = self.immutable.read();
        active.len() + immutable.iter().map(|b| b.len()).sum::<usize>()
    }

    pub fn active_len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of sealed batches waiting for the writer
    pub fn immutable_count(&self) -> usize {
        self.immutable.read().len()
    }
}

fn key_matches<F: Fn(&str) -> bool>(key: &MergeKey, matches: &F) -> bool {
    key.page_url.as_deref().map_or(false, matches) || key.arg_url.as_deref().map_or(false, matches)
}

fn scrub_entry<F: Fn(&str) -> bool>(key: &mut MergeKey, value: &mut MergeValue, matches: &F) -> bool {
    let mut changed = false;
    if key.page_url.as_deref().map_or(false, matches) {
        key.page_url = None;
        value.page_title = None;
        changed = true;
    }
    if key.arg_url.as_deref().map_or(false, matches) {
        key.arg_url = None;
        changed = true;
    }
    changed
}

fn merge_into(merged: &mut BTreeMap<MergeKey, MergeValue>, key: &MergeKey, value: &MergeValue) {
    match merged.get_mut(key) {
        Some(existing) => existing.absorb(value),
        None => {
            merged.insert(key.clone(), value.clone());
        }
    }
}
