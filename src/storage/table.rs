//! Merged-row table
//!
//! Rows are addressed by a monotonically increasing `RowId` and indexed by their
//! interned key for upserts. After a URL scrub two rows may end up with the same
//! key; both are kept and the index points at the lower row id.

use crate::catalog::{StringId, UrlId};
use crate::types::{ActionType, DayBucket, MergeValue, RowId};
use crate::{Result, StorageError};
use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Interned form of a `MergeKey`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredKey {
    pub extension: StringId,
    pub day: DayBucket,
    pub action_type: ActionType,
    pub api: StringId,
    pub args: Option<StringId>,
    pub page_url: Option<UrlId>,
    pub arg_url: Option<UrlId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRow {
    pub key: StoredKey,
    pub value: MergeValue,
}

/// Dictionary ids referenced by at least one row
#[derive(Debug, Default)]
pub struct LiveIds {
    pub strings: RoaringBitmap,
    pub urls: RoaringBitmap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub next_row_id: RowId,
    pub rows: Vec<(RowId, PersistedRow)>,
}

#[derive(Debug, Default)]
pub struct ActivityTable {
    rows: BTreeMap<RowId, PersistedRow>,
    index: AHashMap<StoredKey, RowId>,
    next_row_id: RowId,
}

impl ActivityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `value` into the row with `key`, inserting a new row on miss.
    pub fn upsert(&mut self, key: StoredKey, value: &MergeValue) -> RowId {
        if let Some(&row_id) = self.index.get(&key) {
            if let Some(row) = self.rows.get_mut(&row_id) {
                row.value.absorb(value);
                return row_id;
            }
        }

        let row_id = self.next_row_id;
        self.next_row_id += 1;
        let mut initial = value.clone();
        initial.count = initial.count.max(1);
        self.rows.insert(row_id, PersistedRow { key, value: initial });
        self.index.insert(key, row_id);
        row_id
    }

    pub fn get(&self, row_id: RowId) -> Option<&PersistedRow> {
        self.rows.get(&row_id)
    }

    pub fn find(&self, key: &StoredKey) -> Option<RowId> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RowId, &PersistedRow)> {
        self.rows.iter().map(|(id, row)| (*id, row))
    }

    /// Rows of one extension on one day
    pub fn rows_for_day(&self, extension: StringId, day: DayBucket) -> impl Iterator<Item = &PersistedRow> {
        self.rows
            .values()
            .filter(move |row| row.key.extension == extension && row.key.day == day)
    }

    /// Delete every row whose bucket is strictly before `cutoff`.
    pub fn delete_older_than(&mut self, cutoff: DayBucket) -> usize {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.key.day >= cutoff);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.rebuild_index();
        }
        removed
    }

    /// Clear URL fields in place. Returns the number of rows touched.
    ///
    /// A matching page URL also clears the page title. The two fields are tested
    /// independently; no row is removed and no count changes.
    pub fn scrub_urls<F>(&mut self, matches: F) -> usize
    where
        F: Fn(UrlId) -> bool,
    {
        let mut touched = 0;
        for row in self.rows.values_mut() {
            let mut changed = false;
            if row.key.page_url.map_or(false, &matches) {
                row.key.page_url = None;
                row.value.page_title = None;
                changed = true;
            }
            if row.key.arg_url.map_or(false, &matches) {
                row.key.arg_url = None;
                changed = true;
            }
            if changed {
                touched += 1;
            }
        }
        if touched > 0 {
            self.rebuild_index();
        }
        touched
    }

    /// Every dictionary id referenced by a surviving row
    pub fn live_ids(&self) -> LiveIds {
        let mut live = LiveIds::default();
        for row in self.rows.values() {
            let key = &row.key;
            live.strings.insert(key.extension);
            live.strings.insert(key.api);
            if let Some(args) = key.args {
                live.strings.insert(args);
            }
            if let Some(url) = key.page_url {
                live.urls.insert(url);
            }
            if let Some(url) = key.arg_url {
                live.urls.insert(url);
            }
        }
        live
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (id, row) in &self.rows {
            self.index.entry(row.key).or_insert(*id);
        }
    }

    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            next_row_id: self.next_row_id,
            rows: self.rows.iter().map(|(id, row)| (*id, row.clone())).collect(),
        }
    }

    pub fn restore(snapshot: TableSnapshot) -> Result<Self> {
        let mut table = ActivityTable {
            rows: BTreeMap::new(),
            index: AHashMap::new(),
            next_row_id: snapshot.next_row_id,
        };
        for (id, row) in snapshot.rows {
            if id >= snapshot.next_row_id || row.value.count == 0 {
                return Err(StorageError::Corruption(format!("invalid row {} in snapshot", id)));
            }
            table.rows.insert(id, row);
        }
        table.rebuild_index();
        Ok(table)
    }
}
