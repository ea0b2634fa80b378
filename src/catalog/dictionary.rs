//! Interning dictionaries for repeated strings and URLs
//!
//! Persisted rows hold small integer ids instead of extension ids, API names,
//! argument blobs and URLs. Entries are owned collectively by the rows that
//! reference them: nothing is freed when a single row goes away, only by the
//! batch collection pass in `storage::store` once the surviving rows have been
//! scanned for live ids.

use crate::{Result, StorageError};
use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StringId = u32;
pub type UrlId = u32;

/// Bidirectional value <-> id table. Ids are never reused.
#[derive(Debug, Default)]
pub struct InternTable {
    ids: AHashMap<String, u32>,
    values: BTreeMap<u32, String>,
    next_id: u32,
}

/// Serialized form of one table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternTableSnapshot {
    pub next_id: u32,
    pub entries: Vec<(u32, String)>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `value`, assigning a fresh one on first sight.
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(value.to_string(), id);
        self.values.insert(id, value.to_string());
        id
    }

    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub fn resolve(&self, id: u32) -> Option<&str> {
        self.values.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ids present in the table but absent from `live`.
    pub fn unreferenced(&self, live: &RoaringBitmap) -> RoaringBitmap {
        self.values
            .keys()
            .copied()
            .filter(|id| !live.contains(*id))
            .collect()
    }

    /// Drop the given ids. Returns how many entries were removed.
    pub fn remove_ids(&mut self, ids: &RoaringBitmap) -> usize {
        let mut removed = 0;
        for id in ids.iter() {
            if let Some(value) = self.values.remove(&id) {
                self.ids.remove(&value);
                removed += 1;
            }
        }
        removed
    }

    pub fn snapshot(&self) -> InternTableSnapshot {
        InternTableSnapshot {
            next_id: self.next_id,
            entries: self
                .values
                .iter()
                .map(|(id, value)| (*id, value.clone()))
                .collect(),
        }
    }

    pub fn restore(snapshot: InternTableSnapshot) -> Result<Self> {
        let mut table = InternTable {
            ids: AHashMap::with_capacity(snapshot.entries.len()),
            values: BTreeMap::new(),
            next_id: snapshot.next_id,
        };
        for (id, value) in snapshot.entries {
            if id >= snapshot.next_id {
                return Err(StorageError::Corruption(format!(
                    "dictionary id {} is not below next id {}",
                    id, snapshot.next_id
                )));
            }
            if table.ids.insert(value.clone(), id).is_some() || table.values.insert(id, value).is_some() {
                return Err(StorageError::Corruption(format!(
                    "duplicate dictionary entry for id {}",
                    id
                )));
            }
        }
        Ok(table)
    }
}

/// The string and URL tables together.
#[derive(Debug, Default)]
pub struct Dictionary {
    pub strings: InternTable,
    pub urls: InternTable,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }
}
