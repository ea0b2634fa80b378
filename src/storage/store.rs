//! Persistent activity store
//!
//! Owns the merged-row table and both interning dictionaries. Mutations go
//! through the journal first (when the store is backed by a directory) and are
//! applied in memory only after the append succeeded. Recovery loads the last
//! snapshot and replays the journal entries it does not already contain
//! through the same apply functions, so dictionary ids come out identical.

use crate::catalog::Dictionary;
use crate::catalog::InternTable;
use crate::config::DurabilityLevel;
use crate::storage::journal::{Journal, JournalRecord};
use crate::storage::snapshot::{self, StoreSnapshot};
use crate::storage::table::{ActivityTable, PersistedRow, StoredKey};
use crate::types::{DayBucket, MergeKey, MergeValue};
use crate::Result;
use roaring::RoaringBitmap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Result of one dictionary collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub strings_removed: usize,
    pub urls_removed: usize,
}

pub struct ActivityStore {
    dictionary: Dictionary,
    table: ActivityTable,
    journal: Option<Journal>,
    dir: Option<PathBuf>,
}

impl ActivityStore {
    /// Store with no backing files.
    pub fn in_memory() -> Self {
        Self {
            dictionary: Dictionary::new(),
            table: ActivityTable::new(),
            journal: None,
            dir: None,
        }
    }

    /// Open the store in `dir`, creating it if needed, and recover its state.
    pub fn open<P: AsRef<Path>>(dir: P, durability: DurabilityLevel) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut store = Self::in_memory();
        let mut covered = 0;
        if let Some(snapshot) = snapshot::read_snapshot(&dir)? {
            covered = snapshot.journal_seq;
            store.dictionary.strings = InternTable::restore(snapshot.strings)?;
            store.dictionary.urls = InternTable::restore(snapshot.urls)?;
            store.table = ActivityTable::restore(snapshot.table)?;
        }

        let (journal, records) = Journal::open(&dir, durability, covered)?;
        let mut replayed = 0;
        for (seq, record) in &records {
            if *seq < covered {
                continue;
            }
            store.apply(record);
            replayed += 1;
        }
        let skipped = records.len() - replayed;
        if skipped > 0 {
            // A checkpoint died between the snapshot rename and the truncate.
            warn!(skipped, covered, "journal entries already in the snapshot were skipped");
        }

        info!(
            path = %dir.display(),
            rows = store.table.len(),
            strings = store.dictionary.strings.len(),
            urls = store.dictionary.urls.len(),
            replayed,
            "activity store opened"
        );

        store.journal = Some(journal);
        store.dir = Some(dir);
        Ok(store)
    }

    pub fn is_persistent(&self) -> bool {
        self.dir.is_some()
    }

    fn commit(&mut self, record: JournalRecord) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&record)?;
        }
        self.apply(&record);
        Ok(())
    }

    fn apply(&mut self, record: &JournalRecord) {
        match record {
            JournalRecord::Upsert { entries } => {
                for (key, value) in entries {
                    let stored = self.intern_key(key);
                    self.table.upsert(stored, value);
                }
            }
            JournalRecord::ScrubUrls { urls } => {
                if urls.is_empty() {
                    self.table.scrub_urls(|_| true);
                } else {
                    let ids: RoaringBitmap = urls
                        .iter()
                        .filter_map(|url| self.dictionary.urls.id_of(url))
                        .collect();
                    if !ids.is_empty() {
                        self.table.scrub_urls(|id| ids.contains(id));
                    }
                }
            }
            JournalRecord::Expire { cutoff } => {
                self.table.delete_older_than(*cutoff);
            }
        }
    }

    fn intern_key(&mut self, key: &MergeKey) -> StoredKey {
        let strings = &mut self.dictionary.strings;
        let urls = &mut self.dictionary.urls;
        StoredKey {
            extension: strings.intern(&key.extension_id),
            day: key.day,
            action_type: key.action_type,
            api: strings.intern(&key.api_name),
            args: key.args.as_deref().map(|args| strings.intern(args)),
            page_url: key.page_url.as_deref().map(|url| urls.intern(url)),
            arg_url: key.arg_url.as_deref().map(|url| urls.intern(url)),
        }
    }

    /// Upsert-merge one flushed batch as a single atomic unit.
    pub fn apply_flush(&mut self, entries: Vec<(MergeKey, MergeValue)>) -> Result<usize> {
        let len = entries.len();
        if len == 0 {
            return Ok(0);
        }
        self.commit(JournalRecord::Upsert { entries })?;
        Ok(len)
    }

    /// Clear matching URL fields. `urls` must already be normalized; empty means all.
    pub fn remove_urls(&mut self, urls: Vec<String>) -> Result<()> {
        self.commit(JournalRecord::ScrubUrls { urls })
    }

    /// Delete rows in buckets before `cutoff`. Returns the number deleted.
    pub fn expire_before(&mut self, cutoff: DayBucket) -> Result<usize> {
        let before = self.table.len();
        self.commit(JournalRecord::Expire { cutoff })?;
        Ok(before - self.table.len())
    }

    /// Drop dictionary entries no surviving row references.
    ///
    /// Candidates are the dictionary ids missing from the live set of the
    /// current rows, so a referenced entry is never a candidate. Not journaled:
    /// ids are never reused, so replaying without the collection yields the
    /// same ids plus some garbage that the next pass removes.
    pub fn collect_garbage(&mut self) -> GcStats {
        let live = self.table.live_ids();
        let dead_strings = self.dictionary.strings.unreferenced(&live.strings);
        let dead_urls = self.dictionary.urls.unreferenced(&live.urls);

        let stats = GcStats {
            strings_removed: self.dictionary.strings.remove_ids(&dead_strings),
            urls_removed: self.dictionary.urls.remove_ids(&dead_urls),
        };
        debug!(
            strings_removed = stats.strings_removed,
            urls_removed = stats.urls_removed,
            "dictionary collection finished"
        );
        stats
    }

    /// Write a snapshot and truncate the journal. No-op for in-memory stores.
    ///
    /// The snapshot records the next journal sequence number, so a crash
    /// before the truncate leaves entries that recovery recognizes as applied.
    pub fn checkpoint(&mut self) -> Result<()> {
        let Some(dir) = self.dir.as_ref() else {
            return Ok(());
        };

        let snapshot = StoreSnapshot::new(
            self.journal.as_ref().map_or(0, Journal::next_seq),
            self.dictionary.strings.snapshot(),
            self.dictionary.urls.snapshot(),
            self.table.snapshot(),
        );
        let bytes = snapshot::write_snapshot(dir, &snapshot)?;
        if let Some(journal) = self.journal.as_mut() {
            journal.truncate()?;
        }

        debug!(bytes, rows = self.table.len(), "checkpoint written");
        Ok(())
    }

    /// Rows of `extension_id` in bucket `day`, resolved to key form.
    pub fn rows_for_day(&self, extension_id: &str, day: DayBucket) -> Vec<(MergeKey, MergeValue)> {
        let Some(extension) = self.dictionary.strings.id_of(extension_id) else {
            return Vec::new();
        };
        self.table
            .rows_for_day(extension, day)
            .filter_map(|row| self.resolve(row))
            .collect()
    }

    /// Every row whose resolved key satisfies `predicate`.
    pub fn scan<F>(&self, predicate: F) -> Vec<(MergeKey, MergeValue)>
    where
        F: Fn(&MergeKey) -> bool,
    {
        self.table
            .iter()
            .filter_map(|(_, row)| self.resolve(row))
            .filter(|(key, _)| predicate(key))
            .collect()
    }

    fn resolve(&self, row: &PersistedRow) -> Option<(MergeKey, MergeValue)> {
        let strings = &self.dictionary.strings;
        let urls = &self.dictionary.urls;
        let key = &row.key;

        let resolved = (|| {
            Some(MergeKey {
                extension_id: strings.resolve(key.extension)?.to_string(),
                day: key.day,
                action_type: key.action_type,
                api_name: strings.resolve(key.api)?.to_string(),
                args: match key.args {
                    Some(id) => Some(strings.resolve(id)?.to_string()),
                    None => None,
                },
                page_url: match key.page_url {
                    Some(id) => Some(urls.resolve(id)?.to_string()),
                    None => None,
                },
                arg_url: match key.arg_url {
                    Some(id) => Some(urls.resolve(id)?.to_string()),
                    None => None,
                },
            })
        })();

        if resolved.is_none() {
            error!(?key, "row references a missing dictionary entry");
        }
        resolved.map(|merge_key| (merge_key, row.value.clone()))
    }

    pub fn row_count(&self) -> usize {
        self.table.len()
    }

    pub fn string_count(&self) -> usize {
        self.dictionary.strings.len()
    }

    pub fn url_count(&self) -> usize {
        self.dictionary.urls.len()
    }

    /// Flush the journal and write a final snapshot.
    pub fn close(&mut self) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.sync()?;
        }
        self.checkpoint()
    }

    #[cfg(test)]
    pub(crate) fn table_snapshot(&self) -> crate::storage::table::TableSnapshot {
        self.table.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionType, Timestamp};
    use tempfile::TempDir;

    fn entry(api: &str, day: i32, page_url: Option<&str>) -> (MergeKey, MergeValue) {
        (
            MergeKey {
                extension_id: "punky".into(),
                day: DayBucket(day),
                action_type: ActionType::DomAccess,
                api_name: api.into(),
                args: Some(r#"["vamoose"]"#.into()),
                page_url: page_url.map(str::to_string),
                arg_url: None,
            },
            MergeValue {
                time: Timestamp::from_secs(day as i64),
                count: 1,
                page_title: page_url.map(|_| "Google".to_string()),
            },
        )
    }

    #[test]
    fn test_flush_merges_into_rows() {
        let mut store = ActivityStore::in_memory();
        store.apply_flush(vec![entry("lets", 10, None)]).unwrap();
        store.apply_flush(vec![entry("lets", 10, None), entry("other", 10, None)]).unwrap();

        let rows = store.rows_for_day("punky", DayBucket(10));
        assert_eq!(rows.len(), 2);
        let lets = rows.iter().find(|(k, _)| k.api_name == "lets").unwrap();
        assert_eq!(lets.1.count, 2);
        assert!(store.rows_for_day("unknown", DayBucket(10)).is_empty());
    }

    #[test]
    fn test_expire_then_collect() {
        let mut store = ActivityStore::in_memory();
        store
            .apply_flush(vec![
                entry("old_api", 7, Some("http://www.google.com/")),
                entry("kept_api", 8, None),
            ])
            .unwrap();
        assert_eq!(store.string_count(), 4);
        assert_eq!(store.url_count(), 1);

        assert_eq!(store.expire_before(DayBucket(8)).unwrap(), 1);
        let stats = store.collect_garbage();
        assert_eq!(stats.strings_removed, 1);
        assert_eq!(stats.urls_removed, 1);
        assert_eq!(store.string_count(), 3);
        assert_eq!(store.url_count(), 0);
        assert_eq!(store.rows_for_day("punky", DayBucket(8)).len(), 1);
    }

    #[test]
    fn test_collect_keeps_shared_strings() {
        let mut store = ActivityStore::in_memory();
        store
            .apply_flush(vec![entry("lets", 7, None), entry("lets", 8, None)])
            .unwrap();
        store.expire_before(DayBucket(8)).unwrap();

        let stats = store.collect_garbage();
        assert_eq!(stats.strings_removed, 0);
        assert_eq!(store.rows_for_day("punky", DayBucket(8)).len(), 1);
    }

    #[test]
    fn test_scrub_specific_and_all() {
        let mut store = ActivityStore::in_memory();
        store
            .apply_flush(vec![
                entry("a", 10, Some("http://www.google.com/")),
                entry("b", 10, Some("http://www.example.com/")),
            ])
            .unwrap();

        store.remove_urls(vec!["http://www.google.com/".into()]).unwrap();
        let rows = store.scan(|_| true);
        let a = rows.iter().find(|(k, _)| k.api_name == "a").unwrap();
        let b = rows.iter().find(|(k, _)| k.api_name == "b").unwrap();
        assert_eq!(a.0.page_url, None);
        assert_eq!(a.1.page_title, None);
        assert_eq!(b.0.page_url.as_deref(), Some("http://www.example.com/"));

        store.remove_urls(Vec::new()).unwrap();
        assert!(store.scan(|k| k.page_url.is_some()).is_empty());
        assert_eq!(store.row_count(), 2);
    }

    #[test]
    fn test_recovery_replays_journal() {
        let dir = TempDir::new().unwrap();
        let before = {
            let mut store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
            store.apply_flush(vec![entry("a", 9, Some("http://www.google.com/"))]).unwrap();
            store.apply_flush(vec![entry("a", 9, Some("http://www.google.com/")), entry("b", 10, None)]).unwrap();
            store.expire_before(DayBucket(10)).unwrap();
            store.apply_flush(vec![entry("c", 10, None)]).unwrap();
            store.table_snapshot()
        };

        let store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
        let after = store.table_snapshot();
        assert_eq!(after.next_row_id, before.next_row_id);
        assert_eq!(after.rows, before.rows);
    }

    #[test]
    fn test_recovery_from_snapshot_and_journal() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
            store.apply_flush(vec![entry("a", 10, None)]).unwrap();
            store.checkpoint().unwrap();
            store.apply_flush(vec![entry("a", 10, None)]).unwrap();
        }

        let store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
        let rows = store.rows_for_day("punky", DayBucket(10));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.count, 2);
    }

    #[test]
    fn test_checkpoint_interrupted_before_truncate() {
        let dir = TempDir::new().unwrap();
        let journal_path = dir.path().join(crate::storage::journal::JOURNAL_FILE);
        {
            let mut store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
            store.apply_flush(vec![entry("a", 10, None)]).unwrap();
            let pending = std::fs::read(&journal_path).unwrap();
            store.checkpoint().unwrap();
            // Put the journal back as if the truncate never happened.
            std::fs::write(&journal_path, &pending).unwrap();
        }

        {
            let mut store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
            let rows = store.rows_for_day("punky", DayBucket(10));
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].1.count, 1);
            store.apply_flush(vec![entry("a", 10, None)]).unwrap();
        }

        // The stale entry is skipped again; the newer one is replayed.
        let store = ActivityStore::open(dir.path(), DurabilityLevel::NoSync).unwrap();
        let rows = store.rows_for_day("punky", DayBucket(10));
        assert_eq!(rows[0].1.count, 2);
    }
}
