//! Activity log core - `ActivityLog` structure and lifecycle
//!
//! This module contains:
//! - `ActivityLog` struct definition
//! - open() / open_in_memory() / open_with_clock()
//! - caller-facing submit, read and maintenance operations
//! - close() and the draining `Drop`

use crate::config::ActivityLogConfig;
use crate::database::janitor::Janitor;
use crate::database::mem_buffer::MergeBuffer;
use crate::database::query::{ActionFilter, QueryRequest};
use crate::database::writer::{Task, Writer};
use crate::storage::ActivityStore;
use crate::types::{normalize_url, ActionRecord, ActionType, ArgPolicy, Clock, MergeKey, SystemClock};
use crate::{Result, StorageError};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Where the store keeps its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    InMemory,
    Directory(PathBuf),
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Persisted merged rows
    pub rows: usize,
    /// Live entries in the string dictionary
    pub strings: usize,
    /// Live entries in the URL dictionary
    pub urls: usize,
    /// Entries waiting in the merge buffer
    pub buffered: usize,
    /// Backed by files on disk
    pub persistent: bool,
    /// False when the store could not be opened or was abandoned after
    /// repeated flush failures
    pub available: bool,
}

/// Pending result of a read
///
/// Dropping the handle does not cancel the read; its result is discarded.
#[must_use = "a query handle does nothing unless waited on"]
pub struct QueryHandle {
    rx: Receiver<Vec<ActionRecord>>,
}

impl QueryHandle {
    /// Block until the writer delivers the result.
    pub fn wait(self) -> Result<Vec<ActionRecord>> {
        self.rx.recv().map_err(|_| StorageError::Closed)
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Vec<ActionRecord>> {
        match self.rx.recv_timeout(timeout) {
            Ok(records) => Ok(records),
            Err(RecvTimeoutError::Timeout) => Err(StorageError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(StorageError::Closed),
        }
    }
}

/// Batched, merging, self-expiring activity log
///
/// `submit` is cheap and synchronous; reads and maintenance are queued on a
/// single writer thread and complete in submission order.
pub struct ActivityLog {
    buffer: Arc<MergeBuffer>,
    policy: ArgPolicy,
    clock: Arc<dyn Clock>,
    tasks: Sender<Task>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    degraded: Arc<AtomicBool>,
}

impl ActivityLog {
    /// Open (or create) a persistent log in `path`.
    ///
    /// If the directory cannot be used the log still opens, in degraded mode:
    /// submissions are accepted, flushed batches are dropped and reads are empty.
    pub fn open<P: AsRef<Path>>(path: P, config: ActivityLogConfig) -> Result<Self> {
        Self::open_with_clock(
            StoreLocation::Directory(path.as_ref().to_path_buf()),
            config,
            Arc::new(SystemClock),
        )
    }

    /// Open a log with no backing files.
    pub fn open_in_memory(config: ActivityLogConfig) -> Result<Self> {
        Self::open_with_clock(StoreLocation::InMemory, config, Arc::new(SystemClock))
    }

    /// Open a log with an injected clock.
    ///
    /// Fails only on an invalid config or when the writer thread cannot be spawned.
    pub fn open_with_clock(
        location: StoreLocation,
        config: ActivityLogConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let store = match &location {
            StoreLocation::InMemory => Some(ActivityStore::in_memory()),
            StoreLocation::Directory(dir) => match ActivityStore::open(dir, config.durability) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!(path = %dir.display(), error = %e, "activity store unavailable, running degraded");
                    None
                }
            },
        };
        let degraded = Arc::new(AtomicBool::new(store.is_none()));

        let buffer = Arc::new(MergeBuffer::new(config.flush_threshold));
        let (tx, rx) = channel::unbounded();
        let writer = Writer {
            store,
            buffer: Arc::clone(&buffer),
            janitor: Janitor::new(config.retention(), config.min_sweep_interval()),
            clock: Arc::clone(&clock),
            flush_interval: config.flush_interval(),
            flush_failures: 0,
            degraded: Arc::clone(&degraded),
        };
        let handle = writer.spawn(rx)?;

        debug!(
            ?location,
            flush_threshold = config.flush_threshold,
            durability = config.durability.description(),
            "activity log opened"
        );

        Ok(Self {
            buffer,
            policy: config.arg_policy(),
            clock,
            tasks: tx,
            writer: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            degraded,
        })
    }

    /// Record one action. Never blocks on I/O and never fails.
    pub fn submit(&self, record: ActionRecord) {
        if self.is_closed() {
            debug!(extension_id = %record.extension_id, "submit after close ignored");
            return;
        }
        if record.action_type == ActionType::Any {
            warn!(api_name = %record.api_name, "ANY is a query-only action type, record ignored");
            return;
        }

        let (key, value) = MergeKey::derive(record, &self.policy);
        if self.buffer.insert(key, value) {
            self.schedule(Task::Flush);
        }
    }

    /// Rows of `extension_id` on the local day `day_offset` days before today,
    /// newest first.
    pub fn read_data(&self, extension_id: &str, day_offset: u32) -> QueryHandle {
        let (tx, rx) = channel::bounded(1);
        self.read_data_with(extension_id, day_offset, move |records| {
            let _ = tx.send(records);
        });
        QueryHandle { rx }
    }

    /// Like `read_data`, delivering to `deliver` on the writer thread.
    pub fn read_data_with<F>(&self, extension_id: &str, day_offset: u32, deliver: F)
    where
        F: FnOnce(Vec<ActionRecord>) + Send + 'static,
    {
        let day = self.clock.now().day_bucket().days_before(day_offset);
        self.schedule(Task::Query {
            request: QueryRequest::Day {
                extension_id: extension_id.to_string(),
                day,
            },
            deliver: Box::new(deliver),
        });
    }

    /// Rows across all days matching `filter`.
    pub fn read_filtered_data(&self, filter: ActionFilter) -> QueryHandle {
        let (tx, rx) = channel::bounded(1);
        self.read_filtered_data_with(filter, move |records| {
            let _ = tx.send(records);
        });
        QueryHandle { rx }
    }

    pub fn read_filtered_data_with<F>(&self, filter: ActionFilter, deliver: F)
    where
        F: FnOnce(Vec<ActionRecord>) + Send + 'static,
    {
        self.schedule(Task::Query {
            request: QueryRequest::Filtered(filter),
            deliver: Box::new(deliver),
        });
    }

    /// Clear page URL (with its title) and argument URL fields equal to any of
    /// `urls`, in buffered and persisted rows. An empty slice clears every URL.
    pub fn remove_urls(&self, urls: &[Url]) {
        let urls = urls.iter().map(normalize_url).collect();
        self.schedule(Task::RemoveUrls(urls));
    }

    pub fn set_retention(&self, retention: Duration) {
        self.schedule(Task::SetRetention(retention));
    }

    /// Reset the janitor's last-cleaning time so the next sweep request runs.
    pub fn force_cleaning_now(&self) {
        self.schedule(Task::ForceCleaning);
    }

    /// Hand the whole buffer to the writer now.
    pub fn flush(&self) {
        self.buffer.seal();
        self.schedule(Task::Flush);
    }

    /// Ask for a (rate-limited) retention sweep.
    pub fn maintain(&self) {
        self.schedule(Task::Maintain);
    }

    /// Counts as seen by the writer after every earlier task.
    pub fn stats(&self) -> Result<StoreStats> {
        let (tx, rx) = channel::bounded(1);
        if !self.schedule(Task::Stats(tx)) {
            return Err(StorageError::Closed);
        }
        rx.recv().map_err(|_| StorageError::Closed)
    }

    /// Entries currently held in the merge buffer
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// True when running without a store, from open or after the writer
    /// gave up on a failing one
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush the buffer, checkpoint and stop the writer.
    pub fn close(self) {
        self.shutdown();
    }

    fn schedule(&self, task: Task) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tasks.send(task).is_ok()
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tasks.send(Task::Shutdown);
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("activity log writer panicked");
            }
        }
    }
}

impl Drop for ActivityLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
