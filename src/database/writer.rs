//! Single writer thread
//!
//! The only context that touches the store and the dictionaries. Tasks are
//! consumed from one channel in submission order; the flush timer is the
//! deadline of that same receive loop, so timer flushes are ordered with
//! everything else.

use crate::database::core::StoreStats;
use crate::database::janitor::Janitor;
use crate::database::mem_buffer::MergeBuffer;
use crate::database::query::{self, QueryRequest};
use crate::storage::ActivityStore;
use crate::types::{ActionRecord, Clock};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

pub(crate) const WRITER_THREAD_NAME: &str = "actlog-writer";

/// Result sink of a query task
pub(crate) type Deliver = Box<dyn FnOnce(Vec<ActionRecord>) + Send + 'static>;

pub(crate) enum Task {
    /// Apply every sealed batch, then ask the janitor for a sweep
    Flush,
    Query { request: QueryRequest, deliver: Deliver },
    /// Flush, then clear matching URL fields (normalized; empty = all)
    RemoveUrls(Vec<String>),
    Maintain,
    SetRetention(Duration),
    ForceCleaning,
    Stats(Sender<StoreStats>),
    Shutdown,
}

pub(crate) struct Writer {
    pub(crate) store: Option<ActivityStore>,
    pub(crate) buffer: Arc<MergeBuffer>,
    pub(crate) janitor: Janitor,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) flush_interval: Duration,
    /// Failed flush commits since the last successful one
    pub(crate) flush_failures: u32,
    /// Shared with the handle; set once the store is abandoned
    pub(crate) degraded: Arc<AtomicBool>,
}

impl Writer {
    pub(crate) fn spawn(self, tasks: Receiver<Task>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || self.run(tasks))
    }

    fn run(mut self, tasks: Receiver<Task>) {
        let mut next_flush = Instant::now() + self.flush_interval;
        loop {
            match tasks.recv_deadline(next_flush) {
                Ok(Task::Shutdown) => break,
                Ok(task) => self.handle(task),
                Err(RecvTimeoutError::Timeout) => {
                    if self.buffer.seal() {
                        debug!("flush timer expired with buffered entries");
                    }
                    self.flush_pending();
                    self.maintain();
                    next_flush = Instant::now() + self.flush_interval;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown();
    }

    fn handle(&mut self, task: Task) {
        match task {
            Task::Flush => {
                self.flush_pending();
                self.maintain();
            }
            Task::Query { request, deliver } => {
                // Degraded mode answers every read with nothing.
                let records = match self.store.as_ref() {
                    Some(store) => query::execute(&request, &self.buffer, Some(store)),
                    None => Vec::new(),
                };
                deliver(records);
            }
            Task::RemoveUrls(urls) => self.remove_urls(urls),
            Task::Maintain => self.maintain(),
            Task::SetRetention(retention) => self.janitor.set_retention(retention),
            Task::ForceCleaning => self.janitor.force_cleaning_now(),
            Task::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Task::Shutdown => {}
        }
    }

    fn stats(&self) -> StoreStats {
        let (rows, strings, urls) = self
            .store
            .as_ref()
            .map(|s| (s.row_count(), s.string_count(), s.url_count()))
            .unwrap_or_default();
        StoreStats {
            rows,
            strings,
            urls,
            buffered: self.buffer.len(),
            persistent: self.store.as_ref().map_or(false, ActivityStore::is_persistent),
            available: self.store.is_some(),
        }
    }
}
