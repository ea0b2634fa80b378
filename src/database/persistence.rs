//! Persistence operations on the writer (flush, scrub, sweep, shutdown)

use crate::database::writer::Writer;
use ahash::AHashSet;
use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

/// Consecutive failed flush commits after which the store is abandoned
pub(crate) const MAX_FLUSH_FAILURES: u32 = 3;

impl Writer {
    /// Apply sealed batches oldest first.
    ///
    /// A batch is retired only after the store committed it. On failure the
    /// batch stays sealed and later batches wait for the next flush. After
    /// `MAX_FLUSH_FAILURES` failures in a row the store is dropped and the
    /// writer runs degraded. Without a store, batches are dropped.
    pub(crate) fn flush_pending(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(batch) = self.buffer.oldest() {
            let Some(store) = self.store.as_mut() else {
                let dropped = self.buffer.discard(&batch);
                warn!(entries = dropped, "store unavailable, dropping flushed batch");
                continue;
            };

            match store.apply_flush(batch.as_ref().clone()) {
                Ok(applied) => {
                    self.buffer.retire(&batch);
                    self.flush_failures = 0;
                    flushed += applied;
                }
                Err(e) => {
                    self.flush_failures += 1;
                    error!(
                        error = %e,
                        entries = batch.len(),
                        failures = self.flush_failures,
                        "flush failed, entries stay buffered"
                    );
                    if self.flush_failures < MAX_FLUSH_FAILURES {
                        break;
                    }
                    self.abandon_store();
                }
            }
        }

        if flushed > 0 {
            debug!(entries = flushed, "flush committed");
        }
        flushed
    }

    /// Drop the store after repeated commit failures. Reads answer empty and
    /// sealed batches are discarded from here on.
    fn abandon_store(&mut self) {
        if self.store.take().is_some() {
            self.degraded.store(true, Ordering::Release);
            error!(
                failures = self.flush_failures,
                buffered = self.buffer.len(),
                "store keeps failing, continuing without persistence"
            );
        }
    }

    /// Flush everything buffered, then scrub the store. Entries that could
    /// not be flushed are scrubbed where they sit.
    pub(crate) fn remove_urls(&mut self, urls: Vec<String>) {
        self.buffer.seal();
        self.flush_pending();

        let targets: AHashSet<&str> = urls.iter().map(String::as_str).collect();
        let buffered = self
            .buffer
            .scrub_urls(|url| targets.is_empty() || targets.contains(url));
        if buffered > 0 {
            warn!(entries = buffered, "url scrub applied to unflushed entries");
        }

        let Some(store) = self.store.as_mut() else {
            return;
        };
        let scope = urls.len();
        match store.remove_urls(urls) {
            Ok(()) => info!(urls = scope, "url scrub applied"),
            Err(e) => error!(error = %e, "url scrub failed"),
        }
    }

    /// Rate-limited retention sweep.
    pub(crate) fn maintain(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let now = self.clock.now();
        if let Err(e) = self.janitor.maybe_sweep(store, now) {
            error!(error = %e, "retention sweep failed");
        }
    }

    /// Drain the buffer and release the store.
    pub(crate) fn shutdown(&mut self) {
        self.buffer.seal();
        let flushed = self.flush_pending();

        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.close() {
                error!(error = %e, "failed to write final checkpoint");
            }
        }

        let remaining = self.buffer.len();
        if remaining > 0 {
            error!(remaining, "entries lost at shutdown");
        }
        info!(flushed, "activity log writer stopped");
    }
}
