//! Lazy partitioning of an artifact id stream into bounded batches.
//!
//! The batcher never materializes the full id list: it pulls from the
//! provider's `list_ids` channel and cuts batches of up to `batch_size`
//! ids, in source enumeration order. The sequence is finite, forward-only
//! and restartable - to resume, recreate the batcher over a fresh id
//! stream and [`skip_to`](Batcher::skip_to) the first unconsumed index.

use tokio::sync::mpsc;

use crate::error::Result;

/// A bounded slice of the artifact scope, processed by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position in the batch sequence.
    pub index: usize,
    /// Artifact ids, in source enumeration order.
    pub ids: Vec<String>,
}

/// Cuts a streamed id sequence into batches.
pub struct Batcher {
    rx: mpsc::Receiver<Result<String>>,
    batch_size: usize,
    next_index: usize,
    skip_before: usize,
    remaining: Option<usize>,
}

impl Batcher {
    /// Wrap an id stream. `batch_size` must be at least 1 (validated on
    /// the owning config).
    pub fn new(rx: mpsc::Receiver<Result<String>>, batch_size: usize) -> Self {
        Self {
            rx,
            batch_size: batch_size.max(1),
            next_index: 0,
            skip_before: 0,
            remaining: None,
        }
    }

    /// Cap the total number of ids yielded (sample runs).
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.remaining = Some(limit);
        self
    }

    /// Discard whole batches before `index`. Used to resume a run from
    /// the last unconsumed batch.
    pub fn skip_to(mut self, index: usize) -> Self {
        self.skip_before = index;
        self
    }

    /// Next batch, or `None` when the scope is exhausted.
    ///
    /// A stream error is yielded in place of a batch; enumeration stops
    /// there.
    pub async fn next_batch(&mut self) -> Option<Result<Batch>> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }

            let mut ids = Vec::with_capacity(self.batch_size);
            while ids.len() < self.batch_size {
                if self.remaining == Some(0) {
                    break;
                }
                match self.rx.recv().await {
                    Some(Ok(id)) => {
                        ids.push(id);
                        if let Some(n) = self.remaining.as_mut() {
                            *n -= 1;
                        }
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => break,
                }
            }

            if ids.is_empty() {
                return None;
            }

            let index = self.next_index;
            self.next_index += 1;
            if index < self.skip_before {
                continue;
            }
            return Some(Ok(Batch { index, ids }));
        }
    }
}
