use std::collections::VecDeque;

use thiserror::Error;

use super::entry::Entry;

/// A slice of dirty entries small enough for one batched remote write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushBatch {
    pub sequence: usize,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("batch queue is empty")]
    Empty,
}

#[derive(Debug, Default)]
pub struct BatchQueue {
    inner: VecDeque<PushBatch>,
}

impl BatchQueue {
    /// Splits `entries` into batches of at most `batch_size`, keeping their order.
    pub fn from_entries(entries: Vec<Entry>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let mut inner = VecDeque::with_capacity(entries.len().div_ceil(batch_size));
        let mut entries = entries.into_iter().peekable();
        let mut sequence = 0;
        while entries.peek().is_some() {
            let chunk: Vec<Entry> = entries.by_ref().take(batch_size).collect();
            inner.push_back(PushBatch {
                sequence,
                entries: chunk,
            });
            sequence += 1;
        }
        Self { inner }
    }

    pub fn dequeue(&mut self) -> Result<PushBatch, QueueError> {
        self.inner.pop_front().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
