use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

/// One harvested or pasted bulletin awaiting extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: usize,
    pub title: String,
    pub content: String,
    pub date: String,
    pub url: String,
}

/// Fields of a record before the store assigns its id.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub title: String,
    pub content: String,
    pub date: String,
    pub url: String,
}

/// Append-only record list. `records()[i].id == i` always holds.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<SourceRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next sequential id. Returns that id.
    pub fn push(&mut self, draft: RecordDraft) -> usize {
        let id = self.records.len();
        self.records.push(SourceRecord {
            id,
            title: draft.title,
            content: draft.content,
            date: draft.date,
            url: draft.url,
        });
        id
    }

    pub fn get(&self, id: usize) -> Option<&SourceRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    /// Consecutive slices of at most `size` records, in id order.
    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, SourceRecord> {
        self.records.chunks(size.max(1))
    }
}

/// Store shared between the capture task and the pagination loop.
///
/// Every append publishes the new length on a watch channel so the pager
/// can wait for captures to land instead of sleeping blindly.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<RecordStore>>,
    len_tx: Arc<watch::Sender<usize>>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(RecordStore::new())),
            len_tx: Arc::new(len_tx),
        }
    }

    /// Append all drafts under one lock; returns the store length afterwards.
    pub fn extend(&self, drafts: impl IntoIterator<Item = RecordDraft>) -> usize {
        let len = {
            let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            for draft in drafts {
                store.push(draft);
            }
            store.len()
        };
        self.len_tx.send_replace(len);
        len
    }

    pub fn len(&self) -> usize {
        *self.len_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len_tx.subscribe()
    }

    /// Move the collected records out, leaving an empty store behind.
    pub fn take(&self) -> RecordStore {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *store)
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}
