//! Correlation table for requests awaiting a response

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use mcprouter_protocol::RequestId;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{ClientError, ClientResult};

#[derive(Debug)]
struct Entry {
    token: u64,
    tx: oneshot::Sender<Bytes>,
}

/// Requests written to the backend whose response has not arrived yet
#[derive(Debug, Default)]
pub(super) struct PendingRequests {
    entries: Mutex<HashMap<RequestId, Entry>>,
    next_token: AtomicU64,
}

impl PendingRequests {
    /// Reserve a single-slot delivery point for `id`
    ///
    /// The entry is removed when the returned guard drops.
    pub(super) fn register(
        &self,
        id: RequestId,
    ) -> ClientResult<(oneshot::Receiver<Bytes>, PendingGuard<'_>)> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(ClientError::DuplicateRequestId(id));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        entries.insert(id.clone(), Entry { token, tx });
        Ok((
            rx,
            PendingGuard {
                table: self,
                id,
                token,
            },
        ))
    }

    /// Hand `payload` to the waiter for `id`
    ///
    /// Returns `false` when nobody is waiting for that id.
    pub(super) fn complete(&self, id: &RequestId, payload: Bytes) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        // The waiter may have given up already; the slot is consumed either way.
        let _ = entry.tx.send(payload);
        true
    }

    /// Drop every entry, waking all waiters with a closed slot
    pub(super) fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub(super) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes its entry from the table on drop unless a newer registration took the id
#[derive(Debug)]
pub(super) struct PendingGuard<'a> {
    table: &'a PendingRequests,
    id: RequestId,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock();
        if entries.get(&self.id).is_some_and(|entry| entry.token == self.token) {
            entries.remove(&self.id);
        }
    }
}
