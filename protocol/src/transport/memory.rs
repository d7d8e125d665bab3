//! In-process channel.
//!
//! Every mailbox is a FIFO queue in a `DashMap`, so concurrent senders and
//! receivers on different mailboxes never contend. Useful for tests and for
//! deployments where vault and custodians share a process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::trace;

use super::{Channel, Handle, TransportError};

/// A [`Channel`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    mailboxes: DashMap<Handle, VecDeque<Bytes>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total payloads waiting across all mailboxes.
    pub fn pending_count(&self) -> usize {
        self.mailboxes.iter().map(|entry| entry.value().len()).sum()
    }

    /// Refuse all further traffic. Pending payloads stay readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, from: &str, to: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        trace!(from, to, bytes = payload.len(), "queueing payload");
        self.mailboxes
            .entry(Handle::new(from, to))
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn receive(&self, from: &str, to: &str) -> Result<Option<Bytes>, TransportError> {
        let handle = Handle::new(from, to);
        let payload = self
            .mailboxes
            .get_mut(&handle)
            .and_then(|mut queue| queue.pop_front());
        // Drop drained mailboxes so list_pending stays cheap.
        self.mailboxes.remove_if(&handle, |_, queue| queue.is_empty());
        Ok(payload)
    }

    async fn list_pending(&self, address_prefix: &str) -> Result<Vec<Handle>, TransportError> {
        let mut handles: Vec<Handle> = self
            .mailboxes
            .iter()
            .filter(|entry| !entry.value().is_empty() && entry.key().to.starts_with(address_prefix))
            .map(|entry| entry.key().clone())
            .collect();
        handles.sort();
        Ok(handles)
    }
}
