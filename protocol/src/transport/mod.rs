//! # Transport Channel
//!
//! The custody core never talks to a network, a directory or a queue
//! directly. It talks to a [`Channel`]: an addressed mailbox with three
//! operations.
//!
//! - `send(from, to, payload)` drops a payload into the `(from, to)` mailbox.
//! - `receive(from, to)` takes the oldest payload out of it, if any.
//! - `list_pending(prefix)` lists non-empty mailboxes whose recipient address
//!   starts with `prefix`.
//!
//! Delivery is best effort. Whether a payload survives a crash, how long it
//! lingers, and whether sends are retried are all up to the implementation.
//! [`MemoryChannel`] is the in-process implementation used by tests and by
//! single-process deployments.
//!
//! ## Addressing
//!
//! | Message             | from                     | to                |
//! |---------------------|--------------------------|-------------------|
//! | share drop          | `secret_id`              | custodian address |
//! | recovery request    | `vault_id`               | custodian address |
//! | share reply         | `{secret_id}_{agent_id}` | `vault_id`        |

pub mod memory;
pub mod message;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryChannel;
pub use message::{
    from_payload, reply_agent, reply_sender, to_payload, AgentIdentity, InboundMessage,
    RecoveryRequest, SealedShare,
};

/// Errors surfaced by channel implementations and message codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel has been shut down and accepts no more traffic.
    #[error("transport channel is closed")]
    Closed,

    /// The implementation could not reach the given address.
    #[error("address unreachable: {0}")]
    Unreachable(String),

    /// Backend-specific failure (I/O, broker error, ...).
    #[error("transport backend error: {0}")]
    Backend(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Identifies one mailbox: everything `from` has sent to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub from: String,
    pub to: String,
}

impl Handle {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// An addressed, polled message channel.
///
/// Implementations must be safe to share across tasks; the vault fans out
/// one task per custodian against the same channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Queue `payload` in the `(from, to)` mailbox.
    async fn send(&self, from: &str, to: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Take the oldest payload out of the `(from, to)` mailbox. `None` when
    /// the mailbox is empty.
    async fn receive(&self, from: &str, to: &str) -> Result<Option<Bytes>, TransportError>;

    /// Mailboxes with at least one payload whose `to` address starts with
    /// `address_prefix`.
    async fn list_pending(&self, address_prefix: &str) -> Result<Vec<Handle>, TransportError>;
}
