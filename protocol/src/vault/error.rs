//! Error types for the vault orchestrator.
//!
//! Every lower layer's error converts into [`VaultError`], so orchestration
//! code can use `?` throughout.

use thiserror::Error;

use super::state::ProtocolState;
use crate::crypto::envelope::EnvelopeError;
use crate::crypto::keys::KeyError;
use crate::participant::ParticipantError;
use crate::sharing::ShamirError;
use crate::transport::TransportError;

/// Errors that can occur while running the custody protocol.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The vault holds no secret under this id.
    #[error("unknown secret: {0}")]
    UnknownSecret(String),

    /// The requested operation is not allowed from the secret's current
    /// protocol state (usually: another operation is in flight).
    #[error("secret {secret_id}: cannot go from {from} to {to}")]
    InvalidState {
        /// The secret in question.
        secret_id: String,
        /// State the secret was in.
        from: ProtocolState,
        /// State the operation wanted.
        to: ProtocolState,
    },

    /// Not enough usable shares arrived in time. Nothing was reconstructed.
    #[error("only {collected} usable shares of {secret_id} were collected, threshold not reached")]
    InsufficientShares {
        /// The secret being recovered.
        secret_id: String,
        /// Usable distinct shares held when collection stopped.
        collected: usize,
    },

    /// Collection was stopped by the caller's shutdown signal. Nothing was
    /// reconstructed.
    #[error("share collection for {0} was cancelled")]
    Cancelled(String),

    /// A per-custodian task panicked or was aborted.
    #[error("custodian task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Shamir(#[from] ShamirError),

    #[error(transparent)]
    Participant(#[from] ParticipantError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Key(#[from] KeyError),
}
