//! Error types for agents and custodian rosters.

use thiserror::Error;

use crate::crypto::envelope::EnvelopeError;
use crate::crypto::keys::KeyError;
use crate::transport::TransportError;

/// Errors that can occur in the participant layer.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// The operation needs a private key and this agent only has the public
    /// half.
    #[error("agent {agent} holds no private key and cannot decrypt")]
    CannotDecrypt {
        /// Id of the public-only agent.
        agent: String,
    },

    /// The agent holds no share of the given secret.
    #[error("agent {agent} holds no share of secret {secret_id}")]
    NoShare {
        /// Agent asked for the share.
        agent: String,
        /// The secret in question.
        secret_id: String,
    },

    /// A custodian roster needs at least two members.
    #[error("custodian roster needs at least 2 members, got {0}")]
    RosterTooSmall(usize),

    /// Two roster entries share an agent id.
    #[error("duplicate custodian id: {0}")]
    DuplicateCustodian(String),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
