//! # Participants
//!
//! Agents are RSA identities; custodians are named agents a vault hands
//! shares to. A vault usually knows its custodians only by public key, so
//! the vault-side agents are public-only: they can seal shares for their
//! custodian but never open them. The matching custodian process holds the
//! private key and answers recovery requests over the transport.

pub mod agent;
pub mod custodian;
pub mod error;

pub use agent::{Agent, InboxReport};
pub use custodian::{Custodian, Custodians};
pub use error::ParticipantError;
