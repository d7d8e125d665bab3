//! JSON wire messages.
//!
//! Field names are camelCase on the wire. A share's `y` travels only as an
//! envelope ciphertext; the cleartext [`Share`] never gets a serializer.

use std::str::FromStr;

use bytes::Bytes;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::TransportError;
use crate::crypto::envelope::{self, EnvelopeError};
use crate::crypto::field::MersennePrime;
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::sharing::Share;

/// A share whose `y` is sealed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedShare {
    pub secret_id: String,
    pub x: u64,
    /// Envelope ciphertext of `y` in decimal.
    pub y: String,
    /// Threshold.
    pub n: usize,
    /// Total shares in the split.
    pub m: usize,
    /// Field prime exponent. Absent in messages from older peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prime: Option<MersennePrime>,
}

impl SealedShare {
    /// Seal `share.y` for `recipient`.
    pub fn seal<R: RngCore + CryptoRng>(
        share: &Share,
        recipient: &PublicKey,
        rng: &mut R,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            secret_id: share.secret_id.clone(),
            x: share.x,
            y: envelope::encrypt(&share.y.to_str_radix(10), recipient, rng)?,
            n: share.threshold,
            m: share.total,
            prime: share.prime,
        })
    }

    /// Open `y` with `key`.
    pub fn open<'a>(&self, key: impl Into<Option<&'a KeyPair>>) -> Result<Share, EnvelopeError> {
        let y = envelope::decrypt(&self.y, key)?;
        let y = BigUint::from_str(y.trim()).map_err(|_| EnvelopeError::Encoding)?;
        Ok(Share {
            secret_id: self.secret_id.clone(),
            x: self.x,
            y,
            threshold: self.n,
            total: self.m,
            prime: self.prime,
        })
    }

    /// Same metadata, `y` resealed from `own` to `recipient`.
    pub fn reseal<'a, R: RngCore + CryptoRng>(
        &self,
        own: impl Into<Option<&'a KeyPair>>,
        recipient: &PublicKey,
        rng: &mut R,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            y: envelope::decrypt_and_reencrypt(&self.y, own, recipient, rng)?,
            ..self.clone()
        })
    }
}

/// A vault asking a custodian to send back its share of `secret_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRequest {
    pub secret_id: String,
    pub vault_id: String,
    /// Key the custodian must reseal its share to.
    pub vault_public_key: PublicKey,
}

/// The public face of an agent, as exported to rosters and peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub id: String,
    pub address: String,
    pub public_key: PublicKey,
}

/// Anything a custodian can find in its inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Share(SealedShare),
    Recovery(RecoveryRequest),
}

/// Sender address for a custodian's reply carrying its share of `secret_id`.
pub fn reply_sender(secret_id: &str, agent_id: &str) -> String {
    format!("{secret_id}_{agent_id}")
}

/// Inverse of [`reply_sender`]: the agent id, if `from` is a reply for
/// `secret_id`.
pub fn reply_agent<'a>(from: &'a str, secret_id: &str) -> Option<&'a str> {
    from.strip_prefix(secret_id)?
        .strip_prefix('_')
        .filter(|agent| !agent.is_empty())
}

/// Serialize a message into a channel payload.
pub fn to_payload<T: Serialize>(message: &T) -> Result<Bytes, TransportError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// Parse a channel payload. Empty payloads are `None`: a custodian with
/// nothing to contribute replies with one.
pub fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<Option<T>, TransportError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(payload)
        .map(Some)
        .map_err(|e| TransportError::SerializationError(e.to_string()))
}
