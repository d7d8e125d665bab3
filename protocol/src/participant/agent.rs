//! Agents: RSA identities that hold sealed shares.
//!
//! An agent always has a public key and may have the private half. Having
//! it is what [`Agent::can_decrypt`] reports, and every operation that needs
//! to open an envelope checks it first. There is no separate "public agent"
//! type.
//!
//! Shares are stored sealed to the agent's own key, one per secret. The
//! cleartext `y` exists only for the duration of [`Agent::add_share`] and,
//! on the custodian side, inside the decrypt-then-reencrypt call that
//! answers a recovery request.

use std::fmt;
use std::ops::AddAssign;
use std::time::Duration;

use dashmap::DashMap;
use rand::{CryptoRng, RngCore};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::error::ParticipantError;
use crate::crypto::envelope;
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::sharing::Share;
use crate::transport::{
    from_payload, reply_sender, to_payload, AgentIdentity, Channel, InboundMessage,
    RecoveryRequest, SealedShare,
};

/// An identity bound to an RSA keypair, or to a bare public key.
pub struct Agent {
    id: String,
    address: String,
    public_key: PublicKey,
    keys: Option<KeyPair>,
    shares: DashMap<String, SealedShare>,
}

impl Agent {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// A new agent with a freshly generated `bits`-bit keypair.
    pub fn generate<R: RngCore + CryptoRng>(
        id: impl Into<String>,
        address: impl Into<String>,
        bits: usize,
        rng: &mut R,
    ) -> Result<Self, ParticipantError> {
        Ok(Self::with_keys(id, address, KeyPair::generate(rng, bits)?))
    }

    /// An agent that can decrypt.
    pub fn with_keys(id: impl Into<String>, address: impl Into<String>, keys: KeyPair) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            public_key: keys.public_key().clone(),
            keys: Some(keys),
            shares: DashMap::new(),
        }
    }

    /// An agent that can only encrypt.
    pub fn public_only(
        id: impl Into<String>,
        address: impl Into<String>,
        public_key: PublicKey,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            public_key,
            keys: None,
            shares: DashMap::new(),
        }
    }

    /// Load an agent from PEM key material. A private key yields a full
    /// agent, a public key a public-only one.
    pub fn from_pem(
        id: impl Into<String>,
        address: impl Into<String>,
        pem: &str,
    ) -> Result<Self, ParticipantError> {
        if let Ok(keys) = KeyPair::from_pem(pem) {
            return Ok(Self::with_keys(id, address, keys));
        }
        let public_key = PublicKey::from_pem(pem)?;
        Ok(Self::public_only(id, address, public_key))
    }

    /// A public-only agent from an exported identity document.
    pub fn from_identity(identity: AgentIdentity) -> Self {
        Self::public_only(identity.id, identity.address, identity.public_key)
    }

    // -----------------------------------------------------------------------
    // Identity & capability
    // -----------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Whether this agent holds its private key.
    pub fn can_decrypt(&self) -> bool {
        self.keys.is_some()
    }

    /// The exportable public identity.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            id: self.id.clone(),
            address: self.address.clone(),
            public_key: self.public_key.clone(),
        }
    }

    fn private_keys(&self) -> Result<&KeyPair, ParticipantError> {
        self.keys.as_ref().ok_or_else(|| ParticipantError::CannotDecrypt {
            agent: self.id.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Envelope operations
    // -----------------------------------------------------------------------

    /// Seal `message` to this agent's own key.
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        message: &str,
        rng: &mut R,
    ) -> Result<String, ParticipantError> {
        Ok(envelope::encrypt(message, &self.public_key, rng)?)
    }

    /// Seal `message` to someone else's key.
    pub fn encrypt_for<R: RngCore + CryptoRng>(
        &self,
        message: &str,
        recipient: &PublicKey,
        rng: &mut R,
    ) -> Result<String, ParticipantError> {
        Ok(envelope::encrypt(message, recipient, rng)?)
    }

    /// Open an envelope sealed to this agent.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>, ParticipantError> {
        Ok(envelope::decrypt(ciphertext, self.private_keys()?)?)
    }

    // -----------------------------------------------------------------------
    // Share slots
    // -----------------------------------------------------------------------

    /// Store `share`, sealing `y` to this agent's own key. Replaces any
    /// earlier share of the same secret.
    pub fn add_share<R: RngCore + CryptoRng>(
        &self,
        share: &Share,
        rng: &mut R,
    ) -> Result<(), ParticipantError> {
        let sealed = SealedShare::seal(share, &self.public_key, rng)?;
        self.load_share(sealed);
        Ok(())
    }

    /// Store a share that arrived already sealed to this agent.
    pub fn load_share(&self, sealed: SealedShare) {
        debug!(agent = %self.id, secret_id = %sealed.secret_id, x = sealed.x, "share stored");
        self.shares.insert(sealed.secret_id.clone(), sealed);
    }

    /// The sealed share of `secret_id`, if held.
    pub fn sealed_share(&self, secret_id: &str) -> Option<SealedShare> {
        self.shares.get(secret_id).map(|entry| entry.value().clone())
    }

    pub fn has_share(&self, secret_id: &str) -> bool {
        self.shares.contains_key(secret_id)
    }

    pub fn remove_share(&self, secret_id: &str) -> Option<SealedShare> {
        self.shares.remove(secret_id).map(|(_, sealed)| sealed)
    }

    /// Ids of every secret this agent holds a share of.
    pub fn share_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shares.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Drop the sealed share of `secret_id` in this agent's own inbox, where
    /// the custodian process owning the private key picks it up.
    pub async fn send_share_via_transport(
        &self,
        secret_id: &str,
        channel: &dyn Channel,
    ) -> Result<(), ParticipantError> {
        let sealed = self
            .sealed_share(secret_id)
            .ok_or_else(|| ParticipantError::NoShare {
                agent: self.id.clone(),
                secret_id: secret_id.to_owned(),
            })?;
        channel
            .send(secret_id, &self.address, to_payload(&sealed)?)
            .await?;
        debug!(agent = %self.id, secret_id, "share pushed to transport");
        Ok(())
    }

    /// Answer a recovery request: reseal the held share to the vault's key
    /// and send it. Without a share an empty reply goes out instead, so the
    /// vault is not left guessing.
    ///
    /// Returns whether a share was sent.
    pub async fn send_share_to_vault<R: RngCore + CryptoRng + Send>(
        &self,
        request: &RecoveryRequest,
        channel: &dyn Channel,
        rng: &mut R,
    ) -> Result<bool, ParticipantError> {
        let payload = match self.sealed_share(&request.secret_id) {
            Some(sealed) => {
                let resealed =
                    sealed.reseal(self.private_keys()?, &request.vault_public_key, rng)?;
                Some(to_payload(&resealed)?)
            }
            None => None,
        };

        let sent = payload.is_some();
        let from = reply_sender(&request.secret_id, &self.id);
        channel
            .send(&from, &request.vault_id, payload.unwrap_or_default())
            .await?;

        if sent {
            info!(agent = %self.id, secret_id = %request.secret_id, vault = %request.vault_id, "share sent to vault");
        } else {
            warn!(agent = %self.id, secret_id = %request.secret_id, "no share held, sent empty reply");
        }
        Ok(sent)
    }

    /// Drain this agent's inbox once: store share drops and answer recovery
    /// requests. Bad messages are logged and counted, not fatal.
    pub async fn process_inbox<R: RngCore + CryptoRng + Send>(
        &self,
        channel: &dyn Channel,
        rng: &mut R,
    ) -> Result<InboxReport, ParticipantError> {
        let mut report = InboxReport::default();

        for handle in channel.list_pending(&self.address).await? {
            if handle.to != self.address {
                continue;
            }
            while let Some(payload) = channel.receive(&handle.from, &handle.to).await? {
                match from_payload::<InboundMessage>(&payload) {
                    Ok(Some(InboundMessage::Share(sealed))) if sealed.secret_id == handle.from => {
                        self.load_share(sealed);
                        report.shares_loaded += 1;
                    }
                    Ok(Some(InboundMessage::Share(sealed))) => {
                        warn!(agent = %self.id, from = %handle.from, secret_id = %sealed.secret_id, "share drop sender does not match its secret id");
                        report.rejected += 1;
                    }
                    Ok(Some(InboundMessage::Recovery(request))) => {
                        match self.send_share_to_vault(&request, channel, rng).await {
                            Ok(_) => report.requests_answered += 1,
                            Err(e) => {
                                warn!(agent = %self.id, secret_id = %request.secret_id, error = %e, "could not answer recovery request");
                                report.rejected += 1;
                            }
                        }
                    }
                    Ok(None) => report.rejected += 1,
                    Err(e) => {
                        warn!(agent = %self.id, from = %handle.from, error = %e, "unreadable inbox message");
                        report.rejected += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Run [`Agent::process_inbox`] every `poll_interval` until `shutdown`
    /// fires or its sender goes away. Returns the accumulated report.
    pub async fn serve_until<R: RngCore + CryptoRng + Send>(
        &self,
        channel: &dyn Channel,
        poll_interval: Duration,
        mut rng: R,
        mut shutdown: watch::Receiver<bool>,
    ) -> InboxReport {
        info!(agent = %self.id, address = %self.address, "custodian agent serving");
        let mut total = InboxReport::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_inbox(channel, &mut rng).await {
                Ok(report) => total += report,
                Err(e) => warn!(agent = %self.id, error = %e, "inbox pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(
            agent = %self.id,
            shares_loaded = total.shares_loaded,
            requests_answered = total.requests_answered,
            "custodian agent stopped"
        );
        total
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("can_decrypt", &self.can_decrypt())
            .field("shares", &self.shares.len())
            .finish()
    }
}

/// What one pass over an inbox did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboxReport {
    pub shares_loaded: usize,
    pub requests_answered: usize,
    pub rejected: usize,
}

impl AddAssign for InboxReport {
    fn add_assign(&mut self, other: Self) {
        self.shares_loaded += other.shares_loaded;
        self.requests_answered += other.requests_answered;
        self.rejected += other.rejected;
    }
}
