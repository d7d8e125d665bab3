//! The vault: owner of cleartext secrets and driver of the custody protocol.
//!
//! ## Creating a secret
//!
//! 1. The secret is set from a value or generated at random.
//! 2. [`Vault::split_to_custodians`] splits it with `m = roster size` and
//!    assigns one share per custodian, in parallel. Each share's `y` is
//!    sealed to its custodian's key before it is stored.
//! 3. [`Vault::distribute`] has every custodian push its sealed share to its
//!    own inbox, where the custodian process picks it up.
//!
//! [`Vault::provision`] runs all three with the configured policy.
//!
//! ## Recovering a secret
//!
//! 1. [`Vault::request_shares`] sends a recovery request to every custodian.
//! 2. Custodians reseal their share to the vault key and reply.
//! 3. [`Vault::collect_shares`] polls for replies, opens them concurrently,
//!    and stops once a full set is held, the deadline passes, or the caller
//!    signals shutdown.
//!
//! [`Vault::recover`] runs the whole sequence and merges. Nothing is ever
//! merged from fewer than `threshold` distinct shares.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::VaultError;
use super::pool::run_parallel;
use super::secret::Secret;
use super::state::{ProtocolState, StateTable};
use crate::config::{CollectionConfig, VaultConfig, MIN_THRESHOLD};
use crate::crypto::keys::{KeyPair, PublicKey};
use crate::participant::{Custodian, Custodians};
use crate::sharing::{merge, split, ShamirError, Share, Shares};
use crate::transport::{
    from_payload, reply_agent, to_payload, AgentIdentity, Channel, RecoveryRequest, SealedShare,
};

/// How [`Vault::ensure_secret`] came to hold a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretOrigin {
    /// Already in vault memory.
    Held,
    /// Reconstructed from custodian shares.
    Recovered,
    /// Freshly generated, split and distributed.
    Provisioned,
}

/// Orchestrates the custody protocol for a fixed custodian roster.
pub struct Vault {
    id: String,
    keys: Arc<KeyPair>,
    custodians: Custodians,
    channel: Arc<dyn Channel>,
    config: VaultConfig,
    secrets: DashMap<String, Secret>,
    states: StateTable,
}

impl Vault {
    pub fn new(
        id: impl Into<String>,
        keys: KeyPair,
        custodians: Custodians,
        channel: Arc<dyn Channel>,
        config: VaultConfig,
    ) -> Self {
        Self {
            id: id.into(),
            keys: Arc::new(keys),
            custodians,
            channel,
            config,
            secrets: DashMap::new(),
            states: StateTable::new(),
        }
    }

    /// A vault with a freshly generated identity of `config.rsa_bits` bits.
    pub fn generate<R: RngCore + CryptoRng>(
        id: impl Into<String>,
        custodians: Custodians,
        channel: Arc<dyn Channel>,
        config: VaultConfig,
        rng: &mut R,
    ) -> Result<Self, VaultError> {
        let keys = KeyPair::generate(rng, config.rsa_bits)?;
        Ok(Self::new(id, keys, custodians, channel, config))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    /// The vault's own identity document. Its address is its id.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity {
            id: self.id.clone(),
            address: self.id.clone(),
            public_key: self.public_key().clone(),
        }
    }

    pub fn custodians(&self) -> &Custodians {
        &self.custodians
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn state(&self, secret_id: &str) -> ProtocolState {
        self.states.get(secret_id)
    }

    // -----------------------------------------------------------------------
    // Secrets
    // -----------------------------------------------------------------------

    pub fn set_secret_from_value(&self, secret_id: &str, value: impl Into<String>) {
        self.secrets.insert(secret_id.to_owned(), Secret::new(value));
        info!(secret_id, "secret set from value");
    }

    /// Generate a random alphanumeric secret of `length` characters.
    pub fn set_secret_from_random<R: RngCore + CryptoRng>(
        &self,
        secret_id: &str,
        length: usize,
        rng: &mut R,
    ) {
        self.secrets
            .insert(secret_id.to_owned(), Secret::random(length, rng));
        info!(secret_id, length, "secret generated");
    }

    pub fn has_secret(&self, secret_id: &str) -> bool {
        self.secrets.contains_key(secret_id)
    }

    /// Drop a secret from memory. Custodian shares are untouched. The
    /// protocol state is only reset when no operation is in flight, so a
    /// removal never lets a second operation start alongside a running one.
    pub fn remove_secret(&self, secret_id: &str) -> bool {
        if !self.states.clear_at_rest(secret_id) {
            debug!(secret_id, state = %self.states.get(secret_id), "operation in flight, state kept");
        }
        let removed = self.secrets.remove(secret_id).is_some();
        if removed {
            info!(secret_id, "secret removed");
        }
        removed
    }

    pub fn secret_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.secrets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Hand the cleartext of `secret_id` to `consume` (a disk unlock hook,
    /// say) and return its result.
    ///
    /// `consume` runs while the secret table entry is borrowed; it must not
    /// call back into this vault's secret setters.
    pub fn apply<T>(&self, secret_id: &str, consume: impl FnOnce(&str) -> T) -> Result<T, VaultError> {
        let secret = self
            .secrets
            .get(secret_id)
            .ok_or_else(|| VaultError::UnknownSecret(secret_id.to_owned()))?;
        debug!(secret_id, "applying secret");
        Ok(consume(secret.expose()))
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Split a held secret across the whole roster with the given threshold
    /// and give each custodian its share.
    pub async fn split_to_custodians<R: RngCore + CryptoRng + Send>(
        &self,
        secret_id: &str,
        threshold: usize,
        rng: &mut R,
    ) -> Result<(), VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Splitting)?;
        self.assign_shares(secret_id, threshold, rng).await?;
        op.finish(ProtocolState::Idle)
    }

    /// Have every custodian holding a share of `secret_id` push it to its
    /// inbox. Returns how many did.
    pub async fn distribute(&self, secret_id: &str) -> Result<usize, VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Distributing)?;
        let pushed = self.push_shares(secret_id).await?;
        op.finish(ProtocolState::Idle)?;
        Ok(pushed)
    }

    /// Generate, split and distribute a new secret according to the
    /// configured [`SecretPolicy`](crate::config::SecretPolicy).
    pub async fn provision<R: RngCore + CryptoRng + Send>(
        &self,
        secret_id: &str,
        rng: &mut R,
    ) -> Result<(), VaultError> {
        let policy = self.config.policy(secret_id);
        let op = self.states.begin(secret_id, ProtocolState::Splitting)?;

        self.secrets
            .insert(secret_id.to_owned(), Secret::random(policy.length, rng));
        self.assign_shares(secret_id, policy.effective_threshold(), rng)
            .await?;

        op.advance(ProtocolState::Distributing)?;
        self.push_shares(secret_id).await?;
        op.finish(ProtocolState::Idle)?;

        info!(secret_id, threshold = policy.effective_threshold(), "secret provisioned");
        Ok(())
    }

    async fn assign_shares<R: RngCore + CryptoRng + Send>(
        &self,
        secret_id: &str,
        threshold: usize,
        rng: &mut R,
    ) -> Result<(), VaultError> {
        let total = self.custodians.len();
        let shares = {
            let secret = self
                .secrets
                .get(secret_id)
                .ok_or_else(|| VaultError::UnknownSecret(secret_id.to_owned()))?;
            split(secret_id, secret.expose(), threshold, total, rng)?
        };

        let jobs: Vec<(Custodian, Share, StdRng)> = self
            .custodians
            .iter()
            .cloned()
            .zip(shares)
            .map(|(custodian, share)| (custodian, share, StdRng::from_seed(rng.gen())))
            .collect();

        let outcomes = run_parallel(jobs, |(custodian, share, mut task_rng)| async move {
            let outcome = custodian.assign_share(&share, &mut task_rng);
            (custodian.id().to_owned(), outcome)
        })
        .await?;

        for (custodian, outcome) in outcomes {
            outcome?;
            debug!(secret_id, custodian = %custodian, "share assigned");
        }
        info!(secret_id, threshold, total, "secret split to custodians");
        Ok(())
    }

    async fn push_shares(&self, secret_id: &str) -> Result<usize, VaultError> {
        let holders: Vec<Custodian> = self
            .custodians
            .iter()
            .filter(|c| c.has_share(secret_id))
            .cloned()
            .collect();
        if holders.is_empty() {
            warn!(secret_id, "no custodian holds a share, nothing to distribute");
            return Ok(0);
        }

        let channel = self.channel.clone();
        let sid = secret_id.to_owned();
        let outcomes = run_parallel(holders, move |custodian| {
            let channel = channel.clone();
            let sid = sid.clone();
            async move {
                let outcome = custodian
                    .agent()
                    .send_share_via_transport(&sid, &*channel)
                    .await;
                (custodian.id().to_owned(), outcome)
            }
        })
        .await?;

        let pushed = outcomes.len();
        for (custodian, outcome) in outcomes {
            outcome?;
            debug!(secret_id, custodian = %custodian, "share distributed");
        }
        info!(secret_id, custodians = pushed, "shares distributed");
        Ok(pushed)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Ask every custodian for its share of `secret_id`. Returns how many
    /// requests went out; a custodian the transport cannot reach is logged
    /// and skipped.
    pub async fn request_shares(&self, secret_id: &str) -> Result<usize, VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Requesting)?;
        let asked = self.broadcast_request(secret_id).await?;
        op.finish(ProtocolState::Idle)?;
        Ok(asked)
    }

    /// Wait for custodian replies until a full share set is held.
    ///
    /// Fails with [`VaultError::InsufficientShares`] at the deadline and
    /// [`VaultError::Cancelled`] when `shutdown` fires. Either way every
    /// share collected so far is dropped.
    pub async fn collect_shares(
        &self,
        secret_id: &str,
        options: CollectionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Shares, VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Collecting)?;
        let shares = self.gather(secret_id, options, shutdown).await?;
        op.finish(ProtocolState::Idle)?;
        Ok(shares)
    }

    /// Rebuild a secret from shares sealed to this vault, without going
    /// through the transport. Shares that fail to open are logged and
    /// skipped.
    pub fn set_secret_from_shares(
        &self,
        secret_id: &str,
        sealed: &[SealedShare],
    ) -> Result<(), VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Collecting)?;

        let opened: Vec<Share> = sealed
            .iter()
            .filter_map(|s| match self.open_share(secret_id, s) {
                Ok(share) => Some(share),
                Err(e) => {
                    warn!(secret_id, x = s.x, error = %e, "share excluded");
                    None
                }
            })
            .collect();

        let collected = best_share_set(opened)?;
        let shares = match collected {
            Some(shares) if shares.is_full_set() => shares,
            other => {
                return Err(VaultError::InsufficientShares {
                    secret_id: secret_id.to_owned(),
                    collected: other.map(|s| s.distinct_x()).unwrap_or(0),
                })
            }
        };

        let value = merge(&shares)?;
        self.secrets.insert(secret_id.to_owned(), Secret::from(value));
        op.finish(ProtocolState::Reconstructed)?;
        info!(secret_id, shares = shares.len(), "secret reconstructed from shares");
        Ok(())
    }

    /// Request, collect and merge. On success the secret is held in memory.
    pub async fn recover(
        &self,
        secret_id: &str,
        options: CollectionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), VaultError> {
        let op = self.states.begin(secret_id, ProtocolState::Requesting)?;
        let asked = self.broadcast_request(secret_id).await?;

        op.advance(ProtocolState::Collecting)?;
        let shares = self.gather(secret_id, options, shutdown).await?;

        let value = merge(&shares)?;
        self.secrets.insert(secret_id.to_owned(), Secret::from(value));
        op.finish(ProtocolState::Reconstructed)?;

        info!(
            secret_id,
            asked,
            collected = shares.len(),
            threshold = shares.threshold(),
            "secret recovered"
        );
        Ok(())
    }

    /// Make sure the vault holds `secret_id`: keep it if already held,
    /// recover it if any custodian holds a share, otherwise provision a new
    /// one.
    pub async fn ensure_secret<R: RngCore + CryptoRng + Send>(
        &self,
        secret_id: &str,
        rng: &mut R,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SecretOrigin, VaultError> {
        if self.has_secret(secret_id) {
            return Ok(SecretOrigin::Held);
        }
        if self.custodians.iter().any(|c| c.has_share(secret_id)) {
            self.recover(secret_id, self.config.collection, shutdown)
                .await?;
            return Ok(SecretOrigin::Recovered);
        }
        self.provision(secret_id, rng).await?;
        Ok(SecretOrigin::Provisioned)
    }

    async fn broadcast_request(&self, secret_id: &str) -> Result<usize, VaultError> {
        // Replies still queued from an earlier request may hold shares of a
        // split that has since been replaced.
        let stale = self.take_replies(secret_id).await?;
        if !stale.is_empty() {
            debug!(secret_id, stale = stale.len(), "discarded replies to an earlier request");
        }

        let request = RecoveryRequest {
            secret_id: secret_id.to_owned(),
            vault_id: self.id.clone(),
            vault_public_key: self.public_key().clone(),
        };
        let payload = to_payload(&request)?;
        let channel = self.channel.clone();
        let vault_id = self.id.clone();

        let outcomes = run_parallel(self.custodians.as_slice().to_vec(), move |custodian| {
            let channel = channel.clone();
            let vault_id = vault_id.clone();
            let payload = payload.clone();
            async move {
                let outcome = channel.send(&vault_id, custodian.address(), payload).await;
                (custodian.id().to_owned(), outcome)
            }
        })
        .await?;

        let mut asked = 0;
        for (custodian, outcome) in outcomes {
            match outcome {
                Ok(()) => asked += 1,
                Err(e) => warn!(secret_id, custodian = %custodian, error = %e, "recovery request not sent"),
            }
        }
        info!(secret_id, asked, custodians = self.custodians.len(), "shares requested");
        Ok(asked)
    }

    async fn gather(
        &self,
        secret_id: &str,
        options: CollectionConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Shares, VaultError> {
        let deadline = Instant::now() + options.deadline();
        let buffer: DashMap<String, Share> = DashMap::new();
        let mut watching = true;

        loop {
            if *shutdown.borrow() {
                info!(secret_id, collected = buffer.len(), "share collection cancelled");
                return Err(VaultError::Cancelled(secret_id.to_owned()));
            }

            self.drain_replies(secret_id, &buffer).await?;

            let held: Vec<Share> = buffer.iter().map(|e| e.value().clone()).collect();
            let collected = match best_share_set(held)? {
                Some(shares) if shares.is_full_set() => {
                    debug!(secret_id, collected = shares.distinct_x(), threshold = shares.threshold(), "threshold reached");
                    return Ok(shares);
                }
                Some(shares) => shares.distinct_x(),
                None => 0,
            };

            if Instant::now() >= deadline {
                warn!(secret_id, collected, "collection deadline passed below threshold");
                return Err(VaultError::InsufficientShares {
                    secret_id: secret_id.to_owned(),
                    collected,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(options.poll_interval()) => {}
                _ = tokio::time::sleep_until(deadline) => {}
                changed = shutdown.changed(), if watching => {
                    // A dropped sender can no longer cancel us.
                    if changed.is_err() {
                        watching = false;
                    }
                }
            }
        }
    }

    /// Take every pending reply for `secret_id`, open them concurrently and
    /// record usable shares in `buffer`, keyed by custodian id. Replies are
    /// applied in arrival order, so a later share from the same custodian
    /// replaces an earlier one.
    async fn drain_replies(
        &self,
        secret_id: &str,
        buffer: &DashMap<String, Share>,
    ) -> Result<(), VaultError> {
        let replies = self.take_replies(secret_id).await?;
        if replies.is_empty() {
            return Ok(());
        }

        let keys = self.keys.clone();
        let sid = secret_id.to_owned();
        let outcomes = run_parallel(replies, move |(custodian, payload)| {
            let keys = keys.clone();
            let sid = sid.clone();
            async move {
                let outcome = open_reply(&sid, &payload, &keys);
                (custodian, outcome)
            }
        })
        .await?;

        for (custodian, outcome) in outcomes {
            match outcome {
                Ok(Some(share)) => {
                    debug!(secret_id, custodian = %custodian, x = share.x, "share collected");
                    buffer.insert(custodian, share);
                }
                Ok(None) => debug!(secret_id, custodian = %custodian, "custodian holds no share"),
                Err(e) => warn!(secret_id, custodian = %custodian, error = %e, "reply excluded"),
            }
        }
        Ok(())
    }

    /// Receive every pending reply to `secret_id` from a roster custodian.
    ///
    /// Only mailboxes named `{secret_id}_{custodian}` for a custodian on the
    /// roster are read. Anything else, including replies for a secret whose
    /// id merely starts with `{secret_id}_`, is left on the channel for its
    /// own collector.
    async fn take_replies(&self, secret_id: &str) -> Result<Vec<(String, Bytes)>, VaultError> {
        let mut replies = Vec::new();
        for handle in self.channel.list_pending(&self.id).await? {
            if handle.to != self.id {
                continue;
            }
            let Some(custodian) =
                reply_agent(&handle.from, secret_id).filter(|id| self.custodians.contains(id))
            else {
                continue;
            };
            let custodian = custodian.to_owned();
            while let Some(payload) = self.channel.receive(&handle.from, &handle.to).await? {
                replies.push((custodian.clone(), payload));
            }
        }
        Ok(replies)
    }

    fn open_share(&self, secret_id: &str, sealed: &SealedShare) -> Result<Share, VaultError> {
        check_share(secret_id, sealed.open(&*self.keys)?)
    }
}

/// Decode and open one reply payload. Empty payloads mean the custodian had
/// nothing to send.
fn open_reply(secret_id: &str, payload: &[u8], keys: &KeyPair) -> Result<Option<Share>, VaultError> {
    let Some(sealed) = from_payload::<SealedShare>(payload)? else {
        return Ok(None);
    };
    check_share(secret_id, sealed.open(keys)?).map(Some)
}

/// Reject shares that belong to another secret or carry nonsense
/// parameters.
fn check_share(secret_id: &str, share: Share) -> Result<Share, VaultError> {
    if share.secret_id != secret_id {
        return Err(ShamirError::Heterogeneous { field: "secret_id" }.into());
    }
    if share.threshold < MIN_THRESHOLD || share.threshold > share.total {
        return Err(ShamirError::InvalidParameters {
            threshold: share.threshold,
            total: share.total,
        }
        .into());
    }
    Ok(share)
}

/// Group shares by split metadata. A group that can already reconstruct
/// wins; otherwise the largest group is returned. A custodian replying with
/// a share from some other split cannot block the rest.
fn best_share_set(mut shares: Vec<Share>) -> Result<Option<Shares>, VaultError> {
    shares.sort_by_key(|s| s.x);
    let mut groups: Vec<Vec<Share>> = Vec::new();
    for share in shares {
        match groups.iter_mut().find(|g| {
            g[0].threshold == share.threshold && g[0].total == share.total && g[0].prime == share.prime
        }) {
            Some(group) => group.push(share),
            None => groups.push(vec![share]),
        }
    }
    let mut sets = groups
        .into_iter()
        .map(Shares::new)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(full) = sets.iter().position(Shares::is_full_set) {
        return Ok(Some(sets.swap_remove(full)));
    }
    Ok(sets.into_iter().max_by_key(Shares::len))
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vault")
            .field("id", &self.id)
            .field("public_key", self.keys.public_key())
            .field("custodians", &self.custodians.len())
            .field("secrets", &self.secret_ids())
            .finish()
    }
}
