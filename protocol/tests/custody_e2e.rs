//! End-to-end tests for the custody protocol.
//!
//! Each test wires a vault and a set of custodian agents to one in-memory
//! channel. Custodian agents run their inbox loops as tokio tasks, exactly
//! as a custodian process would, and only ever see the channel. The vault
//! knows them by public identity alone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use futures::future::join_all;
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use custody_protocol::config::{CollectionConfig, SecretPolicy, VaultConfig};
use custody_protocol::crypto::keys::{KeyPair, MIN_RSA_KEY_BITS};
use custody_protocol::participant::{Agent, Custodian, Custodians, InboxReport};
use custody_protocol::transport::MemoryChannel;
use custody_protocol::vault::{ProtocolState, SecretOrigin, Vault, VaultError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

struct World {
    vault: Arc<Vault>,
    channel: Arc<MemoryChannel>,
    /// Custodian-side agents, holding the private keys.
    agents: Vec<Arc<Agent>>,
    stop_agents: watch::Sender<bool>,
    agents_rx: watch::Receiver<bool>,
}

fn keys() -> KeyPair {
    KeyPair::generate(&mut OsRng, MIN_RSA_KEY_BITS).unwrap()
}

/// A vault with `custodians` custodians and `threshold` for secret "disk".
fn world(custodians: usize, threshold: usize) -> World {
    let channel = Arc::new(MemoryChannel::new());
    let agents: Vec<Arc<Agent>> = (0..custodians)
        .map(|i| Arc::new(Agent::with_keys(format!("custodian{i}"), format!("inbox/custodian{i}"), keys())))
        .collect();

    let roster = Custodians::new(
        agents
            .iter()
            .enumerate()
            .map(|(i, a)| Custodian::new(format!("Custodian #{i}"), Arc::new(Agent::from_identity(a.identity()))))
            .collect(),
    )
    .unwrap();

    let mut config = VaultConfig::default();
    config.collection = fast_collection(2_000);
    config.secrets.insert(
        "disk".to_owned(),
        SecretPolicy {
            length: 48,
            threshold,
        },
    );

    let vault = Arc::new(Vault::new("vault-1", keys(), roster, channel.clone(), config));
    let (stop_agents, agents_rx) = watch::channel(false);
    World {
        vault,
        channel,
        agents,
        stop_agents,
        agents_rx,
    }
}

fn fast_collection(deadline_ms: u64) -> CollectionConfig {
    CollectionConfig {
        deadline_ms,
        poll_interval_ms: 5,
    }
}

impl World {
    /// Start the inbox loops of the listed custodian agents.
    fn serve(&self, which: &[usize]) -> Vec<JoinHandle<InboxReport>> {
        which
            .iter()
            .map(|&i| {
                let agent = self.agents[i].clone();
                let channel = self.channel.clone();
                let shutdown = self.agents_rx.clone();
                tokio::spawn(async move {
                    agent
                        .serve_until(&*channel, Duration::from_millis(5), StdRng::from_entropy(), shutdown)
                        .await
                })
            })
            .collect()
    }

    async fn stop(&self, handles: Vec<JoinHandle<InboxReport>>) -> Vec<InboxReport> {
        let _ = self.stop_agents.send(true);
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect()
    }

    /// Wait until every listed agent has picked up its share of `secret_id`.
    async fn wait_for_shares(&self, which: &[usize], secret_id: &str) -> Result<()> {
        for _ in 0..400 {
            if which.iter().all(|&i| self.agents[i].has_share(secret_id)) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        anyhow::bail!("custodians never received their shares of {secret_id}")
    }

    fn secret(&self, secret_id: &str) -> String {
        self.vault.apply(secret_id, str::to_owned).unwrap()
    }
}

fn never() -> watch::Receiver<bool> {
    // The sender is dropped, so this can never fire.
    watch::channel(false).1
}

// ---------------------------------------------------------------------------
// 1. Provision, forget, recover
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn provision_then_recover_full_roster() -> Result<()> {
    let w = world(5, 3);
    let agents = w.serve(&[0, 1, 2, 3, 4]);

    w.vault.provision("disk", &mut OsRng).await?;
    w.wait_for_shares(&[0, 1, 2, 3, 4], "disk").await?;
    let original = w.secret("disk");
    ensure!(original.len() == 48);

    // The vault forgets; only the custodians can bring it back.
    w.vault.remove_secret("disk");
    w.vault.recover("disk", fast_collection(5_000), never()).await?;

    assert_eq!(w.secret("disk"), original);
    assert_eq!(w.vault.state("disk"), ProtocolState::Reconstructed);

    let reports = w.stop(agents).await;
    assert!(reports.iter().all(|r| r.shares_loaded == 1 && r.rejected == 0));
    // Recovery may finish before the slowest custodians answer.
    assert!(reports.iter().map(|r| r.requests_answered).sum::<usize>() >= 3);
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Threshold reached with custodians missing
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recover_with_silent_custodians() -> Result<()> {
    let w = world(5, 3);
    let agents = w.serve(&[0, 1, 2, 3, 4]);
    w.vault.provision("disk", &mut OsRng).await?;
    w.wait_for_shares(&[0, 1, 2, 3, 4], "disk").await?;
    let original = w.secret("disk");
    w.stop(agents).await;

    // Only three of five answer this time.
    let (restart, rx) = watch::channel(false);
    let w = World { stop_agents: restart, agents_rx: rx, ..w };
    let agents = w.serve(&[1, 3, 4]);

    w.vault.remove_secret("disk");
    w.vault.recover("disk", fast_collection(5_000), never()).await?;
    assert_eq!(w.secret("disk"), original);

    w.stop(agents).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Below threshold: nothing is reconstructed
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_of_three_replies_cannot_meet_threshold_three() -> Result<()> {
    let w = world(3, 3);
    let agents = w.serve(&[0, 1, 2]);
    w.vault.provision("disk", &mut OsRng).await?;
    w.wait_for_shares(&[0, 1, 2], "disk").await?;
    w.stop(agents).await;

    let (restart, rx) = watch::channel(false);
    let w = World { stop_agents: restart, agents_rx: rx, ..w };
    let agents = w.serve(&[0, 2]);

    w.vault.remove_secret("disk");
    let result = w.vault.recover("disk", fast_collection(1_000), never()).await;
    assert!(
        matches!(result, Err(VaultError::InsufficientShares { collected: 2, .. })),
        "got {result:?}"
    );
    assert!(!w.vault.has_secret("disk"));
    assert_eq!(w.vault.state("disk"), ProtocolState::Idle);

    w.stop(agents).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Custodian without a share answers empty
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_reply_does_not_block_recovery() -> Result<()> {
    let w = world(3, 2);
    let agents = w.serve(&[0, 1, 2]);
    w.vault.provision("disk", &mut OsRng).await?;
    w.wait_for_shares(&[0, 1, 2], "disk").await?;
    let original = w.secret("disk");

    w.agents[0].remove_share("disk");
    w.vault.remove_secret("disk");
    w.vault.recover("disk", fast_collection(5_000), never()).await?;
    assert_eq!(w.secret("disk"), original);

    w.stop(agents).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Shutdown cancels collection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_cancels_recovery() -> Result<()> {
    let w = world(3, 2);
    // No custodian is serving, so collection would run to its deadline.
    let (cancel, rx) = watch::channel(false);
    let vault = w.vault.clone();
    let recovery =
        tokio::spawn(async move { vault.recover("disk", fast_collection(60_000), rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.send(true)?;

    let result = tokio::time::timeout(Duration::from_secs(5), recovery).await??;
    assert!(matches!(result, Err(VaultError::Cancelled(_))));
    assert_eq!(w.vault.state("disk"), ProtocolState::Idle);
    Ok(())
}

// ---------------------------------------------------------------------------
// 6. ensure_secret picks the right path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ensure_secret_provisions_holds_and_recovers() -> Result<()> {
    let w = world(3, 2);
    let agents = w.serve(&[0, 1, 2]);

    let first = w.vault.ensure_secret("disk", &mut OsRng, never()).await?;
    assert_eq!(first, SecretOrigin::Provisioned);
    w.wait_for_shares(&[0, 1, 2], "disk").await?;
    let original = w.secret("disk");

    let again = w.vault.ensure_secret("disk", &mut OsRng, never()).await?;
    assert_eq!(again, SecretOrigin::Held);

    w.vault.remove_secret("disk");
    let back = w.vault.ensure_secret("disk", &mut OsRng, never()).await?;
    assert_eq!(back, SecretOrigin::Recovered);
    assert_eq!(w.secret("disk"), original);

    w.stop(agents).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// 7. Independent secrets recover concurrently, even when one id prefixes the other
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_secrets_recover_concurrently() -> Result<()> {
    let w = world(4, 3);
    let agents = w.serve(&[0, 1, 2, 3]);

    w.vault.set_secret_from_value("disk", "first passphrase");
    w.vault.set_secret_from_value("disk_a", "second passphrase");
    for id in ["disk", "disk_a"] {
        w.vault.split_to_custodians(id, 3, &mut OsRng).await?;
        assert_eq!(w.vault.distribute(id).await?, 4);
    }
    w.wait_for_shares(&[0, 1, 2, 3], "disk").await?;
    w.wait_for_shares(&[0, 1, 2, 3], "disk_a").await?;

    w.vault.remove_secret("disk");
    w.vault.remove_secret("disk_a");
    let (disk, disk_a) = tokio::join!(
        w.vault.recover("disk", fast_collection(5_000), never()),
        w.vault.recover("disk_a", fast_collection(5_000), never()),
    );
    disk?;
    disk_a?;

    assert_eq!(w.secret("disk"), "first passphrase");
    assert_eq!(w.secret("disk_a"), "second passphrase");

    w.stop(agents).await;
    Ok(())
}
