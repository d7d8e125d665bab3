//! # Vault Module: Secret Custody Orchestration
//!
//! The vault owns cleartext secrets and runs the custody protocol against a
//! fixed roster of custodians: split and hand out shares when a secret is
//! created, request and merge them when it has to be recovered.
//!
//! ## Architecture
//!
//! ```text
//! orchestrator.rs Vault: secret table, creation and recovery flows
//! state.rs        Per-secret protocol state machine and operation guard
//! pool.rs         JoinSet fan-out over the custodian roster
//! secret.rs       Zeroizing in-memory secret values
//! error.rs        VaultError, wrapping every lower-layer error
//! ```
//!
//! ## Design Principles
//!
//! 1. **Cleartext never leaves the vault.** Shares are sealed to their
//!    custodian before they are stored, and only the vault's private key
//!    can open a recovery reply.
//!
//! 2. **Threshold or nothing.** A merge only ever runs on a full set of
//!    distinct, homogeneous shares. Timeouts and cancellation discard what
//!    was collected.
//!
//! 3. **One operation per secret.** The state machine rejects a second
//!    operation while one is in flight; different secrets proceed
//!    independently.

pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod secret;
pub mod state;

pub use error::VaultError;
pub use orchestrator::{SecretOrigin, Vault};
pub use pool::run_parallel;
pub use secret::Secret;
pub use state::{ProtocolState, StateTable, Transition};
