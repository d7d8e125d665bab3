// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Protocol: Core Library
//!
//! Threshold custody of secrets such as disk-encryption passphrases. A vault
//! splits each secret with Shamir's scheme over a Mersenne prime field and
//! hands one share to every custodian, sealed to that custodian's RSA key.
//! Recovering the secret takes replies from at least `threshold` of them.
//!
//! ## Architecture
//!
//! - **config**: Protocol constants and runtime configuration.
//! - **crypto**: Prime field arithmetic, RSA keys, and the hybrid
//!   RSA-OAEP/AES envelope every share travels in.
//! - **sharing**: Shamir split and merge, and the share types.
//! - **participant**: Agents (a keypair plus sealed shares) and the
//!   custodian roster.
//! - **transport**: The abstract message channel, its wire messages, and
//!   an in-memory implementation.
//! - **vault**: The orchestrator: secret table, per-secret state machine,
//!   parallel fan-out to custodians.
//! - **logging**: `tracing` subscriber setup for host processes.
//!
//! ## Example
//!
//! ```
//! use custody_protocol::sharing::{merge, split, Shares};
//! use rand::rngs::OsRng;
//!
//! let shares = split("disk", "passphrase", 2, 3, &mut OsRng).unwrap();
//! let two = Shares::new(shares.into_vec().into_iter().skip(1).collect()).unwrap();
//! assert_eq!(merge(&two).unwrap().as_str(), "passphrase");
//! ```

pub mod config;
pub mod crypto;
pub mod logging;
pub mod participant;
pub mod sharing;
pub mod transport;
pub mod vault;

pub use crypto::{KeyPair, PublicKey};
pub use participant::{Agent, Custodian, Custodians};
pub use sharing::{Share, Shares};
pub use transport::{Channel, MemoryChannel};
pub use vault::{ProtocolState, Vault, VaultError};
