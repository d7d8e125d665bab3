//! # Protocol Configuration & Constants
//!
//! Every magic number in the custody protocol lives here, together with the
//! runtime configuration structs a vault is built from.
//!
//! The constants define what a share looks like on the wire and how large a
//! secret can be. Changing them after shares have been handed to custodians
//! means those shares can no longer be recombined, so treat this file as
//! append-only once something is in production.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Prime Field
// ---------------------------------------------------------------------------

/// Exponents `e` of the Mersenne primes `2^e - 1` used as share moduli,
/// in ascending order.
///
/// The split picks the smallest prime strictly above the encoded secret, so
/// the last entry bounds the largest secret the system can split: a little
/// under 3.8 MiB of UTF-8.
pub const MERSENNE_EXPONENTS: [u32; 29] = [
    1279, 2203, 2281, 3217, 4253, 4423, 9689, 9941, 11213, 19937, 21701, 23209, 44497, 86243,
    110503, 132049, 216091, 756839, 859433, 1257787, 1398269, 2976221, 3021377, 6972593, 13466917,
    20996011, 24036583, 25964951, 30402457,
];

/// Smallest x-coordinate handed out at split time. Zero is reserved for the
/// secret itself.
pub const MIN_X_COORDINATE: u64 = 1;

/// Largest x-coordinate drawn at random. Collisions past this point are
/// resolved by counting upwards from the current maximum, so the final set can
/// slightly exceed it.
pub const MAX_X_COORDINATE: u64 = 999_999;

/// The lowest threshold that still means something. A 1-of-m split is just
/// m plaintext copies.
pub const MIN_THRESHOLD: usize = 2;

/// Threshold used when a secret policy does not name one.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Marker byte prepended to a secret's UTF-8 bytes before the base-256
/// conversion. Keeps leading NUL characters (and the empty string) intact.
pub const SECRET_ENCODING_MARKER: u8 = 0x01;

// ---------------------------------------------------------------------------
// Envelope Cipher
// ---------------------------------------------------------------------------

/// RSA modulus size for freshly generated agent and vault identities.
pub const RSA_KEY_BITS: usize = 2048;

/// AES-256 key length in bytes. Generated fresh for every envelope.
pub const AES_KEY_LENGTH: usize = 32;

/// Envelope nonce length. 16 bytes, not the usual 12: the envelope layout
/// reserves a fixed 16-byte nonce field.
pub const AES_NONCE_LENGTH: usize = 16;

/// AES-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Default length of a randomly generated secret, in characters. 32
/// alphanumerics is a little over 190 bits of entropy.
pub const DEFAULT_SECRET_LENGTH: usize = 32;

/// Alphabet for random secrets. Alphanumerics only, so the result can be fed
/// to tools that choke on shell metacharacters.
pub const SECRET_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ---------------------------------------------------------------------------
// Collection Timing
// ---------------------------------------------------------------------------

/// How long the vault waits for custodian replies before giving up.
pub const DEFAULT_COLLECTION_DEADLINE: Duration = Duration::from_secs(300);

/// How often the vault polls the transport for new replies while collecting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Timing knobs for the share collection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Give up after this many milliseconds without reaching threshold.
    pub deadline_ms: u64,
    /// Poll the transport this often, in milliseconds.
    pub poll_interval_ms: u64,
}

impl CollectionConfig {
    /// The deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// The poll interval as a [`Duration`]. Never zero, so a misconfigured
    /// vault cannot spin on the transport.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_COLLECTION_DEADLINE.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

/// How a named secret is provisioned: its random length and its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretPolicy {
    /// Length of the random secret in characters.
    pub length: usize,
    /// Shares required to reconstruct. Values below [`MIN_THRESHOLD`] are
    /// raised to it by [`SecretPolicy::effective_threshold`].
    pub threshold: usize,
}

impl SecretPolicy {
    /// The threshold actually used, clamped to at least [`MIN_THRESHOLD`].
    pub fn effective_threshold(&self) -> usize {
        self.threshold.max(MIN_THRESHOLD)
    }
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_SECRET_LENGTH,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Everything a vault needs beyond its identity and its custodian roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// RSA modulus size for a generated vault identity.
    pub rsa_bits: usize,
    /// Share collection timing.
    pub collection: CollectionConfig,
    /// Provisioning policy per secret id.
    pub secrets: HashMap<String, SecretPolicy>,
}

impl VaultConfig {
    /// Policy for `secret_id`, or the default policy when none is configured.
    pub fn policy(&self, secret_id: &str) -> SecretPolicy {
        self.secrets.get(secret_id).copied().unwrap_or_default()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            rsa_bits: RSA_KEY_BITS,
            collection: CollectionConfig::default(),
            secrets: HashMap::new(),
        }
    }
}
