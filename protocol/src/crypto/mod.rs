//! # Cryptographic Primitives
//!
//! Everything the custody protocol needs from cryptography, and no more:
//!
//! - **Prime field arithmetic** over Mersenne primes, for Shamir sharing.
//! - **RSA keys** identifying agents and vaults.
//! - **Envelope encryption** (RSA-OAEP wrapped AES-256-GCM) for share values.
//!
//! Nothing here is hand-rolled below the level of "glue audited crates
//! together". The field code is plain big-integer arithmetic; the ciphers
//! come from RustCrypto.

pub mod envelope;
pub mod field;
pub mod keys;

pub use envelope::{decrypt, decrypt_and_reencrypt, encrypt, EnvelopeError};
pub use field::{FieldError, MersennePrime};
pub use keys::{KeyError, KeyPair, PublicKey};
