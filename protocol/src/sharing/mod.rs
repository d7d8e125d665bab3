//! # Shamir Secret Sharing
//!
//! Splits a UTF-8 secret into `m` points on a random polynomial of degree
//! `n - 1` over a Mersenne prime field, and puts it back together from any
//! `n` of them.
//!
//! ## Security Model
//!
//! - Coefficients are uniform in `[1, p - 1]`, drawn from a caller-supplied
//!   CSPRNG.
//! - `n - 1` shares say nothing about the secret; `n` determine it uniquely
//!   because the field prime is strictly larger than the encoded secret.
//! - Each share records its field prime, so merge never has to infer the
//!   modulus from the points it was handed.

pub mod shamir;
pub mod share;

pub use shamir::{interpolate_at_zero, merge, split, ShamirError};
pub use share::{Share, Shares};
