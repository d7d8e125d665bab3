//! Share and share-set types.
//!
//! A [`Share`] here is the cleartext form: `y` is a plain integer. Anything
//! leaving the process goes out as a
//! [`SealedShare`](crate::transport::SealedShare) instead, with `y` inside an
//! envelope.

use std::collections::HashSet;
use std::fmt;

use num_bigint::BigUint;

use super::shamir::ShamirError;
use crate::crypto::field::MersennePrime;

/// One point `(x, y)` on a secret's polynomial, plus the metadata needed to
/// put it back together with its siblings.
///
/// `Debug` prints the size of `y`, never its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    /// Which secret this share belongs to.
    pub secret_id: String,
    /// Evaluation point. Never zero.
    pub x: u64,
    /// Polynomial value at `x`, reduced modulo the field prime.
    pub y: BigUint,
    /// Shares needed to reconstruct (`n`).
    pub threshold: usize,
    /// Shares produced by the split (`m`).
    pub total: usize,
    /// Field modulus. `None` only for shares from peers that predate prime
    /// tagging; merge then has to guess the modulus from the `y` values.
    pub prime: Option<MersennePrime>,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("secret_id", &self.secret_id)
            .field("x", &self.x)
            .field("y_bits", &self.y.bits())
            .field("threshold", &self.threshold)
            .field("total", &self.total)
            .field("prime", &self.prime.map(|p| p.exponent()))
            .finish()
    }
}

/// A non-empty collection of shares of one secret, all agreeing on
/// `secret_id`, `threshold`, `total` and `prime`.
///
/// Order is preserved; merge uses the first `threshold` distinct-x members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shares {
    inner: Vec<Share>,
}

impl Shares {
    /// Validate and wrap a list of shares.
    pub fn new(shares: Vec<Share>) -> Result<Self, ShamirError> {
        let first = shares.first().ok_or(ShamirError::EmptyShares)?;

        for share in &shares[1..] {
            let field = if share.secret_id != first.secret_id {
                Some("secret_id")
            } else if share.threshold != first.threshold {
                Some("threshold")
            } else if share.total != first.total {
                Some("total")
            } else if share.prime != first.prime {
                Some("prime")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(ShamirError::Heterogeneous { field });
            }
        }

        Ok(Self { inner: shares })
    }

    pub fn secret_id(&self) -> &str {
        &self.inner[0].secret_id
    }

    pub fn threshold(&self) -> usize {
        self.inner[0].threshold
    }

    pub fn total(&self) -> usize {
        self.inner[0].total
    }

    pub fn prime(&self) -> Option<MersennePrime> {
        self.inner[0].prime
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Share> {
        self.inner.iter()
    }

    pub fn as_slice(&self) -> &[Share] {
        &self.inner
    }

    pub fn into_vec(self) -> Vec<Share> {
        self.inner
    }

    /// Number of distinct x-coordinates in the set.
    pub fn distinct_x(&self) -> usize {
        self.inner.iter().map(|s| s.x).collect::<HashSet<_>>().len()
    }

    /// Whether there are enough distinct points to reconstruct.
    pub fn is_full_set(&self) -> bool {
        self.distinct_x() >= self.threshold()
    }

    /// The first `threshold` shares with pairwise-distinct x, in order. Fewer
    /// if the set is not full.
    pub(crate) fn first_distinct(&self) -> Vec<&Share> {
        let mut seen = HashSet::new();
        self.inner
            .iter()
            .filter(|s| seen.insert(s.x))
            .take(self.threshold())
            .collect()
    }
}

impl IntoIterator for Shares {
    type Item = Share;
    type IntoIter = std::vec::IntoIter<Share>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a> IntoIterator for &'a Shares {
    type Item = &'a Share;
    type IntoIter = std::slice::Iter<'a, Share>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
