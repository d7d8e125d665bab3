//! Split and merge over `Z_p`.
//!
//! ```
//! use custody_protocol::sharing::{merge, split, Shares};
//! use rand::rngs::OsRng;
//!
//! let shares = split("disk-key", "hello world", 3, 5, &mut OsRng).unwrap();
//! let three = Shares::new(shares.as_slice()[1..4].to_vec()).unwrap();
//! assert_eq!(merge(&three).unwrap().as_str(), "hello world");
//! ```

use std::collections::HashSet;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use rand::{CryptoRng, Rng, RngCore};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

use super::share::{Share, Shares};
use crate::config::{MAX_X_COORDINATE, MIN_THRESHOLD, MIN_X_COORDINATE};
use crate::crypto::field::{
    evaluate_polynomial, integer_to_string, modular_inverse, random_nonzero, reduce,
    select_prime, string_to_integer, FieldError,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during secret sharing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShamirError {
    /// Split parameters outside `2 <= threshold <= total`.
    #[error("invalid split parameters: threshold {threshold}, total {total} (need 2 <= threshold <= total)")]
    InvalidParameters {
        /// Requested threshold.
        threshold: usize,
        /// Requested share count.
        total: usize,
    },

    /// A share set must contain at least one share.
    #[error("share set is empty")]
    EmptyShares,

    /// Shares of different secrets or different splits were mixed.
    #[error("shares disagree on {field}")]
    Heterogeneous {
        /// The metadata field that differs.
        field: &'static str,
    },

    /// Fewer distinct points than the threshold. Reconstruction is refused
    /// rather than attempted.
    #[error("reconstruction needs {threshold} distinct shares, got {distinct}")]
    TooFewShares {
        /// Distinct x-coordinates available.
        distinct: usize,
        /// Shares required.
        threshold: usize,
    },

    /// Interpolation produced something that is not an encoded secret.
    /// Usually wrong or corrupted shares.
    #[error("reconstruction produced an invalid secret")]
    Reconstruction,

    #[error(transparent)]
    Field(#[from] FieldError),
}

// ---------------------------------------------------------------------------
// Split
// ---------------------------------------------------------------------------

/// Split `secret` into `total` shares, any `threshold` of which reconstruct
/// it.
pub fn split<R: RngCore + CryptoRng>(
    secret_id: &str,
    secret: &str,
    threshold: usize,
    total: usize,
    rng: &mut R,
) -> Result<Shares, ShamirError> {
    if threshold < MIN_THRESHOLD || threshold > total {
        return Err(ShamirError::InvalidParameters { threshold, total });
    }

    let s = string_to_integer(secret);
    let prime = select_prime(&(&s + BigUint::one()))?;
    let p = prime.value();

    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(s);
    for _ in 1..threshold {
        coefficients.push(random_nonzero(rng, &p));
    }

    let shares = draw_x_coordinates(total, rng)
        .into_iter()
        .map(|x| Share {
            secret_id: secret_id.to_owned(),
            x,
            y: evaluate_polynomial(&coefficients, &BigUint::from(x), &p),
            threshold,
            total,
            prime: Some(prime),
        })
        .collect();

    Shares::new(shares)
}

/// `count` distinct x-coordinates, drawn uniformly from
/// `[MIN_X_COORDINATE, MAX_X_COORDINATE]`. Collisions are replaced by
/// counting up from the current maximum.
fn draw_x_coordinates<R: RngCore>(count: usize, rng: &mut R) -> Vec<u64> {
    let mut seen = HashSet::with_capacity(count);
    let mut xs = Vec::with_capacity(count);

    for _ in 0..count {
        let x = rng.gen_range(MIN_X_COORDINATE..=MAX_X_COORDINATE);
        if seen.insert(x) {
            xs.push(x);
        }
    }

    let mut next = xs.iter().copied().max().unwrap_or(MIN_X_COORDINATE - 1) + 1;
    while xs.len() < count {
        if seen.insert(next) {
            xs.push(next);
        }
        next += 1;
    }
    xs
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Reconstruct the secret from a share set.
///
/// Uses the first `threshold` shares with distinct x. The result is only
/// returned after it decodes cleanly; anything else is an error.
pub fn merge(shares: &Shares) -> Result<Zeroizing<String>, ShamirError> {
    let used = shares.first_distinct();
    if used.len() < shares.threshold() {
        return Err(ShamirError::TooFewShares {
            distinct: used.len(),
            threshold: shares.threshold(),
        });
    }

    let prime = match shares.prime() {
        Some(prime) => prime,
        None => {
            let max_y = used.iter().map(|s| &s.y).max().cloned().unwrap_or_default();
            let guessed = select_prime(&(max_y + BigUint::one()))?;
            warn!(
                secret_id = shares.secret_id(),
                exponent = guessed.exponent(),
                "shares carry no field prime, guessing it from share values"
            );
            guessed
        }
    };

    let points: Vec<(u64, BigUint)> = used.iter().map(|s| (s.x, s.y.clone())).collect();
    let value = interpolate_at_zero(&points, &prime.value())?;

    let decoded = integer_to_string(&value).map_err(|_| ShamirError::Reconstruction)?;
    Ok(Zeroizing::new(decoded))
}

/// Lagrange interpolation of the polynomial through `points`, evaluated at
/// `x = 0`, modulo `p`.
///
/// With fewer points than the polynomial's degree + 1 the result is
/// unrelated to the true constant term.
pub fn interpolate_at_zero(points: &[(u64, BigUint)], p: &BigUint) -> Result<BigUint, FieldError> {
    let mut acc = BigUint::zero();

    for (i, (xi, yi)) in points.iter().enumerate() {
        let xi = BigInt::from(*xi);
        let mut numerator = BigUint::one();
        let mut denominator = BigUint::one();

        for (j, (xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let xj = BigInt::from(*xj);
            // L_i(0) = prod (0 - x_j) / (x_i - x_j)
            numerator = (numerator * reduce(&-&xj, p)) % p;
            denominator = (denominator * reduce(&(&xi - &xj), p)) % p;
        }

        let denominator = BigInt::from_biguint(Sign::Plus, denominator);
        let basis = numerator * modular_inverse(&denominator, p)? % p;
        acc = (acc + yi * basis) % p;
    }

    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn subset(shares: &Shares, indices: &[usize]) -> Shares {
        Shares::new(indices.iter().map(|&i| shares.as_slice()[i].clone()).collect()).unwrap()
    }

    #[test]
    fn hello_world_three_of_five() {
        let mut rng = StdRng::seed_from_u64(42);
        let shares = split("greeting", "hello world", 3, 5, &mut rng).unwrap();
        assert_eq!(shares.len(), 5);

        // Every 3-subset reconstructs.
        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let set = subset(&shares, &[a, b, c]);
                    assert_eq!(merge(&set).unwrap().as_str(), "hello world");
                }
            }
        }

        // No 2-subset does.
        for a in 0..5 {
            for b in (a + 1)..5 {
                let set = subset(&shares, &[a, b]);
                assert!(matches!(
                    merge(&set),
                    Err(ShamirError::TooFewShares { distinct: 2, threshold: 3 })
                ));
            }
        }
    }

    #[test]
    fn roundtrip_for_all_small_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        let secret = "correct horse battery staple";
        for total in 2..=20 {
            for threshold in 2..=total {
                let shares = split("s", secret, threshold, total, &mut rng).unwrap();
                let prefix = Shares::new(shares.as_slice()[..threshold].to_vec()).unwrap();
                assert_eq!(merge(&prefix).unwrap().as_str(), secret, "{threshold}-of-{total}");
            }
        }
    }

    #[test]
    fn any_random_subset_reconstructs() {
        let mut rng = StdRng::seed_from_u64(2);
        let shares = split("s", "ünïcødé secret ✓", 4, 9, &mut rng).unwrap();
        let mut indices: Vec<usize> = (0..9).collect();
        for _ in 0..20 {
            indices.shuffle(&mut rng);
            let set = subset(&shares, &indices[..4]);
            assert_eq!(merge(&set).unwrap().as_str(), "ünïcødé secret ✓");
        }
    }

    #[test]
    fn threshold_minus_one_points_do_not_reveal_secret() {
        let mut rng = StdRng::seed_from_u64(3);
        let secret = "top secret";
        let s = string_to_integer(secret);
        for _ in 0..25 {
            let shares = split("s", secret, 3, 5, &mut rng).unwrap();
            let p = shares.prime().unwrap().value();
            let points: Vec<(u64, BigUint)> =
                shares.iter().take(2).map(|sh| (sh.x, sh.y.clone())).collect();
            let guess = interpolate_at_zero(&points, &p).unwrap();
            assert_ne!(guess, s);
        }
    }

    #[test]
    fn split_shape() {
        let mut rng = StdRng::seed_from_u64(4);
        for (n, m) in [(2, 2), (3, 5), (7, 20)] {
            let shares = split("shape", "x", n, m, &mut rng).unwrap();
            assert_eq!(shares.len(), m);
            assert_eq!(shares.distinct_x(), m);
            for share in &shares {
                assert_eq!((share.threshold, share.total), (n, m));
                assert!(share.x >= MIN_X_COORDINATE);
                assert!(share.y < shares.prime().unwrap().value());
            }
        }
    }

    #[test]
    fn split_rejects_bad_parameters() {
        let mut rng = StdRng::seed_from_u64(5);
        for (n, m) in [(1, 3), (0, 0), (4, 3)] {
            assert_eq!(
                split("s", "x", n, m, &mut rng),
                Err(ShamirError::InvalidParameters { threshold: n, total: m })
            );
        }
    }

    #[test]
    fn prime_exceeds_encoded_secret() {
        let mut rng = StdRng::seed_from_u64(6);
        // 200 bytes plus the marker needs more than 1279 bits.
        let secret = "a".repeat(200);
        let shares = split("big", &secret, 2, 3, &mut rng).unwrap();
        assert_eq!(shares.prime().unwrap().exponent(), 2203);
        assert!(string_to_integer(&secret) < shares.prime().unwrap().value());
        assert_eq!(merge(&shares).unwrap().as_str(), secret);
    }

    #[test]
    fn duplicate_x_is_skipped_not_used_twice() {
        let mut rng = StdRng::seed_from_u64(7);
        let shares = split("dup", "payload", 2, 3, &mut rng).unwrap();
        let set = subset(&shares, &[0, 0, 2]);
        assert_eq!(merge(&set).unwrap().as_str(), "payload");

        let set = subset(&shares, &[1, 1, 1]);
        assert!(matches!(merge(&set), Err(ShamirError::TooFewShares { .. })));
    }

    #[test]
    fn corrupted_share_fails_decoding() {
        let mut rng = StdRng::seed_from_u64(8);
        let shares = split("c", "integrity", 2, 2, &mut rng).unwrap();
        let mut tampered = shares.into_vec();
        tampered[0].y += BigUint::one();
        let set = Shares::new(tampered).unwrap();
        assert_eq!(merge(&set), Err(ShamirError::Reconstruction));
    }

    #[test]
    fn legacy_shares_without_prime_still_merge() {
        let mut rng = StdRng::seed_from_u64(9);
        let shares = split("legacy", "old format", 2, 3, &mut rng).unwrap();
        let stripped: Vec<Share> = shares
            .into_iter()
            .map(|mut s| {
                s.prime = None;
                s
            })
            .collect();
        // A short secret lives in the smallest field, which is also what
        // the guess falls back to.
        let set = Shares::new(stripped).unwrap();
        assert_eq!(merge(&set).unwrap().as_str(), "old format");
    }

    #[test]
    fn x_coordinates_resolve_collisions() {
        let mut rng = StdRng::seed_from_u64(10);
        let xs = draw_x_coordinates(500, &mut rng);
        let unique: HashSet<_> = xs.iter().collect();
        assert_eq!(unique.len(), 500);
    }

    #[test]
    fn interpolation_with_duplicate_points_fails() {
        let p = BigUint::from(97u32);
        let points = vec![(3, BigUint::from(5u32)), (3, BigUint::from(8u32))];
        assert_eq!(interpolate_at_zero(&points, &p), Err(FieldError::NotInvertible));
    }

    #[test]
    fn interpolation_small_field() {
        // f(x) = 7 + 2x over Z_97: f(1) = 9, f(2) = 11
        let p = BigUint::from(97u32);
        let points = vec![(1, BigUint::from(9u32)), (2, BigUint::from(11u32))];
        assert_eq!(interpolate_at_zero(&points, &p).unwrap(), BigUint::from(7u32));
    }
}
