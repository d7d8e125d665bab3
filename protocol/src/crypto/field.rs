//! # Prime Field Arithmetic
//!
//! Shares live in `Z_p` for a Mersenne prime `p = 2^e - 1` picked from
//! [`MERSENNE_EXPONENTS`]. A secret string is mapped to one big integer, so a
//! single polynomial carries the whole secret (no per-byte splitting as in
//! GF(256) schemes). The price is big-integer arithmetic; the payoff is that
//! shares are just `(x, y)` pairs.
//!
//! ## String encoding
//!
//! `string_to_integer` interprets `0x01 || utf8(s)` as a big-endian base-256
//! number. The marker byte makes the mapping total and invertible: leading
//! NUL characters survive, and the empty string maps to `1` instead of
//! disappearing. Decoding rejects anything without the marker, which also
//! catches most garbage produced by interpolating the wrong points.

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_traits::{One, Signed, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MERSENNE_EXPONENTS, SECRET_ENCODING_MARKER};

/// Errors from field arithmetic and the string/integer mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The integer does not map back to a UTF-8 string.
    #[error("integer does not decode to a UTF-8 string")]
    Decoding,

    /// No prime in the table is large enough for the value.
    #[error("value needs {bits} bits but the largest supported prime is 2^{max_exponent} - 1")]
    SecretTooLarge {
        /// Bit length of the value that did not fit.
        bits: u64,
        /// Exponent of the largest prime in the table.
        max_exponent: u32,
    },

    /// A share referenced a prime that is not in the table.
    #[error("2^{0} - 1 is not a supported field prime")]
    UnknownPrime(u32),

    /// Zero (mod p) has no multiplicative inverse.
    #[error("value has no inverse modulo the field prime")]
    NotInvertible,
}

// ---------------------------------------------------------------------------
// MersennePrime
// ---------------------------------------------------------------------------

/// A field modulus from the Mersenne table, identified by its exponent.
///
/// Only the exponent is stored and transmitted; the value is rebuilt on
/// demand. Serializes as the bare exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MersennePrime {
    exponent: u32,
}

impl MersennePrime {
    /// Look up the prime `2^exponent - 1`. Only exponents from the table are
    /// accepted.
    pub fn from_exponent(exponent: u32) -> Result<Self, FieldError> {
        if MERSENNE_EXPONENTS.contains(&exponent) {
            Ok(Self { exponent })
        } else {
            Err(FieldError::UnknownPrime(exponent))
        }
    }

    /// The exponent `e` of `2^e - 1`.
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// The prime itself.
    pub fn value(&self) -> BigUint {
        (BigUint::one() << self.exponent as usize) - BigUint::one()
    }
}

impl TryFrom<u32> for MersennePrime {
    type Error = FieldError;

    fn try_from(exponent: u32) -> Result<Self, Self::Error> {
        Self::from_exponent(exponent)
    }
}

impl From<MersennePrime> for u32 {
    fn from(prime: MersennePrime) -> Self {
        prime.exponent
    }
}

// ---------------------------------------------------------------------------
// String <-> Integer
// ---------------------------------------------------------------------------

/// Map a string to a non-negative integer. Inverse of [`integer_to_string`].
pub fn string_to_integer(s: &str) -> BigUint {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.push(SECRET_ENCODING_MARKER);
    bytes.extend_from_slice(s.as_bytes());
    BigUint::from_bytes_be(&bytes)
}

/// Map an integer produced by [`string_to_integer`] back to its string.
///
/// Fails with [`FieldError::Decoding`] if the marker byte is missing or the
/// payload is not valid UTF-8.
pub fn integer_to_string(value: &BigUint) -> Result<String, FieldError> {
    let bytes = value.to_bytes_be();
    match bytes.split_first() {
        Some((&SECRET_ENCODING_MARKER, payload)) => {
            String::from_utf8(payload.to_vec()).map_err(|_| FieldError::Decoding)
        }
        _ => Err(FieldError::Decoding),
    }
}

// ---------------------------------------------------------------------------
// Prime Selection
// ---------------------------------------------------------------------------

/// Smallest table prime `p` with `p >= lower_bound`.
///
/// Since `2^e - 1` is the largest `e`-bit number, `p >= lower_bound` holds
/// exactly when `lower_bound` fits in `e` bits, so no big values are built.
pub fn select_prime(lower_bound: &BigUint) -> Result<MersennePrime, FieldError> {
    let bits = lower_bound.bits();
    MERSENNE_EXPONENTS
        .iter()
        .find(|&&e| bits <= u64::from(e))
        .map(|&exponent| MersennePrime { exponent })
        .ok_or(FieldError::SecretTooLarge {
            bits,
            max_exponent: MERSENNE_EXPONENTS[MERSENNE_EXPONENTS.len() - 1],
        })
}

// ---------------------------------------------------------------------------
// Modular Arithmetic
// ---------------------------------------------------------------------------

/// Reduce a signed value into `[0, p)`.
pub fn reduce(value: &BigInt, p: &BigUint) -> BigUint {
    let modulus = BigInt::from_biguint(Sign::Plus, p.clone());
    let mut r = value % &modulus;
    if r.is_negative() {
        r += &modulus;
    }
    // r is in [0, p) here, so the sign is never Minus.
    r.magnitude().clone()
}

/// Multiplicative inverse of `a` modulo the prime `p`, by the extended
/// Euclidean algorithm.
pub fn modular_inverse(a: &BigInt, p: &BigUint) -> Result<BigUint, FieldError> {
    let a = reduce(a, p);
    if a.is_zero() {
        return Err(FieldError::NotInvertible);
    }

    let mut old_r = BigInt::from_biguint(Sign::Plus, a);
    let mut r = BigInt::from_biguint(Sign::Plus, p.clone());
    let mut old_s = BigInt::one();
    let mut s = BigInt::zero();

    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return Err(FieldError::NotInvertible);
    }
    Ok(reduce(&old_s, p))
}

/// Evaluate `sum(c_i * x^i) mod p` by Horner's rule. `coefficients[0]` is the
/// constant term.
pub fn evaluate_polynomial(coefficients: &[BigUint], x: &BigUint, p: &BigUint) -> BigUint {
    coefficients
        .iter()
        .rev()
        .fold(BigUint::zero(), |acc, c| (acc * x + c) % p)
}

/// Uniformly random field element in `[1, p - 1]`.
pub fn random_nonzero<R: RngCore + CryptoRng + ?Sized>(rng: &mut R, p: &BigUint) -> BigUint {
    rng.gen_biguint_range(&BigUint::one(), p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_prime() -> BigUint {
        MersennePrime::from_exponent(1279).unwrap().value()
    }

    #[test]
    fn string_integer_roundtrip() {
        for s in ["", "a", "hello world", "\0\0leading nul", "héllo wörld ✓", "🦀🔐"] {
            let n = string_to_integer(s);
            assert_eq!(integer_to_string(&n).unwrap(), s);
        }
    }

    #[test]
    fn encoding_is_big_endian_with_marker() {
        // 0x01 'A' -> 0x0141
        assert_eq!(string_to_integer("A"), BigUint::from(0x0141u32));
        assert_eq!(string_to_integer(""), BigUint::one());
    }

    #[test]
    fn decoding_rejects_missing_marker() {
        assert_eq!(
            integer_to_string(&BigUint::from(0x41u32)),
            Err(FieldError::Decoding)
        );
        assert_eq!(integer_to_string(&BigUint::zero()), Err(FieldError::Decoding));
    }

    #[test]
    fn decoding_rejects_invalid_utf8() {
        // marker followed by a lone continuation byte
        let n = BigUint::from_bytes_be(&[0x01, 0x80]);
        assert_eq!(integer_to_string(&n), Err(FieldError::Decoding));
    }

    #[test]
    fn select_prime_picks_smallest_sufficient() {
        assert_eq!(select_prime(&BigUint::zero()).unwrap().exponent(), 1279);
        assert_eq!(select_prime(&BigUint::from(12345u32)).unwrap().exponent(), 1279);

        // Exactly 2^1279 - 1 still fits the first prime.
        let p = small_prime();
        assert_eq!(select_prime(&p).unwrap().exponent(), 1279);

        // One more needs the next one.
        let over = &p + BigUint::one();
        assert_eq!(select_prime(&over).unwrap().exponent(), 2203);
    }

    #[test]
    fn select_prime_rejects_oversized_values() {
        let huge = BigUint::one() << 30402457usize;
        assert!(matches!(
            select_prime(&huge),
            Err(FieldError::SecretTooLarge { max_exponent: 30402457, .. })
        ));
    }

    #[test]
    fn mersenne_prime_lookup() {
        assert!(MersennePrime::from_exponent(1279).is_ok());
        assert_eq!(
            MersennePrime::from_exponent(1280),
            Err(FieldError::UnknownPrime(1280))
        );
        let p = MersennePrime::from_exponent(2203).unwrap();
        assert_eq!(p.exponent(), 2203);
        assert_eq!(p.value().bits(), 2203);
    }

    #[test]
    fn mersenne_prime_serializes_as_exponent() {
        let p = MersennePrime::from_exponent(4253).unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "4253");
        let back: MersennePrime = serde_json::from_str("4253").unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<MersennePrime>("17").is_err());
    }

    #[test]
    fn modular_inverse_small_field() {
        let p = BigUint::from(97u32);
        for a in 1..97i64 {
            let inv = modular_inverse(&BigInt::from(a), &p).unwrap();
            assert_eq!((BigUint::from(a as u64) * inv) % &p, BigUint::one());
        }
    }

    #[test]
    fn modular_inverse_of_negative_value() {
        let p = BigUint::from(97u32);
        let inv = modular_inverse(&BigInt::from(-5), &p).unwrap();
        // -5 = 92 mod 97
        assert_eq!((BigUint::from(92u32) * inv) % &p, BigUint::one());
    }

    #[test]
    fn modular_inverse_of_zero_fails() {
        let p = small_prime();
        assert_eq!(
            modular_inverse(&BigInt::zero(), &p),
            Err(FieldError::NotInvertible)
        );
        let multiple = BigInt::from_biguint(Sign::Plus, &p * BigUint::from(3u32));
        assert_eq!(modular_inverse(&multiple, &p), Err(FieldError::NotInvertible));
    }

    #[test]
    fn modular_inverse_large_field() {
        let p = small_prime();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let a = random_nonzero(&mut rng, &p);
            let inv = modular_inverse(&BigInt::from_biguint(Sign::Plus, a.clone()), &p).unwrap();
            assert_eq!((a * inv) % &p, BigUint::one());
        }
    }

    #[test]
    fn horner_matches_naive_evaluation() {
        let p = BigUint::from(1_000_003u32);
        let coefficients: Vec<BigUint> = [5u32, 3, 7, 11].iter().map(|&c| c.into()).collect();
        let x = BigUint::from(12u32);
        // 5 + 3*12 + 7*144 + 11*1728
        let expected = BigUint::from(5u32 + 36 + 1008 + 19008) % &p;
        assert_eq!(evaluate_polynomial(&coefficients, &x, &p), expected);
    }

    #[test]
    fn polynomial_results_are_reduced() {
        let p = BigUint::from(13u32);
        let coefficients: Vec<BigUint> = [100u32, 200].iter().map(|&c| c.into()).collect();
        let y = evaluate_polynomial(&coefficients, &BigUint::from(7u32), &p);
        assert!(y < p);
        assert_eq!(y, BigUint::from((100u32 + 200 * 7) % 13));
    }

    #[test]
    fn random_nonzero_stays_in_range() {
        let p = BigUint::from(5u32);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let v = random_nonzero(&mut rng, &p);
            assert!(!v.is_zero());
            assert!(v < p);
        }
    }
}
