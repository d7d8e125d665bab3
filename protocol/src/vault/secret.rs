//! Cleartext secrets held by a vault.

use std::fmt;

use rand::{CryptoRng, Rng, RngCore};
use zeroize::Zeroizing;

use crate::config::SECRET_ALPHABET;

/// A secret value in vault memory.
///
/// Wiped on drop. No `Serialize`, no `Display`, and `Debug` prints only the
/// length, so the value cannot leak through logging or serialization by
/// accident.
pub struct Secret {
    value: Zeroizing<String>,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Zeroizing::new(value.into()),
        }
    }

    /// `length` characters drawn uniformly from [`SECRET_ALPHABET`].
    pub fn random<R: RngCore + CryptoRng>(length: usize, rng: &mut R) -> Self {
        let value: String = (0..length)
            .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
            .collect();
        Self::new(value)
    }

    /// The cleartext. Keep the borrow short.
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl From<Zeroizing<String>> for Secret {
    fn from(value: Zeroizing<String>) -> Self {
        Self { value }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes redacted>)", self.value.len())
    }
}
