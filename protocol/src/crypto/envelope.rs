//! # Envelope Encryption
//!
//! Hybrid encryption for share values in transit and at rest with a third
//! party. Each message gets a fresh AES-256 key; that key is wrapped with
//! RSA-OAEP (SHA-256) under the recipient's public key.
//!
//! ## Wire format
//!
//! ```text
//! base64( wrapped_key || nonce (16) || tag (16) || body )
//! ```
//!
//! `wrapped_key` is exactly the recipient's modulus size in bytes, which is
//! how the decryptor finds the boundary. The AEAD is AES-256-GCM with a
//! 16-byte nonce and a detached 16-byte tag, so the layout has fixed-size
//! fields in front of a variable-length body.
//!
//! ## Custody transfer
//!
//! [`decrypt_and_reencrypt`] is the only way a share moves from one key
//! domain into another. The intermediate plaintext sits in a zeroizing buffer
//! inside that call and is never returned.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::{CryptoRng, RngCore};
use rsa::Oaep;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::keys::{KeyPair, PublicKey};
use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// AES-256-GCM parameterised for the 16-byte envelope nonce.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// Errors that can occur while sealing or opening an envelope.
///
/// As with every crypto error here, the variants say what went wrong at the
/// protocol level and nothing about the key or plaintext involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Tag mismatch or key unwrap failure: tampering, corruption or the
    /// wrong private key. Indistinguishable on purpose.
    #[error("envelope authentication failed -- wrong key or tampered ciphertext")]
    Authentication,

    /// The caller has no private key to open the envelope with.
    #[error("no private key available to open the envelope")]
    MissingPrivateKey,

    /// Not base64, or shorter than the fixed-size header.
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),

    /// RSA-OAEP refused to wrap the content key.
    #[error("failed to wrap the content key for the recipient")]
    KeyWrap,

    /// The envelope opened but the payload does not decode (not UTF-8, or
    /// not the value the caller expected inside).
    #[error("envelope payload does not decode")]
    Encoding,
}

fn oaep() -> Oaep {
    Oaep::new::<Sha256>()
}

/// Seal `message` for `recipient`.
pub fn encrypt<R: RngCore + CryptoRng>(
    message: &str,
    recipient: &PublicKey,
    rng: &mut R,
) -> Result<String, EnvelopeError> {
    let mut content_key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    rng.fill_bytes(&mut content_key[..]);
    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);

    let wrapped = recipient
        .as_rsa()
        .encrypt(rng, oaep(), &content_key[..])
        .map_err(|_| EnvelopeError::KeyWrap)?;

    let cipher = EnvelopeCipher::new(GenericArray::from_slice(&content_key[..]));
    let mut body = message.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&nonce), b"", &mut body)
        .map_err(|_| EnvelopeError::KeyWrap)?;

    let mut out =
        Vec::with_capacity(wrapped.len() + AES_NONCE_LENGTH + AES_TAG_LENGTH + body.len());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&body);
    Ok(BASE64.encode(out))
}

/// Open an envelope produced by [`encrypt`].
///
/// Accepts `&KeyPair` or `None`; the latter fails with
/// [`EnvelopeError::MissingPrivateKey`] before touching the ciphertext.
pub fn decrypt<'a>(
    ciphertext: &str,
    private: impl Into<Option<&'a KeyPair>>,
) -> Result<Zeroizing<String>, EnvelopeError> {
    let private = private.into().ok_or(EnvelopeError::MissingPrivateKey)?;

    let raw = BASE64
        .decode(ciphertext.trim())
        .map_err(|_| EnvelopeError::Malformed("not base64"))?;

    let key_len = private.public_key().size();
    if raw.len() < key_len + AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EnvelopeError::Malformed("shorter than the envelope header"));
    }
    let (wrapped, rest) = raw.split_at(key_len);
    let (nonce, rest) = rest.split_at(AES_NONCE_LENGTH);
    let (tag, body) = rest.split_at(AES_TAG_LENGTH);

    let content_key = Zeroizing::new(
        private
            .as_rsa()
            .decrypt(oaep(), wrapped)
            .map_err(|_| EnvelopeError::Authentication)?,
    );
    if content_key.len() != AES_KEY_LENGTH {
        return Err(EnvelopeError::Authentication);
    }

    let cipher = EnvelopeCipher::new(GenericArray::from_slice(&content_key[..]));
    let mut plaintext = Zeroizing::new(body.to_vec());
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            b"",
            &mut plaintext,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| EnvelopeError::Authentication)?;

    let text = std::str::from_utf8(&plaintext).map_err(|_| EnvelopeError::Encoding)?;
    Ok(Zeroizing::new(text.to_owned()))
}

/// Open an envelope with `own` and immediately reseal it for `recipient`.
pub fn decrypt_and_reencrypt<'a, R: RngCore + CryptoRng>(
    ciphertext: &str,
    own: impl Into<Option<&'a KeyPair>>,
    recipient: &PublicKey,
    rng: &mut R,
) -> Result<String, EnvelopeError> {
    let plaintext = decrypt(ciphertext, own)?;
    encrypt(&plaintext, recipient, rng)
}
