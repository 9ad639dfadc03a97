//! Long-term and ephemeral key material.

use crate::{z85, Error as ProtocolError};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::{CryptoRng, Rng};
use sha2::Sha256;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of every key handled by this crate.
pub const KEY_LENGTH: usize = 32;

/// Length of a key written as Z85 text.
pub const Z85_KEY_LENGTH: usize = 40;

const BOX_INFO: &[u8] = b"commonware-curve/box";

/// Errors that can occur when parsing provisioned keys.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("invalid key length: {0}")]
    InvalidLength(usize),
    #[error("invalid Z85 encoding")]
    InvalidEncoding,
}

/// Parses a key provisioned as 32 raw bytes or as 40 characters of Z85 text (optionally
/// followed by a NUL terminator).
pub fn parse_key(input: &[u8]) -> Result<[u8; KEY_LENGTH], Error> {
    let text = match input.len() {
        KEY_LENGTH => return read_key(input).ok_or(Error::InvalidLength(input.len())),
        Z85_KEY_LENGTH => input,
        n if n == Z85_KEY_LENGTH + 1 && input[Z85_KEY_LENGTH] == 0 => &input[..Z85_KEY_LENGTH],
        n => return Err(Error::InvalidLength(n)),
    };
    let decoded = Zeroizing::new(z85::decode(text).ok_or(Error::InvalidEncoding)?);
    read_key(&decoded).ok_or(Error::InvalidEncoding)
}

/// Parses a provisioned public key (see [parse_key]).
pub fn parse_public_key(input: &[u8]) -> Result<PublicKey, Error> {
    parse_key(input).map(PublicKey::from)
}

/// Copies exactly [KEY_LENGTH] bytes into an array.
pub fn read_key(bytes: &[u8]) -> Option<[u8; KEY_LENGTH]> {
    bytes.try_into().ok()
}

/// An X25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    secret: StaticSecret,
}

impl KeyPair {
    /// Generates a fresh key pair.
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(&mut *rng);
        let public = PublicKey::from(&secret);
        Self { public, secret }
    }

    /// Builds a key pair from a secret, deriving the public half.
    pub fn from_secret(secret: [u8; KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { public, secret }
    }

    /// Builds a key pair from both halves as provisioned.
    ///
    /// The public half is not checked against the secret.
    pub fn from_parts(secret: [u8; KEY_LENGTH], public: [u8; KEY_LENGTH]) -> Self {
        Self {
            public: PublicKey::from(public),
            secret: StaticSecret::from(secret),
        }
    }

    /// Builds a key pair from a provisioned secret and public key (raw or Z85).
    pub fn from_z85(secret: &[u8], public: &[u8]) -> Result<Self, Error> {
        let secret = Zeroizing::new(parse_key(secret)?);
        let public = parse_key(public)?;
        Ok(Self::from_parts(*secret, public))
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn seal(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; 24],
    plaintext: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| ProtocolError::CryptographicFailure)
}

fn open(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; 24],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| ProtocolError::CryptographicFailure)
}

/// Box key agreed between a local secret and a remote public key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_LENGTH]);

impl SharedSecret {
    /// Performs X25519 and expands the result into a box key.
    ///
    /// Fails if the exchange is not contributory (for example, when `public` is all zeros or of
    /// low order).
    pub fn derive(secret: &StaticSecret, public: &PublicKey) -> Result<Self, ProtocolError> {
        let shared = secret.diffie_hellman(public);
        if !shared.was_contributory() {
            return Err(ProtocolError::CryptographicFailure);
        }
        let mut key = [0u8; KEY_LENGTH];
        Hkdf::<Sha256>::new(None, shared.as_bytes())
            .expand(BOX_INFO, &mut key)
            .map_err(|_| ProtocolError::CryptographicFailure)?;
        Ok(Self(key))
    }

    /// Seals `plaintext`, appending the authentication tag.
    pub fn seal(&self, nonce: &[u8; 24], plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        seal(&self.0, nonce, plaintext)
    }

    /// Opens `ciphertext`, failing if it was not sealed with this key and nonce.
    pub fn open(
        &self,
        nonce: &[u8; 24],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        open(&self.0, nonce, ciphertext)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Symmetric key used by a listener to seal cookies.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CookieKey([u8; KEY_LENGTH]);

impl CookieKey {
    pub fn generate<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }

    pub fn seal(&self, nonce: &[u8; 24], plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        seal(&self.0, nonce, plaintext)
    }

    pub fn open(
        &self,
        nonce: &[u8; 24],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        open(&self.0, nonce, ciphertext)
    }
}

impl std::fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CookieKey(<redacted>)")
    }
}

/// The cookie key of a listener, shared by all of its server drivers.
///
/// The key is generated when the first cookie is minted. Rotating replaces the key, so cookies
/// minted before the rotation can no longer be opened.
#[derive(Debug, Default)]
pub struct CookieJar {
    key: RwLock<Option<Arc<CookieKey>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a jar holding `key`, so that listeners provisioned with the same key accept each
    /// other's cookies.
    pub fn with_key(key: CookieKey) -> Self {
        Self {
            key: RwLock::new(Some(Arc::new(key))),
        }
    }

    /// Returns the current key, if one has been generated.
    pub fn current(&self) -> Option<Arc<CookieKey>> {
        self.key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn current_or_generate<R: Rng + CryptoRng>(&self, rng: &mut R) -> Arc<CookieKey> {
        if let Some(key) = self.current() {
            return key;
        }
        let mut slot = self.key.write().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert_with(|| Arc::new(CookieKey::generate(rng)))
            .clone()
    }

    /// Replaces the current key with a fresh one.
    pub fn rotate<R: Rng + CryptoRng>(&self, rng: &mut R) {
        let key = Arc::new(CookieKey::generate(rng));
        *self.key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
    }
}
