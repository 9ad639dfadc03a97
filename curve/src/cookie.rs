//! Stateless handshake cookies.
//!
//! Instead of storing its ephemeral secret between WELCOME and INITIATE, the server seals the
//! client's ephemeral public key and its own ephemeral secret under the listener's
//! [CookieKey] and sends the result to the client, which must echo it back unchanged.

use crate::{
    keys::{read_key, CookieKey, KEY_LENGTH},
    nonce::{self, LONG_NONCE_LENGTH},
    Error, TAG_LENGTH,
};
use rand::{CryptoRng, Rng};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Length of a cookie on the wire.
pub const COOKIE_LENGTH: usize = LONG_NONCE_LENGTH + 2 * KEY_LENGTH + TAG_LENGTH;

/// An opaque cookie: a random nonce suffix followed by the sealed `C' || s'`.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie([u8; COOKIE_LENGTH]);

impl Cookie {
    /// Seals the client's ephemeral public key and the server's ephemeral secret.
    pub fn seal<R: Rng + CryptoRng>(
        rng: &mut R,
        key: &CookieKey,
        client_ephemeral: &PublicKey,
        server_ephemeral: &StaticSecret,
    ) -> Result<Self, Error> {
        let suffix = nonce::suffix(rng);
        let mut plaintext = Zeroizing::new([0u8; 2 * KEY_LENGTH]);
        plaintext[..KEY_LENGTH].copy_from_slice(client_ephemeral.as_bytes());
        plaintext[KEY_LENGTH..].copy_from_slice(&server_ephemeral.to_bytes());
        let sealed = key.seal(&nonce::long(nonce::COOKIE, &suffix), plaintext.as_slice())?;

        let mut cookie = [0u8; COOKIE_LENGTH];
        cookie[..LONG_NONCE_LENGTH].copy_from_slice(&suffix);
        cookie[LONG_NONCE_LENGTH..].copy_from_slice(&sealed);
        Ok(Self(cookie))
    }

    /// Recovers the client's ephemeral public key and the server's ephemeral secret.
    ///
    /// Fails if the cookie was altered or sealed under another key.
    pub fn open(&self, key: &CookieKey) -> Result<(PublicKey, StaticSecret), Error> {
        let mut suffix = [0u8; LONG_NONCE_LENGTH];
        suffix.copy_from_slice(&self.0[..LONG_NONCE_LENGTH]);
        let plaintext = key.open(
            &nonce::long(nonce::COOKIE, &suffix),
            &self.0[LONG_NONCE_LENGTH..],
        )?;
        let client = read_key(&plaintext[..KEY_LENGTH]).ok_or(Error::CryptographicFailure)?;
        let server = Zeroizing::new(
            read_key(&plaintext[KEY_LENGTH..]).ok_or(Error::CryptographicFailure)?,
        );
        Ok((PublicKey::from(client), StaticSecret::from(*server)))
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LENGTH] {
        &self.0
    }
}

impl From<[u8; COOKIE_LENGTH]> for Cookie {
    fn from(bytes: [u8; COOKIE_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Cookie {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bytes
            .try_into()
            .map(Self)
            .map_err(|_| Error::CryptographicFailure)
    }
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cookie(..)")
    }
}
