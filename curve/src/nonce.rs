//! Nonces for every box sealed by the handshake and the traffic that follows it.
//!
//! A nonce is 24 bytes. Short nonces (HELLO, INITIATE, READY, MESSAGE) are a 16-byte domain
//! tag followed by a big-endian 64-bit counter; only the counter is sent on the wire. Long
//! nonces (WELCOME, cookie, vouch) are an 8-byte domain tag followed by 16 random bytes, all of
//! which are sent on the wire.

use crate::Error;
use rand::{CryptoRng, Rng};

/// Length of a full nonce.
pub const NONCE_LENGTH: usize = 24;

/// Length of the counter carried by short nonces.
pub const SHORT_NONCE_LENGTH: usize = 8;

/// Length of the random suffix carried by long nonces.
pub const LONG_NONCE_LENGTH: usize = 16;

pub const HELLO: &[u8; 16] = b"CurveZMQHELLO---";
pub const INITIATE: &[u8; 16] = b"CurveZMQINITIATE";
pub const READY: &[u8; 16] = b"CurveZMQREADY---";
pub const MESSAGE_CLIENT: &[u8; 16] = b"CurveZMQMESSAGEC";
pub const MESSAGE_SERVER: &[u8; 16] = b"CurveZMQMESSAGES";

pub const WELCOME: &[u8; 8] = b"WELCOME-";
pub const COOKIE: &[u8; 8] = b"COOKIE--";
pub const VOUCH: &[u8; 8] = b"VOUCH---";

/// Builds a short nonce from a domain tag and a counter value.
pub fn short(tag: &[u8; 16], counter: u64) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..16].copy_from_slice(tag);
    nonce[16..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Builds a long nonce from a domain tag and a random suffix.
pub fn long(tag: &[u8; 8], suffix: &[u8; LONG_NONCE_LENGTH]) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    nonce[..8].copy_from_slice(tag);
    nonce[8..].copy_from_slice(suffix);
    nonce
}

/// Draws a fresh random suffix for a long nonce.
pub fn suffix<R: Rng + CryptoRng>(rng: &mut R) -> [u8; LONG_NONCE_LENGTH] {
    rng.gen()
}

/// Counter of one direction of a connection.
///
/// The sender calls [Counter::next] for every short nonce it uses. The receiver keeps its own
/// copy and calls [Counter::expect] with every counter value it receives, so that any replayed,
/// dropped or reordered command is detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counter {
    next: u64,
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter {
    /// Creates a counter whose first value is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose first value is `next`.
    ///
    /// A receiver uses this to adopt the first counter value a peer sends.
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// Returns the value the next call to [Counter::next] will produce.
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Returns the current value and advances the counter.
    ///
    /// Fails (without advancing) once the counter is exhausted, so a value is never reused.
    pub fn next(&mut self) -> Result<u64, Error> {
        let value = self.next;
        self.next = value.checked_add(1).ok_or(Error::CryptographicFailure)?;
        Ok(value)
    }

    /// Accepts `received` if-and-only-if it is exactly the next expected value.
    pub fn expect(&mut self, received: u64) -> Result<(), Error> {
        if received != self.next {
            return Err(Error::CryptographicFailure);
        }
        self.next()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_counter_sequence() {
        let mut counter = Counter::new();
        for expected in 1..=5 {
            assert_eq!(counter.next().unwrap(), expected);
        }
        assert_eq!(counter.peek(), 6);
    }

    #[test]
    fn test_counter_exhausted() {
        let mut counter = Counter { next: u64::MAX - 1 };
        assert_eq!(counter.next().unwrap(), u64::MAX - 1);
        assert_eq!(counter.next(), Err(Error::CryptographicFailure));
        assert_eq!(counter.peek(), u64::MAX);
    }

    #[test]
    fn test_expect() {
        let mut sender = Counter::new();
        let mut receiver = Counter::new();
        for _ in 0..3 {
            receiver.expect(sender.next().unwrap()).unwrap();
        }

        // Replay of the last value
        assert_eq!(receiver.expect(3), Err(Error::CryptographicFailure));

        // Skipped value
        assert_eq!(receiver.expect(5), Err(Error::CryptographicFailure));

        // Receiver did not move
        receiver.expect(4).unwrap();
    }

    #[test]
    fn test_starting_at() {
        let mut sender = Counter::starting_at(0);
        let mut receiver = Counter::starting_at(0);
        assert_eq!(sender.next().unwrap(), 0);
        receiver.expect(0).unwrap();
        assert_eq!(receiver.expect(0), Err(Error::CryptographicFailure));
        receiver.expect(sender.next().unwrap()).unwrap();
        assert_eq!(receiver.peek(), 2);
    }

    #[test]
    fn test_short_layout() {
        let nonce = short(READY, 0x0102);
        assert_eq!(&nonce[..16], READY);
        assert_eq!(&nonce[16..], &[0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_long_layout() {
        let mut rng = StdRng::seed_from_u64(0);
        let suffix = suffix(&mut rng);
        let nonce = long(COOKIE, &suffix);
        assert_eq!(&nonce[..8], COOKIE);
        assert_eq!(&nonce[8..], &suffix);
    }

    #[test]
    fn test_tags_are_distinct() {
        let tags = [HELLO, INITIATE, READY, MESSAGE_CLIENT, MESSAGE_SERVER];
        for (i, a) in tags.iter().enumerate() {
            for b in tags.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
            // Short tags never start with a long tag
            for tag in [WELCOME, COOKIE, VOUCH] {
                assert_ne!(&a[..8], tag);
            }
        }
    }
}
