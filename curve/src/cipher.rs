//! Encrypt and decrypt MESSAGE commands once a handshake has completed.

use crate::{
    command::{Kind, Message},
    keys::SharedSecret,
    nonce::{self, Counter},
    Error,
};
use bytes::Bytes;
use tracing::debug;

const FLAG_MORE: u8 = 0x01;

/// A decrypted application frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Whether more frames of the same logical message follow.
    pub more: bool,
    pub payload: Bytes,
}

/// Seals outbound MESSAGE commands.
///
/// The counter continues from the last handshake command sent in the same direction.
pub struct SendCipher {
    secret: SharedSecret,
    tag: &'static [u8; 16],
    counter: Counter,
}

impl SendCipher {
    pub(crate) fn new(secret: SharedSecret, tag: &'static [u8; 16], counter: Counter) -> Self {
        Self {
            secret,
            tag,
            counter,
        }
    }

    /// Seals `payload` into a MESSAGE command.
    ///
    /// Fails once the counter is exhausted.
    pub fn seal(&mut self, payload: &[u8], more: bool) -> Result<Bytes, Error> {
        let counter = self.counter.next()?;
        let mut plaintext = Vec::with_capacity(1 + payload.len());
        plaintext.push(if more { FLAG_MORE } else { 0 });
        plaintext.extend_from_slice(payload);
        let sealed = self
            .secret
            .seal(&nonce::short(self.tag, counter), &plaintext)?;
        Ok(Message {
            nonce: counter,
            sealed: &sealed,
        }
        .encode())
    }
}

#[cfg(test)]
impl SendCipher {
    pub(crate) fn secret(&self) -> &SharedSecret {
        &self.secret
    }
}

impl std::fmt::Debug for SendCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCipher")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Opens inbound MESSAGE commands.
///
/// Only the exact next counter value is accepted, so replayed, dropped and reordered commands
/// are all rejected. A rejected command does not advance the counter, but the connection should
/// be torn down after any error.
pub struct RecvCipher {
    secret: SharedSecret,
    tag: &'static [u8; 16],
    counter: Counter,
}

impl RecvCipher {
    pub(crate) fn new(secret: SharedSecret, tag: &'static [u8; 16], counter: Counter) -> Self {
        Self {
            secret,
            tag,
            counter,
        }
    }

    /// Opens a MESSAGE command.
    pub fn open(&mut self, command: &[u8]) -> Result<Frame, Error> {
        let message = Message::decode(command)?;
        if message.nonce != self.counter.peek() {
            debug!(
                received = message.nonce,
                expected = self.counter.peek(),
                "unexpected message counter"
            );
            return Err(Error::CryptographicFailure);
        }
        let plaintext = self
            .secret
            .open(&nonce::short(self.tag, message.nonce), message.sealed)?;
        let (&flags, payload) = plaintext
            .split_first()
            .ok_or(Error::MalformedCommand(Kind::Message))?;
        self.counter.expect(message.nonce)?;
        Ok(Frame {
            more: flags & FLAG_MORE != 0,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
impl RecvCipher {
    pub(crate) fn secret(&self) -> &SharedSecret {
        &self.secret
    }
}

impl std::fmt::Debug for RecvCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvCipher")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use rand::{rngs::StdRng, SeedableRng};

    fn pair() -> (SendCipher, RecvCipher) {
        let mut rng = StdRng::seed_from_u64(0);
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let mut counter = Counter::new();
        counter.next().unwrap();
        counter.next().unwrap();
        (
            SendCipher::new(
                SharedSecret::derive(a.secret(), b.public()).unwrap(),
                nonce::MESSAGE_CLIENT,
                counter,
            ),
            RecvCipher::new(
                SharedSecret::derive(b.secret(), a.public()).unwrap(),
                nonce::MESSAGE_CLIENT,
                counter,
            ),
        )
    }

    #[test]
    fn test_frames() {
        let (mut sender, mut receiver) = pair();
        let first = sender.seal(b"hello", true).unwrap();
        assert_eq!(&first[..8], b"\x07MESSAGE");
        assert_eq!(&first[8..16], &3u64.to_be_bytes());
        let second = sender.seal(b"", false).unwrap();
        assert_eq!(second.len(), crate::command::MESSAGE_MIN_LENGTH);

        let frame = receiver.open(&first).unwrap();
        assert!(frame.more);
        assert_eq!(frame.payload.as_ref(), b"hello");
        let frame = receiver.open(&second).unwrap();
        assert!(!frame.more);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_replay_rejected() {
        let (mut sender, mut receiver) = pair();
        let message = sender.seal(b"once", false).unwrap();
        receiver.open(&message).unwrap();
        assert_eq!(receiver.open(&message), Err(Error::CryptographicFailure));
    }

    #[test]
    fn test_reorder_rejected() {
        let (mut sender, mut receiver) = pair();
        let first = sender.seal(b"first", false).unwrap();
        let second = sender.seal(b"second", false).unwrap();
        assert_eq!(receiver.open(&second), Err(Error::CryptographicFailure));

        // The rejected command did not advance the receiver
        assert_eq!(receiver.open(&first).unwrap().payload.as_ref(), b"first");
        assert_eq!(receiver.open(&second).unwrap().payload.as_ref(), b"second");
    }

    #[test]
    fn test_tampering_rejected() {
        let (mut sender, mut receiver) = pair();
        let message = sender.seal(b"payload", false).unwrap();
        for i in 16..message.len() {
            let mut tampered = message.to_vec();
            tampered[i] ^= 1;
            assert_eq!(receiver.open(&tampered), Err(Error::CryptographicFailure));
        }
        receiver.open(&message).unwrap();
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let (mut sender, _) = pair();
        let (_, receiver) = pair();
        let mut receiver = RecvCipher {
            tag: nonce::MESSAGE_SERVER,
            ..receiver
        };
        let message = sender.seal(b"payload", false).unwrap();
        assert_eq!(receiver.open(&message), Err(Error::CryptographicFailure));
    }

    #[test]
    fn test_malformed() {
        let (_, mut receiver) = pair();
        assert_eq!(
            receiver.open(b"\x07MESSAGE"),
            Err(Error::MalformedCommand(Kind::Message))
        );
        let mut command = vec![0u8; 40];
        command[..8].copy_from_slice(b"\x07MESSAGX");
        assert_eq!(receiver.open(&command), Err(Error::UnexpectedCommand));
    }
}
