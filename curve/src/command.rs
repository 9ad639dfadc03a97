//! Wire layouts of the commands exchanged by the handshake and the traffic that follows it.
//!
//! Every command starts with a 1-byte name length followed by the ASCII name. Decoding checks,
//! in order, the length (exact for HELLO and WELCOME, minimum for the others), the name and (for
//! HELLO) the version. Boxes are returned still sealed: opening them is the job of the drivers.

use crate::{cookie::COOKIE_LENGTH, nonce::LONG_NONCE_LENGTH, Error, TAG_LENGTH};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use x25519_dalek::PublicKey;

/// Protocol version carried in HELLO.
pub const VERSION: [u8; 2] = [1, 0];

const HELLO_PADDING: usize = 72;

/// Length of the plaintext sealed in HELLO.
pub const HELLO_PLAINTEXT_LENGTH: usize = 64;

/// Length of the box carried by HELLO.
pub const HELLO_BOX_LENGTH: usize = HELLO_PLAINTEXT_LENGTH + TAG_LENGTH;

/// Length of the box carried by WELCOME (`S'` and the cookie).
pub const WELCOME_BOX_LENGTH: usize = 32 + COOKIE_LENGTH + TAG_LENGTH;

/// Length of a vouch (its nonce suffix and the box of `C' || S`).
pub const VOUCH_LENGTH: usize = LONG_NONCE_LENGTH + 64 + TAG_LENGTH;

/// Shortest box carried by INITIATE (`C` and the vouch, no metadata).
pub const INITIATE_MIN_BOX_LENGTH: usize = 32 + VOUCH_LENGTH + TAG_LENGTH;

pub const HELLO_LENGTH: usize = 1 + 5 + 2 + HELLO_PADDING + 32 + 8 + HELLO_BOX_LENGTH;
pub const WELCOME_LENGTH: usize = 1 + 7 + LONG_NONCE_LENGTH + WELCOME_BOX_LENGTH;
pub const INITIATE_MIN_LENGTH: usize = 1 + 8 + COOKIE_LENGTH + 8 + INITIATE_MIN_BOX_LENGTH;
pub const READY_MIN_LENGTH: usize = 1 + 5 + 8 + TAG_LENGTH;
pub const MESSAGE_MIN_LENGTH: usize = 1 + 7 + 8 + 1 + TAG_LENGTH;

/// The type of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Hello,
    Welcome,
    Initiate,
    Ready,
    Message,
}

impl Kind {
    /// Name carried on the wire.
    pub fn name(&self) -> &'static [u8] {
        match self {
            Kind::Hello => b"HELLO",
            Kind::Welcome => b"WELCOME",
            Kind::Initiate => b"INITIATE",
            Kind::Ready => b"READY",
            Kind::Message => b"MESSAGE",
        }
    }

    fn prefix_length(&self) -> usize {
        1 + self.name().len()
    }

    fn put_prefix(&self, buf: &mut BytesMut) {
        let name = self.name();
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
    }

    /// Checks the length and name of `command`.
    fn check(&self, command: &[u8], length: usize, exact: bool) -> Result<(), Error> {
        let malformed = if exact {
            command.len() != length
        } else {
            command.len() < length
        };
        if malformed {
            return Err(Error::MalformedCommand(*self));
        }
        let name = self.name();
        if command[0] as usize != name.len() || &command[1..self.prefix_length()] != name {
            return Err(Error::UnexpectedCommand);
        }
        Ok(())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Names are ASCII
        f.write_str(std::str::from_utf8(self.name()).unwrap_or_default())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&bytes[..N]);
    buf
}

/// Opens a handshake: the client's ephemeral key and proof that the client knows `S`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hello {
    pub client_ephemeral: PublicKey,
    pub nonce: u64,
    pub sealed: [u8; HELLO_BOX_LENGTH],
}

impl Hello {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_LENGTH);
        Kind::Hello.put_prefix(&mut buf);
        buf.put_slice(&VERSION);
        buf.put_bytes(0, HELLO_PADDING);
        buf.put_slice(self.client_ephemeral.as_bytes());
        buf.put_u64(self.nonce);
        buf.put_slice(&self.sealed);
        buf.freeze()
    }

    pub fn decode(command: &[u8]) -> Result<Self, Error> {
        Kind::Hello.check(command, HELLO_LENGTH, true)?;
        if command[6..8] != VERSION {
            return Err(Error::MalformedCommand(Kind::Hello));
        }
        let offset = 8 + HELLO_PADDING;
        Ok(Self {
            client_ephemeral: PublicKey::from(read_array::<32>(&command[offset..])),
            nonce: read_u64(&command[offset + 32..]),
            sealed: read_array(&command[offset + 40..]),
        })
    }
}

/// The server's reply to HELLO: its ephemeral key and a cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Welcome {
    pub nonce: [u8; LONG_NONCE_LENGTH],
    pub sealed: [u8; WELCOME_BOX_LENGTH],
}

impl Welcome {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WELCOME_LENGTH);
        Kind::Welcome.put_prefix(&mut buf);
        buf.put_slice(&self.nonce);
        buf.put_slice(&self.sealed);
        buf.freeze()
    }

    pub fn decode(command: &[u8]) -> Result<Self, Error> {
        Kind::Welcome.check(command, WELCOME_LENGTH, true)?;
        Ok(Self {
            nonce: read_array(&command[8..]),
            sealed: read_array(&command[8 + LONG_NONCE_LENGTH..]),
        })
    }
}

/// The client's proof of identity, echoing the cookie from WELCOME.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Initiate<'a> {
    pub cookie: [u8; COOKIE_LENGTH],
    pub nonce: u64,
    pub sealed: &'a [u8],
}

impl Initiate<'_> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9 + COOKIE_LENGTH + 8 + self.sealed.len());
        Kind::Initiate.put_prefix(&mut buf);
        buf.put_slice(&self.cookie);
        buf.put_u64(self.nonce);
        buf.put_slice(self.sealed);
        buf.freeze()
    }
}

impl<'a> Initiate<'a> {
    pub fn decode(command: &'a [u8]) -> Result<Self, Error> {
        Kind::Initiate.check(command, INITIATE_MIN_LENGTH, false)?;
        Ok(Self {
            cookie: read_array(&command[9..]),
            nonce: read_u64(&command[9 + COOKIE_LENGTH..]),
            sealed: &command[9 + COOKIE_LENGTH + 8..],
        })
    }
}

/// The server's acceptance, carrying its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ready<'a> {
    pub nonce: u64,
    pub sealed: &'a [u8],
}

impl Ready<'_> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(6 + 8 + self.sealed.len());
        Kind::Ready.put_prefix(&mut buf);
        buf.put_u64(self.nonce);
        buf.put_slice(self.sealed);
        buf.freeze()
    }
}

impl<'a> Ready<'a> {
    pub fn decode(command: &'a [u8]) -> Result<Self, Error> {
        Kind::Ready.check(command, READY_MIN_LENGTH, false)?;
        Ok(Self {
            nonce: read_u64(&command[6..]),
            sealed: &command[14..],
        })
    }
}

/// An encrypted application frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<'a> {
    pub nonce: u64,
    pub sealed: &'a [u8],
}

impl Message<'_> {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + 8 + self.sealed.len());
        Kind::Message.put_prefix(&mut buf);
        buf.put_u64(self.nonce);
        buf.put_slice(self.sealed);
        buf.freeze()
    }
}

impl<'a> Message<'a> {
    pub fn decode(command: &'a [u8]) -> Result<Self, Error> {
        Kind::Message.check(command, MESSAGE_MIN_LENGTH, false)?;
        Ok(Self {
            nonce: read_u64(&command[8..]),
            sealed: &command[16..],
        })
    }
}
