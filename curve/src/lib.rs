//! Authenticate peers and encrypt commands with an X25519 cookie handshake.
//!
//! This crate provides the handshake engine of a secured command transport: a client and a
//! server state machine that exchange four commands (HELLO, WELCOME, INITIATE and READY) to
//! authenticate each other's long-term X25519 identities, agree on a per-connection session key
//! and then protect every subsequent MESSAGE command with authenticated encryption. The framing
//! of commands (and the greeting that selects this mechanism) is left to the surrounding
//! transport: every operation consumes exactly one command and produces at most one command.
//!
//! # Design
//!
//! ## Handshake
//!
//! The **client** knows the server's long-term public key `S` in advance and owns a long-term
//! key pair `(C, c)`. Both sides generate a fresh ephemeral pair per attempt (`C'`/`c'` and
//! `S'`/`s'`).
//!
//! - HELLO (client to server) carries `C'` in the clear and a box of 64 zero bytes sealed for
//!   `(c', S)`. It is padded to 200 bytes so that it is never smaller than the WELCOME it
//!   provokes (the handshake cannot be used to amplify traffic against a spoofed address).
//! - WELCOME (server to client) carries `S'` and a [cookie::Cookie], sealed for `(s, C')`.
//! - INITIATE (client to server) echoes the cookie and carries, sealed for `(c', S')`, the
//!   client's long-term key `C`, a vouch (a box of `C' || S` sealed for `(c, S')` that binds the
//!   long-term identity to this ephemeral key) and the client's [metadata::Metadata].
//! - READY (server to client) carries the server's metadata sealed for `(s', C')`.
//!
//! Between INITIATE and READY the server parks the handshake and asks an external
//! [auth::Authorizer] whether the (now verified) client key may connect.
//!
//! ## Cookies
//!
//! The server does not keep `s'` after sending WELCOME. Instead, `C' || s'` is sealed under a
//! listener-wide [keys::CookieKey] and handed to the client, which must return it verbatim in
//! INITIATE. A flood of bogus HELLOs therefore costs the server no memory.
//!
//! ## Encryption
//!
//! Boxes are XChaCha20-Poly1305 keyed by an HKDF-SHA256 expansion of an X25519 shared secret.
//! Each shared secret is derived once per key pair combination and reused. Nonces are 24 bytes:
//! a 16-byte domain tag unique to the command type followed by a 64-bit big-endian counter. The
//! counter of each direction starts with the first handshake command and is never reset. Both
//! drivers start at 1, so the first MESSAGE sent by the client uses counter 3 and the first sent
//! by the server uses counter 2. The server adopts whatever counter the client's HELLO carries
//! and from then on only accepts the exact next value (as does every receiver).
//!
//! # Security
//!
//! ## Provided
//!
//! - **Mutual Authentication**: the server proves possession of `s` (it can open HELLO and seal
//!   WELCOME), the client proves possession of `c` (the vouch).
//! - **Forward Secrecy**: traffic keys are derived from ephemeral keys only.
//! - **Replay Protection**: strictly sequential nonces per direction.
//! - **No Error Oracle**: every cryptographic failure surfaces as the same error.
//!
//! ## Not Provided
//!
//! - **Identity Hiding from the Server**: the server learns `C` before authorization.
//! - **Padding of Traffic**: MESSAGE commands leak payload lengths.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use chacha20poly1305::{
    aead::{generic_array::typenum::Unsigned, AeadCore},
    XChaCha20Poly1305,
};
use thiserror::Error;

pub mod auth;
pub mod cipher;
pub mod client;
pub mod command;
pub mod connection;
pub mod cookie;
pub mod keys;
pub mod mechanism;
pub mod metadata;
pub mod mocks;
pub mod nonce;
pub mod server;
pub mod z85;

pub use cipher::{Frame, RecvCipher, SendCipher};
pub use client::Client;
pub use connection::{dial, listen, Receiver, Sender};
pub use server::Server;
pub use x25519_dalek::PublicKey;

/// Size of the authentication tag appended to every sealed box.
pub const TAG_LENGTH: usize = <XChaCha20Poly1305 as AeadCore>::TagSize::USIZE;

/// Every way a handshake (or the traffic that follows it) can fail.
///
/// All errors are terminal for the connection attempt that produced them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("malformed {0} command")]
    MalformedCommand(command::Kind),
    #[error("unexpected command")]
    UnexpectedCommand,
    #[error("mechanism mismatch")]
    MechanismMismatch,
    #[error("cryptographic failure")]
    CryptographicFailure,
    #[error("authorization denied: {0}")]
    AuthorizationDenied(auth::Status),
    #[error("cancelled")]
    Cancelled,
}

/// The authenticated identity of the remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Long-term public key of the peer.
    pub public_key: PublicKey,

    /// Properties announced by the peer (and, on the server, those added by the authorizer).
    pub metadata: metadata::Metadata,

    /// User id assigned by the authorizer (server only).
    pub user_id: Option<String>,
}

/// The result of a completed handshake.
pub struct Established {
    pub peer: Peer,
    pub sender: SendCipher,
    pub receiver: RecvCipher,
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// What the caller must do after a command was consumed.
#[derive(Debug)]
pub enum Step {
    /// Send this command to the peer and wait for its next command.
    Send(bytes::Bytes),

    /// Ask the authorizer about this request before the handshake can continue.
    Authorize(auth::Request),

    /// The handshake is complete.
    Connected(Established),
}

/// Common contract of the client and server handshake drivers.
pub trait Handshake {
    /// Returns the command that opens the handshake, if this role speaks first.
    fn start(&mut self) -> Result<Option<bytes::Bytes>, Error>;

    /// Consumes one command received from the peer.
    fn advance(&mut self, command: &[u8]) -> Result<Step, Error>;

    /// Aborts the attempt and discards all of its key material.
    fn abort(&mut self) -> Error;
}

/// Installs a subscriber that prints debug events of the running test.
#[cfg(test)]
pub(crate) fn traced() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
