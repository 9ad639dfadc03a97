//! Client side of the handshake.

use crate::{
    cipher::{RecvCipher, SendCipher},
    command::{self, Hello, Initiate, Kind, Ready, Welcome, HELLO_PLAINTEXT_LENGTH},
    cookie::{Cookie, COOKIE_LENGTH},
    keys::{read_key, KeyPair, SharedSecret, KEY_LENGTH},
    mechanism,
    metadata::Metadata,
    nonce::{self, Counter},
    Error, Established, Handshake, Peer, Step,
};
use bytes::{Bytes, BytesMut};
use rand::{CryptoRng, Rng};
use std::time::Duration;
use tracing::debug;
use x25519_dalek::PublicKey;

/// Configuration of a client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Long-term key pair of the client.
    pub key_pair: KeyPair,

    /// Long-term public key of the server, known in advance.
    pub server_key: PublicKey,

    /// Properties sent to the server in INITIATE.
    pub metadata: Metadata,

    /// Maximum time to complete the handshake.
    pub handshake_timeout: Duration,
}

/// Progress of a client handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Initial,
    HelloSent,
    WelcomeReceived,
    InitiateSent,
    Connected,
    Failed,
}

/// Drives one handshake attempt of a client.
///
/// Every error is terminal: the driver moves to [State::Failed] and discards all key material
/// of the attempt.
pub struct Client<R> {
    rng: R,
    config: Config,
    state: State,

    /// `c'` and `C'`.
    ephemeral: Option<KeyPair>,
    /// Box key of HELLO and WELCOME: `(c', S)`.
    hello: Option<SharedSecret>,
    /// Server ephemeral key `S'` from WELCOME.
    server_ephemeral: Option<PublicKey>,
    /// Box key of INITIATE, READY and MESSAGE: `(c', S')`.
    session: Option<SharedSecret>,
    cookie: Option<Cookie>,

    counter: Counter,
    server_counter: Counter,
}

impl<R: Rng + CryptoRng> Client<R> {
    pub fn new(rng: R, config: Config) -> Self {
        Self {
            rng,
            config,
            state: State::Initial,
            ephemeral: None,
            hello: None,
            server_ephemeral: None,
            session: None,
            cookie: None,
            counter: Counter::new(),
            server_counter: Counter::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks the mechanism announced by the server in the transport greeting.
    pub fn select_mechanism(&mut self, field: &[u8]) -> Result<(), Error> {
        self.step(State::Initial, State::Initial, |_| mechanism::verify(field))
    }

    /// Produces HELLO.
    pub fn produce_hello(&mut self) -> Result<Bytes, Error> {
        self.step(State::Initial, State::HelloSent, |client| {
            let ephemeral = KeyPair::generate(&mut client.rng);
            let secret = SharedSecret::derive(ephemeral.secret(), &client.config.server_key)?;
            let counter = client.counter.next()?;
            let sealed = secret.seal(
                &nonce::short(nonce::HELLO, counter),
                &[0u8; HELLO_PLAINTEXT_LENGTH],
            )?;
            let sealed = sealed
                .as_slice()
                .try_into()
                .map_err(|_| Error::CryptographicFailure)?;
            let hello = Hello {
                client_ephemeral: *ephemeral.public(),
                nonce: counter,
                sealed,
            };
            client.ephemeral = Some(ephemeral);
            client.hello = Some(secret);
            Ok(hello.encode())
        })
    }

    /// Consumes WELCOME, learning the server's ephemeral key and the cookie.
    pub fn process_welcome(&mut self, command: &[u8]) -> Result<(), Error> {
        self.step(State::HelloSent, State::WelcomeReceived, |client| {
            let welcome = Welcome::decode(command)?;
            let (Some(ephemeral), Some(hello)) = (&client.ephemeral, &client.hello) else {
                return Err(Error::UnexpectedCommand);
            };
            let plaintext = hello.open(
                &nonce::long(nonce::WELCOME, &welcome.nonce),
                &welcome.sealed,
            )?;
            let server_ephemeral = read_key(&plaintext[..KEY_LENGTH])
                .map(PublicKey::from)
                .ok_or(Error::CryptographicFailure)?;
            let cookie = Cookie::try_from(&plaintext[KEY_LENGTH..KEY_LENGTH + COOKIE_LENGTH])?;
            let session = SharedSecret::derive(ephemeral.secret(), &server_ephemeral)?;

            // HELLO's box key is never used again
            client.hello = None;
            client.server_ephemeral = Some(server_ephemeral);
            client.session = Some(session);
            client.cookie = Some(cookie);
            Ok(())
        })
    }

    /// Produces INITIATE: the cookie, the long-term key, the vouch and the metadata.
    pub fn produce_initiate(&mut self) -> Result<Bytes, Error> {
        self.step(State::WelcomeReceived, State::InitiateSent, |client| {
            let (Some(ephemeral), Some(server_ephemeral), Some(session), Some(cookie)) = (
                &client.ephemeral,
                &client.server_ephemeral,
                &client.session,
                &client.cookie,
            ) else {
                return Err(Error::UnexpectedCommand);
            };

            // Vouch for C' with the long-term key
            let suffix = nonce::suffix(&mut client.rng);
            let mut vouched = [0u8; 2 * KEY_LENGTH];
            vouched[..KEY_LENGTH].copy_from_slice(ephemeral.public().as_bytes());
            vouched[KEY_LENGTH..].copy_from_slice(client.config.server_key.as_bytes());
            let vouch = SharedSecret::derive(client.config.key_pair.secret(), server_ephemeral)?
                .seal(&nonce::long(nonce::VOUCH, &suffix), &vouched)?;

            let metadata = &client.config.metadata;
            let mut plaintext = BytesMut::with_capacity(
                KEY_LENGTH + command::VOUCH_LENGTH + metadata.encode_size(),
            );
            plaintext.extend_from_slice(client.config.key_pair.public().as_bytes());
            plaintext.extend_from_slice(&suffix);
            plaintext.extend_from_slice(&vouch);
            metadata.write(&mut plaintext);

            let counter = client.counter.next()?;
            let sealed = session.seal(&nonce::short(nonce::INITIATE, counter), &plaintext)?;
            Ok(Initiate {
                cookie: *cookie.as_bytes(),
                nonce: counter,
                sealed: &sealed,
            }
            .encode())
        })
    }

    /// Consumes READY and completes the handshake.
    pub fn process_ready(&mut self, command: &[u8]) -> Result<Established, Error> {
        self.step(State::InitiateSent, State::Connected, |client| {
            let ready = Ready::decode(command)?;
            let Some(session) = client.session.take() else {
                return Err(Error::UnexpectedCommand);
            };
            if ready.nonce != client.server_counter.peek() {
                return Err(Error::CryptographicFailure);
            }
            let plaintext = session.open(&nonce::short(nonce::READY, ready.nonce), ready.sealed)?;
            client.server_counter.expect(ready.nonce)?;
            let metadata = Metadata::decode(plaintext.as_slice())
                .ok_or(Error::MalformedCommand(Kind::Ready))?;

            let peer = Peer {
                public_key: client.config.server_key,
                metadata,
                user_id: None,
            };
            let sender = SendCipher::new(session.clone(), nonce::MESSAGE_CLIENT, client.counter);
            let receiver = RecvCipher::new(session, nonce::MESSAGE_SERVER, client.server_counter);
            client.discard();
            Ok(Established {
                peer,
                sender,
                receiver,
            })
        })
    }

    /// Aborts the attempt.
    pub fn abort(&mut self) -> Error {
        self.fail(Error::Cancelled)
    }

    /// Runs `operation` if the driver is in `from`, moving to `to` on success and to
    /// [State::Failed] on error.
    fn step<T>(
        &mut self,
        from: State,
        to: State,
        operation: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.state != from {
            debug!(state = ?self.state, expected = ?from, "client operation out of order");
            return Err(self.fail(Error::UnexpectedCommand));
        }
        match operation(self) {
            Ok(value) => {
                debug!(?from, ?to, "client advanced");
                self.state = to;
                Ok(value)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!(state = ?self.state, ?err, "client handshake failed");
        self.discard();
        if self.state != State::Connected {
            self.state = State::Failed;
        }
        err
    }

    /// Drops all key material of the attempt.
    fn discard(&mut self) {
        self.ephemeral = None;
        self.hello = None;
        self.server_ephemeral = None;
        self.session = None;
        self.cookie = None;
    }
}

#[cfg(test)]
impl<R> Client<R> {
    /// Makes the next client command use counter `next`.
    pub(crate) fn set_counter(&mut self, next: u64) {
        self.counter = Counter::starting_at(next);
    }
}

impl<R: Rng + CryptoRng> Handshake for Client<R> {
    fn start(&mut self) -> Result<Option<Bytes>, Error> {
        self.produce_hello().map(Some)
    }

    fn advance(&mut self, command: &[u8]) -> Result<Step, Error> {
        match self.state {
            State::HelloSent => {
                self.process_welcome(command)?;
                self.produce_initiate().map(Step::Send)
            }
            State::InitiateSent => self.process_ready(command).map(Step::Connected),
            _ => Err(self.fail(Error::UnexpectedCommand)),
        }
    }

    fn abort(&mut self) -> Error {
        Client::abort(self)
    }
}

impl<R> std::fmt::Debug for Client<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
