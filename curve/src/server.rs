//! Server side of the handshake.
//!
//! Between WELCOME and INITIATE the server keeps no secret of its own: its ephemeral secret
//! travels inside the cookie and only the client's ephemeral public key from HELLO is retained
//! (to check that the returned cookie was minted for this connection).

use crate::{
    auth::{self, Request, Response, Status},
    cipher::{RecvCipher, SendCipher},
    command::{Hello, Initiate, Kind, Ready, Welcome, VOUCH_LENGTH},
    cookie::Cookie,
    keys::{read_key, CookieJar, KeyPair, SharedSecret, KEY_LENGTH},
    mechanism,
    metadata::Metadata,
    nonce::{self, Counter, LONG_NONCE_LENGTH},
    Error, Established, Handshake, Peer, Step,
};
use bytes::{Bytes, BytesMut};
use rand::{CryptoRng, Rng};
use std::{sync::Arc, time::Duration};
use tracing::debug;
use x25519_dalek::PublicKey;

/// Configuration of a server (shared by all connections of a listener).
#[derive(Clone, Debug)]
pub struct Config {
    /// Long-term key pair of the server.
    pub key_pair: KeyPair,

    /// Cookie keys of the listener.
    pub cookies: Arc<CookieJar>,

    /// Security domain reported to the authorizer.
    pub domain: String,

    /// Transport-level identity reported to the authorizer.
    pub identity: Bytes,

    /// Properties sent to the client in READY.
    pub metadata: Metadata,

    /// Maximum time to complete the handshake (authorization included).
    pub handshake_timeout: Duration,
}

/// Progress of a server handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    HelloExpected,
    HelloReceived,
    WelcomeSent,
    AuthorizationPending,
    Connected,
    Failed,
}

/// A verified client awaiting authorization.
struct Pending {
    request_id: u64,
    public_key: PublicKey,
    metadata: Metadata,
    session: SharedSecret,
}

/// Drives one handshake attempt of a server.
pub struct Server<R> {
    rng: R,
    config: Config,
    address: String,
    state: State,

    /// `C'` as presented in HELLO.
    client_ephemeral: Option<PublicKey>,
    /// Box key of HELLO and WELCOME: `(s, C')`.
    hello: Option<SharedSecret>,
    pending: Option<Pending>,

    counter: Counter,
    client_counter: Counter,
}

/// Logs the stage at which an INITIATE was rejected and hides it from the caller.
fn reject(stage: &'static str) -> Error {
    debug!(stage, "rejected initiate");
    Error::CryptographicFailure
}

impl<R: Rng + CryptoRng> Server<R> {
    /// Creates a driver for a connection from `address`.
    pub fn new(rng: R, config: Config, address: String) -> Self {
        Self {
            rng,
            config,
            address,
            state: State::HelloExpected,
            client_ephemeral: None,
            hello: None,
            pending: None,
            counter: Counter::new(),
            client_counter: Counter::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks the mechanism announced by the client in the transport greeting.
    pub fn select_mechanism(&mut self, field: &[u8]) -> Result<(), Error> {
        self.step(State::HelloExpected, State::HelloExpected, |_| {
            mechanism::verify(field)
        })
    }

    /// Consumes HELLO.
    ///
    /// The HELLO counter may start anywhere. INITIATE and every MESSAGE from the client must then
    /// carry exactly the next values.
    pub fn process_hello(&mut self, command: &[u8]) -> Result<(), Error> {
        self.step(State::HelloExpected, State::HelloReceived, |server| {
            let hello = Hello::decode(command)?;
            let secret =
                SharedSecret::derive(server.config.key_pair.secret(), &hello.client_ephemeral)?;
            secret.open(&nonce::short(nonce::HELLO, hello.nonce), &hello.sealed)?;

            // The client's first counter value sets the baseline of its direction
            let mut client_counter = Counter::starting_at(hello.nonce);
            client_counter.expect(hello.nonce)?;
            server.client_counter = client_counter;
            server.client_ephemeral = Some(hello.client_ephemeral);
            server.hello = Some(secret);
            Ok(())
        })
    }

    /// Produces WELCOME, handing the ephemeral secret to the client inside a cookie.
    pub fn produce_welcome(&mut self) -> Result<Bytes, Error> {
        self.step(State::HelloReceived, State::WelcomeSent, |server| {
            let (Some(client_ephemeral), Some(hello)) = (&server.client_ephemeral, &server.hello)
            else {
                return Err(Error::UnexpectedCommand);
            };
            let ephemeral = KeyPair::generate(&mut server.rng);
            let key = server.config.cookies.current_or_generate(&mut server.rng);
            let cookie = Cookie::seal(&mut server.rng, &key, client_ephemeral, ephemeral.secret())?;

            let mut plaintext = [0u8; KEY_LENGTH + crate::cookie::COOKIE_LENGTH];
            plaintext[..KEY_LENGTH].copy_from_slice(ephemeral.public().as_bytes());
            plaintext[KEY_LENGTH..].copy_from_slice(cookie.as_bytes());
            let suffix = nonce::suffix(&mut server.rng);
            let sealed = hello.seal(&nonce::long(nonce::WELCOME, &suffix), &plaintext)?;
            let sealed = sealed
                .as_slice()
                .try_into()
                .map_err(|_| Error::CryptographicFailure)?;

            // Only C' is kept until INITIATE
            server.hello = None;
            Ok(Welcome {
                nonce: suffix,
                sealed,
            }
            .encode())
        })
    }

    /// Consumes INITIATE and returns the request to authorize the client.
    ///
    /// All cryptographic checks fail with the same [Error::CryptographicFailure].
    pub fn process_initiate(&mut self, command: &[u8]) -> Result<Request, Error> {
        self.step(State::WelcomeSent, State::AuthorizationPending, |server| {
            let initiate = Initiate::decode(command)?;
            let Some(client_ephemeral) = server.client_ephemeral else {
                return Err(Error::UnexpectedCommand);
            };

            // Recover s' from the cookie
            let key = server.config.cookies.current().ok_or_else(|| reject("cookie key"))?;
            let (cookie_client, ephemeral) = Cookie::from(initiate.cookie)
                .open(&key)
                .map_err(|_| reject("cookie"))?;
            if cookie_client != client_ephemeral {
                return Err(reject("cookie client"));
            }

            // Open the outer box
            if initiate.nonce != server.client_counter.peek() {
                return Err(reject("nonce"));
            }
            let session = SharedSecret::derive(&ephemeral, &client_ephemeral)?;
            let plaintext = session
                .open(&nonce::short(nonce::INITIATE, initiate.nonce), initiate.sealed)
                .map_err(|_| reject("initiate box"))?;
            server.client_counter.expect(initiate.nonce)?;

            // Check the vouch
            let client_key = read_key(&plaintext[..KEY_LENGTH])
                .map(PublicKey::from)
                .ok_or_else(|| reject("client key"))?;
            let vouch = &plaintext[KEY_LENGTH..KEY_LENGTH + VOUCH_LENGTH];
            let suffix: [u8; LONG_NONCE_LENGTH] = vouch[..LONG_NONCE_LENGTH]
                .try_into()
                .map_err(|_| reject("vouch"))?;
            let vouched = SharedSecret::derive(&ephemeral, &client_key)
                .and_then(|secret| {
                    secret.open(
                        &nonce::long(nonce::VOUCH, &suffix),
                        &vouch[LONG_NONCE_LENGTH..],
                    )
                })
                .map_err(|_| reject("vouch"))?;
            if vouched[..KEY_LENGTH] != client_ephemeral.as_bytes()[..]
                || vouched[KEY_LENGTH..] != server.config.key_pair.public().as_bytes()[..]
            {
                return Err(reject("vouch keys"));
            }

            let metadata = Metadata::decode(&plaintext[KEY_LENGTH + VOUCH_LENGTH..])
                .ok_or(Error::MalformedCommand(Kind::Initiate))?;
            let request = Request {
                version: auth::VERSION,
                request_id: server.rng.gen(),
                domain: server.config.domain.clone(),
                address: server.address.clone(),
                identity: server.config.identity.clone(),
                mechanism: auth::MECHANISM,
                public_key: client_key,
                metadata: metadata.clone(),
            };
            server.client_ephemeral = None;
            server.pending = Some(Pending {
                request_id: request.request_id,
                public_key: client_key,
                metadata,
                session,
            });
            Ok(request)
        })
    }

    /// Applies the authorizer's response.
    ///
    /// Only [Status::Allow] produces READY and completes the handshake. Any other status (or a
    /// response to another request) fails the attempt without producing a command.
    pub fn authorized(&mut self, response: Response) -> Result<(Bytes, Established), Error> {
        self.step(State::AuthorizationPending, State::Connected, |server| {
            let Some(pending) = server.pending.take() else {
                return Err(Error::UnexpectedCommand);
            };
            if response.request_id != pending.request_id {
                debug!(
                    expected = pending.request_id,
                    received = response.request_id,
                    "authorization response to another request"
                );
                return Err(Error::AuthorizationDenied(Status::InternalError));
            }
            if response.status != Status::Allow {
                debug!(status = %response.status, text = %response.text, "client not authorized");
                return Err(Error::AuthorizationDenied(response.status));
            }

            let metadata = &server.config.metadata;
            let mut plaintext = BytesMut::with_capacity(metadata.encode_size());
            metadata.write(&mut plaintext);
            let counter = server.counter.next()?;
            let sealed = pending
                .session
                .seal(&nonce::short(nonce::READY, counter), &plaintext)?;
            let ready = Ready {
                nonce: counter,
                sealed: &sealed,
            }
            .encode();

            let mut peer_metadata = pending.metadata.clone();
            peer_metadata.extend(response.metadata);
            let peer = Peer {
                public_key: pending.public_key,
                metadata: peer_metadata,
                user_id: response.user_id,
            };
            let sender = SendCipher::new(
                pending.session.clone(),
                nonce::MESSAGE_SERVER,
                server.counter,
            );
            let receiver = RecvCipher::new(
                pending.session.clone(),
                nonce::MESSAGE_CLIENT,
                server.client_counter,
            );
            Ok((
                ready,
                Established {
                    peer,
                    sender,
                    receiver,
                },
            ))
        })
    }

    /// Aborts the attempt.
    pub fn abort(&mut self) -> Error {
        self.fail(Error::Cancelled)
    }

    fn step<T>(
        &mut self,
        from: State,
        to: State,
        operation: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.state != from {
            debug!(state = ?self.state, expected = ?from, "server operation out of order");
            return Err(self.fail(Error::UnexpectedCommand));
        }
        match operation(self) {
            Ok(value) => {
                debug!(address = %self.address, ?from, ?to, "server advanced");
                self.state = to;
                Ok(value)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        debug!(address = %self.address, state = ?self.state, ?err, "server handshake failed");
        self.client_ephemeral = None;
        self.hello = None;
        self.pending = None;
        if self.state != State::Connected {
            self.state = State::Failed;
        }
        err
    }
}

impl<R: Rng + CryptoRng> Handshake for Server<R> {
    fn start(&mut self) -> Result<Option<Bytes>, Error> {
        Ok(None)
    }

    fn advance(&mut self, command: &[u8]) -> Result<Step, Error> {
        match self.state {
            State::HelloExpected => {
                self.process_hello(command)?;
                self.produce_welcome().map(Step::Send)
            }
            State::WelcomeSent => self.process_initiate(command).map(Step::Authorize),
            _ => Err(self.fail(Error::UnexpectedCommand)),
        }
    }

    fn abort(&mut self) -> Error {
        Server::abort(self)
    }
}

impl<R> std::fmt::Debug for Server<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
