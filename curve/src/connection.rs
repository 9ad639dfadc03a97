//! Run a handshake over a command transport and exchange encrypted frames afterwards.

use crate::{
    auth::Authorizer,
    cipher::{Frame, RecvCipher, SendCipher},
    client::{self, Client},
    server::{self, Server},
    Error, Handshake, Peer, Step,
};
use bytes::Bytes;
use rand::{CryptoRng, Rng};
use std::future::Future;
use tokio::time::timeout;
use tracing::debug;

/// Interface of a transport that sends one command at a time.
pub trait Sink: Send + 'static {
    /// Sends a command. Fails with [Error::Cancelled] if the transport is closed.
    fn send(&mut self, command: Bytes) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Interface of a transport that receives one command at a time.
pub trait Stream: Send + 'static {
    /// Receives a command. Fails with [Error::Cancelled] if the transport is closed.
    fn recv(&mut self) -> impl Future<Output = Result<Bytes, Error>> + Send;
}

/// Exchanges commands until the driver completes or needs authorization.
async fn exchange<H: Handshake, I: Stream, O: Sink>(
    driver: &mut H,
    stream: &mut I,
    sink: &mut O,
) -> Result<Step, Error> {
    if let Some(command) = driver.start()? {
        sink.send(command).await?;
    }
    loop {
        let command = stream.recv().await?;
        match driver.advance(&command)? {
            Step::Send(command) => sink.send(command).await?,
            step => return Ok(step),
        }
    }
}

/// Performs the client side of a handshake.
///
/// Fails with [Error::Cancelled] if the handshake does not complete within
/// [client::Config::handshake_timeout] or if the transport closes.
///
/// A server that does not authorize the client sends no ERROR command (and so no status code):
/// it closes the connection after INITIATE. A denied client therefore cannot tell a denial from
/// a disconnect and also sees [Error::Cancelled].
pub async fn dial<R: Rng + CryptoRng + Send, I: Stream, O: Sink>(
    rng: R,
    config: client::Config,
    mut stream: I,
    mut sink: O,
) -> Result<(Peer, Sender<O>, Receiver<I>), Error> {
    let deadline = config.handshake_timeout;
    let mut client = Client::new(rng, config);
    let result = timeout(deadline, exchange(&mut client, &mut stream, &mut sink)).await;
    let established = match result {
        Ok(Ok(Step::Connected(established))) => established,
        Ok(Ok(_)) => {
            client.abort();
            return Err(Error::UnexpectedCommand);
        }
        Ok(Err(err)) => {
            client.abort();
            return Err(err);
        }
        Err(_) => {
            debug!(?deadline, "handshake timed out");
            return Err(client.abort());
        }
    };
    debug!(peer = ?established.peer.public_key, "connected to server");
    Ok((
        established.peer,
        Sender {
            cipher: established.sender,
            sink,
        },
        Receiver {
            cipher: established.receiver,
            stream,
        },
    ))
}

/// Performs the server side of a handshake with a client at `address`.
///
/// The `authorizer` decides whether the (verified) client may connect. If it does not, the
/// connection is dropped without sending anything.
pub async fn listen<R, A, I, O>(
    rng: R,
    authorizer: &mut A,
    config: server::Config,
    address: String,
    mut stream: I,
    mut sink: O,
) -> Result<(Peer, Sender<O>, Receiver<I>), Error>
where
    R: Rng + CryptoRng + Send,
    A: Authorizer,
    I: Stream,
    O: Sink,
{
    let deadline = config.handshake_timeout;
    let mut server = Server::new(rng, config, address);
    let result = timeout(deadline, async {
        let Step::Authorize(request) = exchange(&mut server, &mut stream, &mut sink).await? else {
            return Err(Error::UnexpectedCommand);
        };
        let response = authorizer.authorize(request).await;
        let (ready, established) = server.authorized(response)?;
        sink.send(ready).await?;
        Ok::<_, Error>(established)
    })
    .await;
    let established = match result {
        Ok(Ok(established)) => established,
        Ok(Err(err)) => {
            server.abort();
            return Err(err);
        }
        Err(_) => {
            debug!(?deadline, "handshake timed out");
            return Err(server.abort());
        }
    };
    debug!(peer = ?established.peer.public_key, "accepted client");
    Ok((
        established.peer,
        Sender {
            cipher: established.sender,
            sink,
        },
        Receiver {
            cipher: established.receiver,
            stream,
        },
    ))
}

/// Sends encrypted frames to the peer.
pub struct Sender<O: Sink> {
    cipher: SendCipher,
    sink: O,
}

impl<O: Sink> Sender<O> {
    /// Encrypts and sends a frame.
    pub async fn send(&mut self, payload: &[u8], more: bool) -> Result<(), Error> {
        let command = self.cipher.seal(payload, more)?;
        self.sink.send(command).await
    }
}

/// Receives encrypted frames from the peer.
pub struct Receiver<I: Stream> {
    cipher: RecvCipher,
    stream: I,
}

impl<I: Stream> Receiver<I> {
    /// Receives and decrypts a frame.
    pub async fn recv(&mut self) -> Result<Frame, Error> {
        let command = self.stream.recv().await?;
        self.cipher.open(&command)
    }
}
