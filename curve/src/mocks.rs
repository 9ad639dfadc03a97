//! In-memory command channel for tests, benchmarks and fuzzing.

use crate::{
    connection::{Sink as SinkTrait, Stream as StreamTrait},
    Error,
};
use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};

/// Sending half of a [Channel].
#[derive(Debug, Clone)]
pub struct Sink {
    sender: mpsc::UnboundedSender<Bytes>,
}

/// Receiving half of a [Channel].
#[derive(Debug)]
pub struct Stream {
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

/// A unidirectional, unbounded channel carrying one command per message.
pub struct Channel;

impl Channel {
    /// Returns both halves of a new channel.
    pub fn init() -> (Sink, Stream) {
        let (sender, receiver) = mpsc::unbounded();
        (Sink { sender }, Stream { receiver })
    }
}

impl SinkTrait for Sink {
    async fn send(&mut self, command: Bytes) -> Result<(), Error> {
        self.sender
            .unbounded_send(command)
            .map_err(|_| Error::Cancelled)
    }
}

impl StreamTrait for Stream {
    async fn recv(&mut self) -> Result<Bytes, Error> {
        self.receiver.next().await.ok_or(Error::Cancelled)
    }
}

impl Stream {
    /// Returns the next command if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel() {
        let (mut sink, mut stream) = Channel::init();
        sink.send(Bytes::from_static(b"one")).await.unwrap();
        sink.send(Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(stream.recv().await.unwrap().as_ref(), b"one");
        assert_eq!(stream.try_recv().unwrap().as_ref(), b"two");
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_closed() {
        let (mut sink, stream) = Channel::init();
        drop(stream);
        assert_eq!(sink.send(Bytes::new()).await, Err(Error::Cancelled));

        let (sink, mut stream) = Channel::init();
        drop(sink);
        assert_eq!(stream.recv().await, Err(Error::Cancelled));
    }
}
