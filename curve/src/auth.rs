//! Authorization of clients that completed the cryptographic part of the handshake.
//!
//! After a valid INITIATE, the server driver parks and hands out a [Request]. Whatever decides
//! (an [Authorizer]) replies with a [Response] carrying the same `request_id`. Only a response
//! with [Status::Allow] lets the server send READY.
//!
//! Requests and responses can be carried as ZAP 1.0 frames ([Request::frames] and
//! [Response::from_frames]) to reach an external authentication service.

use crate::{metadata::Metadata, Error};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use std::{fmt, future::Future};
use tracing::warn;
use x25519_dalek::PublicKey;

/// Version of the authorization protocol.
pub const VERSION: &str = "1.0";

/// Mechanism name carried in every request.
pub const MECHANISM: &str = "CURVE";

/// Outcome of an authorization request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The client may connect.
    Allow,
    /// Temporary failure, the client may try again later.
    Retry,
    /// The client is not allowed to connect.
    Deny,
    /// The authorizer failed.
    InternalError,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Allow => 200,
            Status::Retry => 300,
            Status::Deny => 400,
            Status::InternalError => 500,
        }
    }

    /// Classifies a numeric status code by its leading digit.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200..=299 => Some(Status::Allow),
            300..=399 => Some(Status::Retry),
            400..=499 => Some(Status::Deny),
            500..=599 => Some(Status::InternalError),
            _ => None,
        }
    }

    /// Parses a status code written as exactly three ASCII digits.
    pub fn parse(code: &[u8]) -> Option<Self> {
        if code.len() != 3 || !code.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let code = code
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));
        Self::from_code(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A request to authorize a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub version: &'static str,

    /// Correlates the request with its [Response].
    pub request_id: u64,

    /// Security domain of the listener.
    pub domain: String,

    /// Address of the remote endpoint, as reported by the transport.
    pub address: String,

    /// Transport-level identity (routing id) of the connection.
    pub identity: Bytes,

    pub mechanism: &'static str,

    /// Verified long-term public key of the client.
    pub public_key: PublicKey,

    /// Properties announced by the client in INITIATE.
    pub metadata: Metadata,
}

impl Request {
    /// Encodes the request as ZAP 1.0 frames.
    pub fn frames(&self) -> Vec<Bytes> {
        vec![
            Bytes::from_static(self.version.as_bytes()),
            Bytes::from(self.request_id.to_string()),
            Bytes::from(self.domain.clone()),
            Bytes::from(self.address.clone()),
            self.identity.clone(),
            Bytes::from_static(self.mechanism.as_bytes()),
            Bytes::copy_from_slice(self.public_key.as_bytes()),
        ]
    }
}

/// The answer to a [Request].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub request_id: u64,
    pub status: Status,

    /// Human-readable explanation of the status.
    pub text: String,

    /// Identity assigned to the client, if any.
    pub user_id: Option<String>,

    /// Properties to attach to the connection.
    pub metadata: Metadata,
}

impl Response {
    pub fn new(request_id: u64, status: Status, text: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            text: text.into(),
            user_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn allow(request_id: u64) -> Self {
        Self::new(request_id, Status::Allow, "OK")
    }

    pub fn deny(request_id: u64, text: impl Into<String>) -> Self {
        Self::new(request_id, Status::Deny, text)
    }

    /// Sets the identity assigned to the client.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Encodes the response as ZAP 1.0 frames.
    pub fn frames(&self) -> Vec<Bytes> {
        let mut metadata = BytesMut::with_capacity(self.metadata.encode_size());
        self.metadata.write(&mut metadata);
        let mut code = BytesMut::with_capacity(3);
        code.put_slice(self.status.code().to_string().as_bytes());
        vec![
            Bytes::from_static(VERSION.as_bytes()),
            Bytes::from(self.request_id.to_string()),
            code.freeze(),
            Bytes::from(self.text.clone()),
            Bytes::from(self.user_id.clone().unwrap_or_default()),
            metadata.freeze(),
        ]
    }

    /// Decodes ZAP 1.0 response frames.
    ///
    /// Any deviation (frame count, version, request id, status code or metadata) is reported as
    /// a denial with [Status::InternalError].
    pub fn from_frames(frames: &[Bytes]) -> Result<Self, Error> {
        let invalid = Error::AuthorizationDenied(Status::InternalError);
        let [version, request_id, code, text, user_id, metadata] = frames else {
            warn!(frames = frames.len(), "invalid authorization response");
            return Err(invalid);
        };
        if version.as_ref() != VERSION.as_bytes() {
            warn!("invalid authorization response version");
            return Err(invalid);
        }
        let request_id = std::str::from_utf8(request_id)
            .ok()
            .and_then(|id| id.parse().ok())
            .ok_or(invalid)?;
        let status = Status::parse(code).ok_or(invalid)?;
        let text = String::from_utf8(text.to_vec()).map_err(|_| invalid)?;
        let user_id = String::from_utf8(user_id.to_vec()).map_err(|_| invalid)?;
        let metadata = Metadata::decode(metadata.clone()).ok_or(invalid)?;
        Ok(Self {
            request_id,
            status,
            text,
            user_id: (!user_id.is_empty()).then_some(user_id),
            metadata,
        })
    }
}

/// Decides whether a client may connect.
pub trait Authorizer: Send {
    /// Returns the response to `request`.
    fn authorize(&mut self, request: Request) -> impl Future<Output = Response> + Send;
}

impl<F> Authorizer for F
where
    F: FnMut(&Request) -> Response + Send,
{
    fn authorize(&mut self, request: Request) -> impl Future<Output = Response> + Send {
        std::future::ready(self(&request))
    }
}

/// A request waiting for the authorization actor.
#[derive(Debug)]
pub struct Message {
    pub request: Request,
    pub response: oneshot::Sender<Response>,
}

/// Forwards requests to an authorization actor over a channel.
#[derive(Clone, Debug)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }
}

impl Authorizer for Mailbox {
    async fn authorize(&mut self, request: Request) -> Response {
        let request_id = request.request_id;
        let (response, receiver) = oneshot::channel();
        if self.sender.send(Message { request, response }).await.is_err() {
            warn!(request_id, "authorizer closed");
            return Response::new(request_id, Status::InternalError, "authorizer closed");
        }
        receiver.await.unwrap_or_else(|_| {
            warn!(request_id, "authorizer dropped request");
            Response::new(request_id, Status::InternalError, "authorizer dropped request")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use test_case::test_case;

    fn request() -> Request {
        Request {
            version: VERSION,
            request_id: 7,
            domain: "global".into(),
            address: "127.0.0.1".into(),
            identity: Bytes::from_static(b"IDENT"),
            mechanism: MECHANISM,
            public_key: PublicKey::from([9u8; 32]),
            metadata: Metadata::new(),
        }
    }

    #[test_case(b"200", Some(Status::Allow))]
    #[test_case(b"250", Some(Status::Allow))]
    #[test_case(b"300", Some(Status::Retry))]
    #[test_case(b"400", Some(Status::Deny))]
    #[test_case(b"500", Some(Status::InternalError))]
    #[test_case(b"100", None)]
    #[test_case(b"600", None)]
    #[test_case(b"20", None)]
    #[test_case(b"2000", None)]
    #[test_case(b"2a0", None)]
    fn test_status_parse(code: &[u8], expected: Option<Status>) {
        assert_eq!(Status::parse(code), expected);
    }

    #[test]
    fn test_request_frames() {
        let frames = request().frames();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0].as_ref(), b"1.0");
        assert_eq!(frames[1].as_ref(), b"7");
        assert_eq!(frames[4].as_ref(), b"IDENT");
        assert_eq!(frames[5].as_ref(), b"CURVE");
        assert_eq!(frames[6].as_ref(), &[9u8; 32]);
    }

    #[test]
    fn test_response_frames() {
        let response = Response {
            metadata: Metadata::new().with("Hello", "World").unwrap(),
            ..Response::allow(7).with_user_id("alice")
        };
        let frames = response.frames();
        assert_eq!(frames[2].as_ref(), b"200");
        assert_eq!(Response::from_frames(&frames).unwrap(), response);

        let denied = Response::deny(8, "unknown key");
        let decoded = Response::from_frames(&denied.frames()).unwrap();
        assert_eq!(decoded.status, Status::Deny);
        assert_eq!(decoded.user_id, None);
    }

    #[test_case(0, "2.0"; "bad version")]
    #[test_case(1, "x"; "bad request id")]
    #[test_case(2, "20"; "bad status code")]
    #[test_case(5, "\x00"; "bad metadata")]
    fn test_response_invalid(index: usize, value: &'static str) {
        let mut frames = Response::allow(1).frames();
        frames[index] = Bytes::from_static(value.as_bytes());
        assert_eq!(
            Response::from_frames(&frames),
            Err(Error::AuthorizationDenied(Status::InternalError))
        );
    }

    #[test]
    fn test_response_wrong_frame_count() {
        let mut frames = Response::allow(1).frames();
        frames.pop();
        assert_eq!(
            Response::from_frames(&frames),
            Err(Error::AuthorizationDenied(Status::InternalError))
        );
    }

    #[tokio::test]
    async fn test_closure_authorizer() {
        let mut authorizer = |request: &Request| {
            if request.domain == "global" {
                Response::allow(request.request_id)
            } else {
                Response::deny(request.request_id, "wrong domain")
            }
        };
        assert_eq!(authorizer.authorize(request()).await.status, Status::Allow);
        let other = Request {
            domain: "other".into(),
            ..request()
        };
        assert_eq!(authorizer.authorize(other).await.status, Status::Deny);
    }

    #[tokio::test]
    async fn test_mailbox() {
        let (sender, mut receiver) = mpsc::channel(1);
        let mut mailbox = Mailbox::new(sender);
        let actor = tokio::spawn(async move {
            let Message { request, response } = receiver.next().await.unwrap();
            let _ = response.send(Response::allow(request.request_id).with_user_id("bob"));
        });
        let response = mailbox.authorize(request()).await;
        assert_eq!(response.status, Status::Allow);
        assert_eq!(response.user_id.as_deref(), Some("bob"));
        actor.await.unwrap();

        // The actor is gone
        let response = mailbox.authorize(request()).await;
        assert_eq!(response.status, Status::InternalError);
        assert_eq!(response.request_id, 7);
    }
}
