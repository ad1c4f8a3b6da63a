//! Typed events produced from inbound frames.

use std::fmt;
use std::time::Instant;

use meshcore_companion_protocol::{
    ContactInfo, PublicKey, PublicKeyPrefix, ReceivedMessage, Response,
};

/// What an event is about. Waiters select on this plus an optional key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A sent message was acknowledged. Keyed by ack code.
    Ack,
    /// A node advertised or its path changed. Keyed by the first 4 key bytes.
    Advert,
    /// A contact record arrived (table sync or new advert).
    ContactUpdate,
    /// A text message was popped from the radio's queue.
    Message,
    /// The radio has queued messages to fetch.
    MessagesWaiting,
    /// A server answered a status request. Keyed by server prefix.
    StatusResponse,
    /// A server answered a login. Keyed by server prefix.
    Login,
    /// Any other reply. Keyed by response code.
    Reply,
    /// The link dropped.
    Disconnected,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Ack => "ack",
            EventKind::Advert => "advert",
            EventKind::ContactUpdate => "contact update",
            EventKind::Message => "message",
            EventKind::MessagesWaiting => "messages waiting",
            EventKind::StatusResponse => "status response",
            EventKind::Login => "login result",
            EventKind::Reply => "reply",
            EventKind::Disconnected => "disconnect",
        };
        f.write_str(name)
    }
}

/// Decoded content of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Delivery confirmation.
    Ack {
        /// Ack code from the `Sent` reply.
        code: u32,
        /// Round trip in milliseconds.
        trip_time_ms: u32,
    },
    /// Known node advertised (or its path was updated).
    Advert {
        /// Full key of the node.
        public_key: PublicKey,
        /// True when only the route changed.
        path_updated: bool,
    },
    /// Contact record.
    Contact(ContactInfo),
    /// Text message.
    Message(ReceivedMessage),
    /// Radio has messages queued.
    MessagesWaiting,
    /// Server status blob.
    Status {
        /// Responding server.
        server_prefix: PublicKeyPrefix,
        /// Raw status payload.
        data: Vec<u8>,
    },
    /// Login result.
    Login {
        /// Server that answered.
        server_prefix: PublicKeyPrefix,
        /// Whether the password was accepted.
        success: bool,
        /// Whether admin rights were granted.
        is_admin: bool,
    },
    /// Any reply not covered above.
    Reply(Response),
    /// Link lost.
    Disconnected(String),
}

/// One inbound occurrence. Immutable once built.
#[derive(Debug, Clone)]
pub struct Event {
    /// Classification.
    pub kind: EventKind,
    /// Disambiguates events of the same kind.
    pub key: Option<u32>,
    /// Decoded content.
    pub payload: EventPayload,
    /// When the frame was routed.
    pub received_at: Instant,
}

impl Event {
    /// Build an event stamped now.
    pub fn new(kind: EventKind, key: Option<u32>, payload: EventPayload) -> Self {
        Event {
            kind,
            key,
            payload,
            received_at: Instant::now(),
        }
    }

    /// The reply carried by a `Reply` event.
    pub fn reply(&self) -> Option<&Response> {
        match &self.payload {
            EventPayload::Reply(response) => Some(response),
            _ => None,
        }
    }
}

/// Interest in events of one kind, optionally restricted to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    /// Kind to match.
    pub kind: EventKind,
    /// Key to match; `None` matches every key.
    pub key: Option<u32>,
}

impl Pattern {
    /// Match any event of `kind`.
    pub fn any(kind: EventKind) -> Self {
        Pattern { kind, key: None }
    }

    /// Match events of `kind` carrying `key`.
    pub fn keyed(kind: EventKind, key: u32) -> Self {
        Pattern {
            kind,
            key: Some(key),
        }
    }

    /// Match a reply with the given response code.
    pub fn reply(code: u8) -> Self {
        Pattern::keyed(EventKind::Reply, code as u32)
    }

    /// Whether `event` satisfies this pattern.
    pub fn matches(&self, event: &Event) -> bool {
        self.kind == event.kind && self.key.map_or(true, |k| event.key == Some(k))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "{} {:08x}", self.kind, key),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Key derived from the first four bytes of a key or prefix.
pub fn prefix_key(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    let n = bytes.len().min(4);
    word[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(word)
}
