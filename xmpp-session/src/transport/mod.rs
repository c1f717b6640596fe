//! The wire mechanisms a [`Connection`](crate::Connection) can run over.
//!
//! Transports never perform I/O: they queue [`Transmission`]s for the
//! driver and report what happened to the connection through events.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::minidom::{self, Element};
use crate::session_store::SessionRecord;
use crate::{ConnectParams, Error, Status};

pub(crate) mod bosh;
mod request;
pub(crate) mod websocket;

/// Some I/O the driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    /// POST `body` to the service after `delay`, and report the response
    /// with the same `id`.
    Post {
        /// Request identifier.
        id: u64,
        /// Serialized `<body/>`.
        body: String,
        /// How long to wait before sending.
        delay: Duration,
    },
    /// Cancel the POST with this id, its response must not be reported.
    Abort {
        /// Request identifier.
        id: u64,
    },
    /// Open a WebSocket with the `xmpp` subprotocol.
    Open {
        /// The WebSocket URL.
        url: String,
    },
    /// Send a text frame on the WebSocket.
    Frame(String),
    /// Close the WebSocket.
    Close,
}

/// Which failure handlers a protocol error is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    /// HTTP status codes of BOSH requests.
    Http,
    /// Close codes of the WebSocket.
    Websocket,
}

/// Whether a response belongs to the connection phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Connect,
    Data,
}

/// What a transport reports back to its connection.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// A response arrived. `body` is `None` for an empty response.
    Received {
        kind: RequestKind,
        raw: String,
        body: Option<Result<Element, minidom::Error>>,
    },
    Status(Status, Option<String>),
    DoDisconnect(Option<String>),
    DisconnectTimeout,
    ProtocolError(ProtocolKind, u16),
    NextValidRid(u64),
    Sent {
        raw: String,
        stanzas: Vec<Element>,
    },
    /// Input that is only reported to the observer.
    Input {
        raw: String,
        elem: Option<Element>,
    },
    Redirect(String),
}

/// Where transports queue their work.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub transmissions: Vec<Transmission>,
    pub events: VecDeque<TransportEvent>,
}

impl Outbox {
    pub fn transmit(&mut self, transmission: Transmission) {
        self.transmissions.push(transmission);
    }

    pub fn event(&mut self, event: TransportEvent) {
        self.events.push_back(event);
    }

    pub fn status<S: Into<String>>(&mut self, status: Status, condition: Option<S>) {
        self.event(TransportEvent::Status(status, condition.map(Into::into)));
    }
}

/// An item queued for sending.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    Stanza(Element),
    Restart,
    Poll,
}

/// The parts of the connection state a transport reads.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub jid: String,
    pub domain: String,
    pub authenticated: bool,
    pub connected: bool,
    pub disconnecting: bool,
    pub paused: bool,
    pub now: Instant,
}

/// Outcome of the transport's check of the first response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectCheck {
    Continue,
    Failed,
}

/// A session established out of band, see `Connection::attach`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attachment {
    pub sid: String,
    pub rid: u64,
    pub wait: Option<u32>,
    pub hold: Option<u32>,
    pub window: Option<u32>,
}

pub(crate) trait Transport: Send {
    fn kind(&self) -> ProtocolKind;

    /// Name of the wrapper element hidden from the xml observer hooks.
    fn strip(&self) -> Option<&'static str> {
        None
    }

    fn connect(&mut self, session: &Session, params: &ConnectParams, out: &mut Outbox);

    fn connect_cb(&mut self, session: &Session, body: &Element, out: &mut Outbox)
        -> ConnectCheck;

    fn attach(&mut self, _attachment: Attachment) -> Result<(), Error> {
        Err(Error::Unsupported("attach"))
    }

    fn cached_session(&self, _jid: Option<&str>) -> Result<SessionRecord, Error> {
        Err(Error::Unsupported("restore"))
    }

    fn no_auth_received(&mut self, session: &Session, out: &mut Outbox);

    fn send(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox);

    fn send_restart(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox);

    fn on_idle(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox);

    fn disconnect(&mut self, session: &Session, presence: Option<Element>, out: &mut Outbox);

    fn do_disconnect(&mut self, out: &mut Outbox);

    fn on_disconnect_timeout(&mut self, _out: &mut Outbox) {}

    fn abort_all_requests(&mut self, _out: &mut Outbox) {}

    fn reset(&mut self, out: &mut Outbox);

    fn empty_queue(&self) -> bool;

    fn redirect(&mut self, _session: &Session, _url: String, _out: &mut Outbox) {}

    fn handle_http_response(
        &mut self,
        _session: &Session,
        id: u64,
        _status: u16,
        _body: Option<String>,
        _out: &mut Outbox,
    ) {
        log::debug!("Ignoring HTTP response {} on a non-HTTP transport", id);
    }

    fn handle_socket_open(&mut self, _session: &Session, _out: &mut Outbox) {}

    fn handle_socket_message(&mut self, _session: &Session, _data: &str, _out: &mut Outbox) {}

    fn handle_socket_close(&mut self, _session: &Session, _code: u16, _out: &mut Outbox) {}

    fn handle_socket_error(&mut self, _session: &Session, _error: &str, _out: &mut Outbox) {}
}

/// Parses `raw` as XML, an empty or blank string being no response at all.
pub(crate) fn parse_response(raw: &str) -> Option<Result<Element, minidom::Error>> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.parse())
    }
}

/// Depth-first search for a descendant of `elem`, `elem` excluded.
pub(crate) fn find_descendant<'a>(
    elem: &'a Element,
    pred: &dyn Fn(&Element) -> bool,
) -> Option<&'a Element> {
    for child in elem.children() {
        if pred(child) {
            return Some(child);
        }
        if let Some(found) = find_descendant(child, pred) {
            return Some(found);
        }
    }
    None
}

/// Escapes text for use in a quoted XML attribute.
pub(crate) fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
