//! RFC 7395 transport: one stanza per text frame, no pipelining.

use super::{
    find_descendant, ConnectCheck, Outbound, Outbox, ProtocolKind, RequestKind, Session,
    Transmission, Transport, TransportEvent,
};
use crate::minidom::Element;
use crate::status::condition;
use crate::{ns, ConnectParams, ConnectionOptions, Status};

const CONNECTION_LOST: &str =
    "The WebSocket connection could not be established or was disconnected.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Closed,
    Opening,
    Open,
}

pub(crate) struct WebSocket {
    service: String,
    state: SocketState,
    /// Until the first stanza, messages belong to stream establishment.
    initial: bool,
}

/// Turns a bare host and path into a WebSocket URL.
pub(crate) fn normalize_service(service: &str, protocol: Option<&str>) -> String {
    if service.starts_with("ws:") || service.starts_with("wss:") {
        return service.to_owned();
    }
    let scheme = if protocol == Some("ws") { "ws" } else { "wss" };
    format!("{}://{}", scheme, service.trim_start_matches('/'))
}

fn open_frame(domain: &str) -> Element {
    Element::builder("open", ns::FRAMING)
        .attr("to", domain)
        .attr("version", "1.0")
        .build()
}

fn close_frame() -> Element {
    Element::builder("close", ns::FRAMING).build()
}

fn wrap(stanza: &str) -> String {
    format!("<wrapper xmlns='{}'>{}</wrapper>", ns::CLIENT, stanza)
}

/// Drops any leading `<?...?>` declarations.
fn strip_declarations(mut data: &str) -> &str {
    loop {
        let trimmed = data.trim_start();
        if !trimmed.starts_with("<?") {
            return data;
        }
        match trimmed.find("?>") {
            Some(end) => data = trimmed[end + 2..].trim_start(),
            None => return data,
        }
    }
}

fn check_stream_start(open: &Element) -> Result<(), String> {
    let mut error = None;
    let namespace = open.ns();
    if namespace.is_empty() {
        error = Some(String::from("Missing xmlns in <open />"));
    } else if namespace != ns::FRAMING {
        error = Some(format!("Wrong xmlns in <open />: {}", namespace));
    }
    match open.attr("version") {
        None => error = Some(String::from("Missing version in <open />")),
        Some("1.0") => (),
        Some(version) => error = Some(format!("Wrong version in <open />: {}", version)),
    }
    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// The defined condition of the first `<stream:error/>` in `elem`, if any.
///
/// An empty condition means the error carried none.
pub(crate) fn stream_error(elem: &Element) -> Option<(String, String)> {
    let is_error = |e: &Element| e.is("error", ns::STREAM);
    let error = if is_error(elem) {
        elem
    } else {
        find_descendant(elem, &is_error)?
    };
    let mut condition = String::new();
    let mut text = String::new();
    for child in error.children() {
        if child.ns() != ns::STREAMS {
            break;
        }
        if child.name() == "text" {
            text = child.text();
        } else {
            condition = child.name().to_owned();
        }
    }
    Some((condition, text))
}

impl WebSocket {
    pub fn new(service: &str, options: &ConnectionOptions) -> WebSocket {
        WebSocket {
            service: normalize_service(service, options.protocol.as_deref()),
            state: SocketState::Closed,
            initial: true,
        }
    }

    fn open_socket(&mut self, out: &mut Outbox) {
        self.close_socket(out);
        self.state = SocketState::Opening;
        self.initial = true;
        out.transmit(Transmission::Open {
            url: self.service.clone(),
        });
    }

    fn close_socket(&mut self, out: &mut Outbox) {
        if self.state != SocketState::Closed {
            out.transmit(Transmission::Close);
        }
        self.state = SocketState::Closed;
    }

    fn send_element(&self, elem: Element, out: &mut Outbox) {
        let raw = String::from(&elem);
        out.transmit(Transmission::Frame(raw.clone()));
        out.event(TransportEvent::Sent {
            raw,
            stanzas: vec![elem],
        });
    }

    /// Reports a stream error, returning whether there was one.
    fn check_stream_error(&self, elem: &Element, status: Status, out: &mut Outbox) -> bool {
        let Some((condition, text)) = stream_error(elem) else {
            return false;
        };
        let mut message = String::from("WebSocket stream error: ");
        message.push_str(if condition.is_empty() {
            "unknown"
        } else {
            &condition
        });
        if !text.is_empty() {
            message.push_str(" - ");
            message.push_str(&text);
        }
        log::error!("{}", message);
        out.status(status, (!condition.is_empty()).then_some(condition));
        out.event(TransportEvent::DoDisconnect(None));
        true
    }

    fn handle_stream_start(&self, data: &str, out: &mut Outbox) -> Option<Element> {
        let checked = data
            .parse::<Element>()
            .map_err(|e| format!("Invalid <open />: {}", e))
            .and_then(|open| check_stream_start(&open).map(|()| open));
        match checked {
            Ok(open) => Some(open),
            Err(error) => {
                out.status(Status::ConnFail, Some(error));
                out.event(TransportEvent::DoDisconnect(None));
                None
            }
        }
    }

    fn on_initial_message(&mut self, data: &str, out: &mut Outbox) {
        if data.starts_with("<open ") || data.starts_with("<?xml") {
            let stripped = strip_declarations(data);
            if stripped.is_empty() {
                return;
            }
            out.event(TransportEvent::Input {
                raw: data.to_owned(),
                elem: stripped.parse().ok(),
            });
            if let Some(open) = self.handle_stream_start(stripped, out) {
                self.check_stream_error(&open, Status::ConnFail, out);
            }
        } else if data.starts_with("<close") {
            let close = data.parse::<Element>().ok();
            let see_other = close
                .as_ref()
                .and_then(|close| close.attr("see-other-uri"))
                .map(str::to_owned);
            out.event(TransportEvent::Input {
                raw: data.to_owned(),
                elem: close,
            });
            match see_other {
                Some(uri) => {
                    let allowed = (self.service.starts_with("wss:") && uri.starts_with("wss:"))
                        || self.service.starts_with("ws:");
                    if allowed {
                        out.event(TransportEvent::Redirect(uri));
                    } else {
                        log::warn!("Ignoring insecure redirect to {}", uri);
                    }
                }
                None => {
                    out.status(Status::ConnFail, Some("Received closing stream"));
                    out.event(TransportEvent::DoDisconnect(None));
                }
            }
        } else {
            self.initial = false;
            out.event(TransportEvent::Received {
                kind: RequestKind::Connect,
                raw: data.to_owned(),
                body: Some(wrap(data).parse()),
            });
        }
    }

    fn on_message(&mut self, session: &Session, data: &str, out: &mut Outbox) {
        if data.starts_with("<close") {
            out.event(TransportEvent::Input {
                raw: data.to_owned(),
                elem: data.parse().ok(),
            });
            out.event(TransportEvent::DoDisconnect(None));
            return;
        }

        let elem = if data.starts_with("<open ") {
            match self.handle_stream_start(data, out) {
                Some(open) => open,
                None => return,
            }
        } else {
            match wrap(data).parse::<Element>() {
                Ok(elem) => elem,
                Err(e) => {
                    out.event(TransportEvent::Received {
                        kind: RequestKind::Data,
                        raw: data.to_owned(),
                        body: Some(Err(e)),
                    });
                    return;
                }
            }
        };

        if self.check_stream_error(&elem, Status::Error, out) {
            return;
        }

        let unavailable = elem
            .children()
            .next()
            .is_some_and(|first| first.name() == "presence" && first.attr("type") == Some("unavailable"));
        if session.disconnecting && unavailable {
            out.event(TransportEvent::Input {
                raw: data.to_owned(),
                elem: Some(elem),
            });
            return;
        }

        out.event(TransportEvent::Received {
            kind: RequestKind::Data,
            raw: data.to_owned(),
            body: Some(Ok(elem)),
        });
    }
}

impl Transport for WebSocket {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Websocket
    }

    fn strip(&self) -> Option<&'static str> {
        Some("wrapper")
    }

    fn connect(&mut self, _session: &Session, _params: &ConnectParams, out: &mut Outbox) {
        self.open_socket(out);
    }

    fn connect_cb(&mut self, _session: &Session, body: &Element, out: &mut Outbox) -> ConnectCheck {
        if self.check_stream_error(body, Status::ConnFail, out) {
            ConnectCheck::Failed
        } else {
            ConnectCheck::Continue
        }
    }

    fn no_auth_received(&mut self, _session: &Session, out: &mut Outbox) {
        log::error!("Server did not offer a supported authentication mechanism");
        out.status(Status::ConnFail, Some(condition::NO_AUTH_MECH));
        out.event(TransportEvent::DoDisconnect(None));
    }

    fn send(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox) {
        self.on_idle(session, data, out);
    }

    fn send_restart(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox) {
        self.on_idle(session, data, out);
    }

    fn on_idle(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox) {
        if data.is_empty() || session.paused || self.state != SocketState::Open {
            return;
        }
        for item in data.drain(..) {
            match item {
                Outbound::Restart => self.send_element(open_frame(&session.domain), out),
                Outbound::Stanza(stanza) => self.send_element(stanza, out),
                Outbound::Poll => (),
            }
        }
    }

    fn disconnect(&mut self, _session: &Session, presence: Option<Element>, out: &mut Outbox) {
        if self.state == SocketState::Closed {
            return;
        }
        if let Some(presence) = presence {
            self.send_element(presence, out);
        }
        self.send_element(close_frame(), out);
    }

    fn do_disconnect(&mut self, out: &mut Outbox) {
        log::debug!("WebSocket do_disconnect was called");
        self.close_socket(out);
    }

    fn reset(&mut self, _out: &mut Outbox) {
        self.initial = true;
    }

    fn empty_queue(&self) -> bool {
        true
    }

    fn redirect(&mut self, _session: &Session, url: String, out: &mut Outbox) {
        self.service = url;
        self.open_socket(out);
    }

    fn handle_socket_open(&mut self, session: &Session, out: &mut Outbox) {
        if self.state != SocketState::Opening {
            log::debug!("Ignoring open of a socket we no longer want");
            return;
        }
        log::debug!("WebSocket open");
        self.state = SocketState::Open;
        self.send_element(open_frame(&session.domain), out);
    }

    fn handle_socket_message(&mut self, session: &Session, data: &str, out: &mut Outbox) {
        if self.state == SocketState::Closed {
            log::debug!("Ignoring message on a closed socket");
        } else if self.initial {
            self.on_initial_message(data, out);
        } else {
            self.on_message(session, data, out);
        }
    }

    fn handle_socket_close(&mut self, session: &Session, code: u16, out: &mut Outbox) {
        if self.state == SocketState::Closed {
            log::debug!("WebSocket closed");
            return;
        }
        self.state = SocketState::Closed;
        if code != 1000 {
            out.event(TransportEvent::ProtocolError(ProtocolKind::Websocket, code));
        }
        if session.connected && !session.disconnecting {
            log::error!("WebSocket closed unexpectedly");
            out.event(TransportEvent::DoDisconnect(None));
        } else if code == 1006 && !session.connected {
            log::error!("WebSocket closed unexpectedly");
            out.status(Status::ConnFail, Some(CONNECTION_LOST));
            out.event(TransportEvent::DoDisconnect(None));
        } else {
            log::debug!("WebSocket closed");
        }
    }

    fn handle_socket_error(&mut self, _session: &Session, error: &str, out: &mut Outbox) {
        log::error!("WebSocket error {}", error);
        out.status(Status::ConnFail, Some(CONNECTION_LOST));
        if self.state == SocketState::Open {
            self.send_element(close_frame(), out);
        }
        self.close_socket(out);
        out.event(TransportEvent::DoDisconnect(None));
    }
}
