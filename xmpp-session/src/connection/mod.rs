//! The [`Connection`]: lifecycle state machine and public API.
//!
//! A connection never touches the network. Every call that needs I/O queues
//! [`Transmission`]s, which the application (or the [`Driver`](crate::Driver))
//! picks up with [`Connection::take_transmissions`] and answers through the
//! `handle_*` methods.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use sasl::client::{Catalog, Descriptor, Mechanism};
use sasl::common::{ScramKeys, Secret};
use tokio::time::Instant;
use uuid::Uuid;

use crate::handler::{
    self, HandlerHost, HandlerRef, HandlerResult, Registry, StanzaFilter, TimedRef,
};
use crate::jid::Jid;
use crate::minidom::{self, Element};
use crate::ns::{self, Namespaces};
use crate::observer::Observer;
use crate::plugin::Plugin;
use crate::status::condition;
use crate::transport::bosh::{self, Bosh};
use crate::transport::websocket::WebSocket;
use crate::transport::{
    find_descendant, Attachment, ConnectCheck, Outbound, Outbox, ProtocolKind, RequestKind,
    Session, Transmission, Transport, TransportEvent,
};
use crate::{Error, Status};

mod auth;
mod bind;
mod iq;
mod options;
#[cfg(test)]
mod tests;

pub use self::options::{AttachParams, BoshTimeouts, ConnectParams, ConnectionOptions};

/// Receives every status change of a connection, with its condition and the
/// stanza that caused it, if any.
pub type ConnectCallback =
    Box<dyn FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send>;

type ProtocolErrorHandler = Box<dyn FnMut(&mut Connection, u16) + Send>;

type StatusChange = (Status, Option<String>, Option<Element>);

fn select_transport(service: &str, options: &ConnectionOptions) -> Box<dyn Transport> {
    let websocket = service.starts_with("ws:")
        || service.starts_with("wss:")
        || options
            .protocol
            .as_deref()
            .is_some_and(|protocol| protocol.starts_with("ws"));
    if websocket {
        Box::new(WebSocket::new(service, options))
    } else {
        Box::new(Bosh::new(options))
    }
}

fn is_iq_request(elem: &Element) -> bool {
    elem.name() == "iq" && matches!(elem.attr("type"), Some("get") | Some("set"))
}

/// Texts of every descendant named `name`.
fn descendant_texts(elem: &Element, name: &str, texts: &mut Vec<String>) {
    for child in elem.children() {
        if child.name() == name {
            texts.push(child.text());
        }
        descendant_texts(child, name, texts);
    }
}

/// A client session with one XMPP service.
///
/// The connection is reusable: after [`Status::Disconnected`] or a
/// [`reset`](Connection::reset), [`connect`](Connection::connect) starts over.
pub struct Connection {
    service: String,
    options: ConnectionOptions,
    transport: Box<dyn Transport>,

    jid: String,
    domain: String,
    authzid: Option<String>,
    authcid: Option<String>,
    secret: Secret,
    scram_keys: Option<ScramKeys>,

    catalog: Catalog,
    mechanism: Option<Box<dyn Mechanism + Send>>,
    sasl_handlers: Vec<HandlerRef>,
    features: Option<Element>,
    do_bind: bool,
    do_session: bool,

    registry: Registry<Connection>,
    protocol_error_handlers: HashMap<(ProtocolKind, u16), ProtocolErrorHandler>,
    disconnect_timeout: Option<TimedRef>,
    disconnection_timeout: Duration,

    authenticated: bool,
    connected: bool,
    disconnecting: bool,
    paused: bool,
    restored: bool,
    status: Status,

    data: Vec<Outbound>,
    outbox: Outbox,
    draining: bool,

    observer: Option<Box<dyn Observer>>,
    plugins: Vec<(String, Box<dyn Plugin>)>,
    namespaces: Namespaces,

    callback: Option<ConnectCallback>,
    status_queue: VecDeque<StatusChange>,
    notifying: bool,
}

impl HandlerHost for Connection {
    fn registry(&mut self) -> &mut Registry<Connection> {
        &mut self.registry
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}

impl Connection {
    /// Creates a connection to `service`.
    ///
    /// A `ws:` or `wss:` URL, or a `protocol` option starting with `ws`,
    /// selects the WebSocket transport, anything else is a BOSH endpoint.
    pub fn new<S: Into<String>>(service: S, options: ConnectionOptions) -> Connection {
        let service = service.into();
        let transport = select_transport(&service, &options);
        let mut catalog = Catalog::default();
        if let Some(ref names) = options.mechanisms {
            catalog.retain_names(names);
        }
        Connection {
            service,
            options,
            transport,
            jid: String::new(),
            domain: String::new(),
            authzid: None,
            authcid: None,
            secret: Secret::None,
            scram_keys: None,
            catalog,
            mechanism: None,
            sasl_handlers: Vec::new(),
            features: None,
            do_bind: false,
            do_session: false,
            registry: Registry::default(),
            protocol_error_handlers: HashMap::new(),
            disconnect_timeout: None,
            disconnection_timeout: ConnectParams::default().disconnection_timeout,
            authenticated: false,
            connected: false,
            disconnecting: false,
            paused: false,
            restored: false,
            status: Status::Disconnected,
            data: Vec::new(),
            outbox: Outbox::default(),
            draining: false,
            observer: None,
            plugins: Vec::new(),
            namespaces: Namespaces::default(),
            callback: None,
            status_queue: VecDeque::new(),
            notifying: false,
        }
    }

    fn session(&self) -> Session {
        Session {
            jid: self.jid.clone(),
            domain: self.domain.clone(),
            authenticated: self.authenticated,
            connected: self.connected,
            disconnecting: self.disconnecting,
            paused: self.paused,
            now: Instant::now(),
        }
    }

    /// Starts a session as `jid`.
    ///
    /// Progress is reported to `callback`, starting with
    /// [`Status::Connecting`]. The authentication identity is
    /// `params.authcid`, or the node of `jid`.
    pub fn connect<S, F>(
        &mut self,
        jid: &str,
        secret: S,
        callback: F,
        params: ConnectParams,
    ) -> Result<(), Error>
    where
        S: Into<Secret>,
        F: FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
    {
        let parsed = Jid::new(jid)?;
        self.jid = jid.to_owned();
        self.authzid = Some(parsed.to_bare().to_string());
        self.authcid = params
            .authcid
            .clone()
            .or_else(|| parsed.node().map(|node| node.as_str().to_owned()));
        self.secret = secret.into();
        self.scram_keys = None;
        self.callback = Some(Box::new(callback));
        self.disconnecting = false;
        self.connected = false;
        self.authenticated = false;
        self.restored = false;
        self.disconnection_timeout = params.disconnection_timeout;
        self.domain = parsed.domain().as_str().to_owned();

        self.change_status(Status::Connecting, None, None);
        let session = self.session();
        self.transport.connect(&session, &params, &mut self.outbox);
        self.pump();
        Ok(())
    }

    /// Adopts a BOSH session created elsewhere, announcing
    /// [`Status::Attached`].
    pub fn attach<F>(
        &mut self,
        jid: &str,
        sid: &str,
        rid: u64,
        callback: F,
        params: AttachParams,
    ) -> Result<(), Error>
    where
        F: FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
    {
        let parsed = Jid::new(jid)?;
        self.transport.attach(Attachment {
            sid: sid.to_owned(),
            rid,
            wait: params.wait,
            hold: params.hold,
            window: params.window,
        })?;
        self.jid = jid.to_owned();
        self.domain = parsed.domain().as_str().to_owned();
        self.callback = Some(Box::new(callback));
        self.authenticated = true;
        self.connected = true;
        self.change_status(Status::Attached, None, None);
        self.pump();
        Ok(())
    }

    /// Attaches to the BOSH session cached by a `keepalive` connection.
    ///
    /// With a `jid`, the cached session must belong to the same bare JID, or
    /// to the same domain for a domain-only `jid`. Fails with
    /// [`Error::NoSession`] otherwise.
    pub fn restore<F>(
        &mut self,
        jid: Option<&str>,
        callback: F,
        params: AttachParams,
    ) -> Result<(), Error>
    where
        F: FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
    {
        let record = self.transport.cached_session(jid)?;
        self.restored = true;
        let result = self.attach(&record.jid, &record.sid, record.rid, callback, params);
        if result.is_err() {
            self.restored = false;
        }
        result
    }

    /// Starts a graceful disconnect.
    ///
    /// An unavailable presence is sent if authenticated, and the session is
    /// torn down when the server acknowledges, or after the
    /// `disconnection_timeout` given to [`connect`](Connection::connect).
    pub fn disconnect(&mut self, reason: Option<&str>) {
        self.change_status(Status::Disconnecting, reason.map(str::to_owned), None);
        match reason {
            Some(reason) => log::warn!("Disconnect was called because: {}", reason),
            None => log::info!("Disconnect was called"),
        }
        if self.connected {
            self.disconnecting = true;
            let presence = self.authenticated.then(|| {
                Element::builder("presence", ns::CLIENT)
                    .attr("type", "unavailable")
                    .build()
            });
            let timeout = self.disconnection_timeout;
            self.disconnect_timeout = Some(self.add_sys_timed_handler(timeout, |conn| {
                conn.on_disconnect_timeout();
                Ok(false)
            }));
            let session = self.session();
            self.transport
                .disconnect(&session, presence, &mut self.outbox);
        } else {
            log::warn!("Disconnect was called before connecting to the server");
            self.transport.abort_all_requests(&mut self.outbox);
            self.do_disconnect(None);
        }
        self.pump();
    }

    /// Forgets the session, handlers and queued data, keeping the
    /// configuration and the plugins.
    pub fn reset(&mut self) {
        self.transport.reset(&mut self.outbox);
        self.do_session = false;
        self.do_bind = false;
        self.registry.clear();
        self.authenticated = false;
        self.connected = false;
        self.disconnecting = false;
        self.restored = false;
        self.data.clear();
        self.mechanism = None;
        self.sasl_handlers.clear();
        self.features = None;
        self.disconnect_timeout = None;
        self.pump();
    }

    /// Queues a stanza.
    pub fn send(&mut self, stanza: Element) {
        self.send_all(Some(stanza));
    }

    /// Queues several stanzas, which BOSH sends in the same request.
    pub fn send_all<I: IntoIterator<Item = Element>>(&mut self, stanzas: I) {
        self.data.extend(stanzas.into_iter().map(Outbound::Stanza));
        let session = self.session();
        self.transport
            .send(&session, &mut self.data, &mut self.outbox);
        self.pump();
    }

    fn send_restart(&mut self) {
        self.data.push(Outbound::Restart);
        let session = self.session();
        self.transport
            .send_restart(&session, &mut self.data, &mut self.outbox);
        self.pump();
    }

    /// One scheduler tick: fires due timed handlers, then lets the transport
    /// flush queued data or poll.
    ///
    /// Call this every 100 ms while connected.
    pub fn on_idle(&mut self) {
        handler::fire_timers(self, Instant::now());
        let session = self.session();
        self.transport
            .on_idle(&session, &mut self.data, &mut self.outbox);
        self.pump();
    }

    /// Runs a tick right away.
    pub fn flush(&mut self) {
        self.on_idle();
    }

    /// Stops the transports from sending queued data.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Undoes [`pause`](Connection::pause).
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// A fresh UUID, with `:suffix` appended if given.
    pub fn unique_id(&self, suffix: Option<&str>) -> String {
        let uuid = Uuid::new_v4();
        match suffix {
            Some(suffix) => format!("{}:{}", uuid, suffix),
            None => uuid.to_string(),
        }
    }

    /// Registers a stanza handler, which only runs once authenticated.
    pub fn add_handler<F>(&mut self, filter: StanzaFilter, callback: F) -> HandlerRef
    where
        F: FnMut(&mut Connection, &Element) -> HandlerResult + Send + 'static,
    {
        self.registry.add(filter, true, callback)
    }

    /// Removes a stanza handler, starting with the next incoming batch.
    pub fn delete_handler(&mut self, handler: HandlerRef) {
        self.registry.delete(handler);
    }

    /// Registers a handler called every `period`, once authenticated.
    pub fn add_timed_handler<F>(&mut self, period: Duration, callback: F) -> TimedRef
    where
        F: FnMut(&mut Connection) -> HandlerResult + Send + 'static,
    {
        self.registry.add_timed(period, true, callback)
    }

    /// Removes a timed handler, starting with the next tick.
    pub fn delete_timed_handler(&mut self, handler: TimedRef) {
        self.registry.delete_timed(handler);
    }

    fn add_sys_handler<F>(&mut self, filter: StanzaFilter, callback: F) -> HandlerRef
    where
        F: FnMut(&mut Connection, &Element) -> HandlerResult + Send + 'static,
    {
        self.registry.add(filter, false, callback)
    }

    fn add_sys_timed_handler<F>(&mut self, period: Duration, callback: F) -> TimedRef
    where
        F: FnMut(&mut Connection) -> HandlerResult + Send + 'static,
    {
        self.registry.add_timed(period, false, callback)
    }

    /// Calls `callback` whenever the transport fails with `code`: an HTTP
    /// status for BOSH, a close code for WebSocket.
    pub fn add_protocol_error_handler<F>(&mut self, kind: ProtocolKind, code: u16, callback: F)
    where
        F: FnMut(&mut Connection, u16) + Send + 'static,
    {
        self.protocol_error_handlers
            .insert((kind, code), Box::new(callback));
    }

    /// Initializes `plugin` and stores it under `name`, replacing any
    /// plugin already registered there.
    pub fn register_plugin<P: Plugin>(&mut self, name: &str, mut plugin: P) {
        plugin.init(self);
        let plugin: Box<dyn Plugin> = Box::new(plugin);
        match self.plugins.iter_mut().find(|(known, _)| known == name) {
            Some(entry) => entry.1 = plugin,
            None => self.plugins.push((name.to_owned(), plugin)),
        }
    }

    /// The plugin registered under `name`, if it is a `T`.
    pub fn plugin<T: Plugin>(&self, name: &str) -> Option<&T> {
        self.plugins
            .iter()
            .find(|(known, _)| known == name)
            .and_then(|(_, plugin)| (**plugin).as_any().downcast_ref())
    }

    /// The plugin registered under `name`, if it is a `T`.
    pub fn plugin_mut<T: Plugin>(&mut self, name: &str) -> Option<&mut T> {
        self.plugins
            .iter_mut()
            .find(|(known, _)| known == name)
            .and_then(|(_, plugin)| (**plugin).as_any_mut().downcast_mut())
    }

    /// Installs the traffic hooks.
    pub fn set_observer<O: Observer + 'static>(&mut self, observer: O) {
        self.observer = Some(Box::new(observer));
    }

    /// The namespace table of this connection.
    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// The namespace table of this connection, for plugins to extend.
    pub fn namespaces_mut(&mut self) -> &mut Namespaces {
        &mut self.namespaces
    }

    /// The SASL mechanisms this connection may use.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Adds a SASL mechanism, replacing any of the same name.
    pub fn register_mechanism(&mut self, descriptor: Descriptor) {
        self.catalog.register(descriptor);
    }

    pub(crate) fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The service this connection talks to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The JID, full once bound.
    pub fn jid(&self) -> &str {
        &self.jid
    }

    /// The domain of the JID.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The last announced status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Whether user handlers run.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether the transport has a session.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the session was resumed by [`restore`](Connection::restore).
    pub fn is_restored(&self) -> bool {
        self.restored
    }

    /// The stream features received after authentication.
    pub fn features(&self) -> Option<&Element> {
        self.features.as_ref()
    }

    /// The keys derived by the last SCRAM authentication, which can be
    /// given back to [`connect`](Connection::connect) as a
    /// [`Secret::ScramKeys`].
    pub fn scram_keys(&self) -> Option<&ScramKeys> {
        self.scram_keys.as_ref()
    }

    /// Takes the I/O queued since the last call.
    pub fn take_transmissions(&mut self) -> Vec<Transmission> {
        core::mem::take(&mut self.outbox.transmissions)
    }

    /// Reports the outcome of a [`Transmission::Post`]. An `status` of 0
    /// means no response was received.
    pub fn handle_http_response(&mut self, id: u64, status: u16, body: Option<String>) {
        let session = self.session();
        self.transport
            .handle_http_response(&session, id, status, body, &mut self.outbox);
        self.pump();
    }

    /// Reports that the WebSocket opened.
    pub fn handle_socket_open(&mut self) {
        let session = self.session();
        self.transport
            .handle_socket_open(&session, &mut self.outbox);
        self.pump();
    }

    /// Reports a text frame received on the WebSocket.
    pub fn handle_socket_message(&mut self, data: &str) {
        let session = self.session();
        self.transport
            .handle_socket_message(&session, data, &mut self.outbox);
        self.pump();
    }

    /// Reports that the WebSocket closed with `code`.
    pub fn handle_socket_close(&mut self, code: u16) {
        let session = self.session();
        self.transport
            .handle_socket_close(&session, code, &mut self.outbox);
        self.pump();
    }

    /// Reports a WebSocket failure.
    pub fn handle_socket_error(&mut self, error: &str) {
        let session = self.session();
        self.transport
            .handle_socket_error(&session, error, &mut self.outbox);
        self.pump();
    }

    /// Announces a status to the plugins, then to the callback.
    ///
    /// Changes announced from a callback are delivered after it returns.
    fn change_status(&mut self, status: Status, condition: Option<String>, elem: Option<Element>) {
        self.status = status;
        self.status_queue.push_back((status, condition, elem));
        if self.notifying {
            return;
        }
        self.notifying = true;
        while let Some((status, condition, elem)) = self.status_queue.pop_front() {
            for (_, plugin) in self.plugins.iter_mut() {
                plugin.status_changed(status, condition.as_deref());
            }
            if let Some(mut callback) = self.callback.take() {
                callback(self, status, condition.as_deref(), elem.as_ref());
                if self.callback.is_none() {
                    self.callback = Some(callback);
                }
            }
        }
        self.notifying = false;
    }

    /// Handles the transport events until there are none left.
    fn pump(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(event) = self.outbox.events.pop_front() {
            self.handle_event(event);
        }
        self.draining = false;
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Received {
                kind: RequestKind::Connect,
                raw,
                body,
            } => self.connect_cb(raw, body),
            TransportEvent::Received {
                kind: RequestKind::Data,
                raw,
                body,
            } => self.data_recv(raw, body),
            TransportEvent::Status(status, condition) => self.change_status(status, condition, None),
            TransportEvent::DoDisconnect(condition) => self.do_disconnect(condition),
            TransportEvent::DisconnectTimeout => self.on_disconnect_timeout(),
            TransportEvent::ProtocolError(kind, code) => self.protocol_error(kind, code),
            TransportEvent::NextValidRid(rid) => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.next_valid_rid(rid);
                }
            }
            TransportEvent::Sent { raw, stanzas } => self.observe_output(&raw, &stanzas),
            TransportEvent::Input { raw, elem } => self.observe_input(&raw, elem.as_ref()),
            TransportEvent::Redirect(url) => self.redirect(url),
        }
    }

    fn protocol_error(&mut self, kind: ProtocolKind, code: u16) {
        if let Some(mut handler) = self.protocol_error_handlers.remove(&(kind, code)) {
            handler(self, code);
            self.protocol_error_handlers
                .entry((kind, code))
                .or_insert(handler);
        }
    }

    fn observe_input(&mut self, raw: &str, elem: Option<&Element>) {
        let strip = self.transport.strip();
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        if let Some(elem) = elem {
            match strip {
                Some(wrapper) if elem.name() == wrapper && elem.children().next().is_some() => {
                    for child in elem.children() {
                        observer.xml_input(child);
                    }
                }
                _ => observer.xml_input(elem),
            }
        }
        observer.raw_input(raw);
    }

    fn observe_output(&mut self, raw: &str, stanzas: &[Element]) {
        let strip = self.transport.strip().is_some();
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        if strip {
            for stanza in stanzas {
                observer.xml_output(stanza);
            }
        } else if let Ok(body) = raw.parse::<Element>() {
            observer.xml_output(&body);
        }
        observer.raw_output(raw);
    }

    fn redirect(&mut self, url: String) {
        self.change_status(
            Status::Redirect,
            Some(String::from("Received see-other-uri, resetting connection")),
            None,
        );
        self.reset();
        self.service = url.clone();
        let session = self.session();
        self.transport.redirect(&session, url, &mut self.outbox);
    }

    /// The first response of the session, which must offer a way to
    /// authenticate.
    fn connect_cb(&mut self, raw: String, body: Option<Result<Element, minidom::Error>>) {
        log::debug!("connect_cb was called");
        self.connected = true;
        let body = match body {
            None => return,
            Some(Err(e)) => {
                log::error!("Couldn't parse the connection response: {}", e);
                self.change_status(Status::ConnFail, Some(condition::BAD_FORMAT.to_owned()), None);
                self.do_disconnect(Some(condition::BAD_FORMAT.to_owned()));
                return;
            }
            Some(Ok(body)) => body,
        };
        self.observe_input(&raw, Some(&body));

        let session = self.session();
        if self.transport.connect_cb(&session, &body, &mut self.outbox) == ConnectCheck::Failed {
            return;
        }

        if find_descendant(&body, &|elem| elem.is("features", ns::STREAM)).is_none() {
            self.transport.no_auth_received(&session, &mut self.outbox);
            return;
        }

        let mut offered = Vec::new();
        descendant_texts(&body, "mechanism", &mut offered);
        if self.catalog.matching(&offered).is_empty()
            && find_descendant(&body, &|elem| elem.name() == "auth").is_none()
        {
            self.transport.no_auth_received(&session, &mut self.outbox);
            return;
        }
        self.authenticate(&offered);
    }

    /// Every later response: runs the stanza handlers on each child.
    fn data_recv(&mut self, raw: String, body: Option<Result<Element, minidom::Error>>) {
        let body = match body {
            None => return,
            Some(Err(e)) => {
                log::error!("Couldn't parse a response: {}", e);
                self.change_status(
                    Status::ConnFail,
                    Some(condition::PARSER_ERROR.to_owned()),
                    None,
                );
                self.do_disconnect(Some(condition::PARSER_ERROR.to_owned()));
                return;
            }
            Some(Ok(body)) => body,
        };
        self.observe_input(&raw, Some(&body));
        self.registry.merge();

        if self.disconnecting && self.transport.empty_queue() {
            self.do_disconnect(None);
            return;
        }

        if body.attr("type") == Some("terminate") {
            if self.disconnecting {
                return;
            }
            let cond = bosh::terminate_condition(&body);
            self.change_status(
                Status::ConnFail,
                Some(
                    cond.clone()
                        .unwrap_or_else(|| condition::UNKNOWN_REASON.to_owned()),
                ),
                None,
            );
            self.do_disconnect(cond);
            return;
        }

        for child in body.children() {
            let matched = handler::dispatch(self, child);
            if matched == 0 && is_iq_request(child) {
                self.reply_service_unavailable(child);
            }
        }
    }

    fn reply_service_unavailable(&mut self, iq: &Element) {
        log::debug!("No handler for iq {:?}, replying service-unavailable", iq.attr("id"));
        let reply = Element::builder("iq", ns::CLIENT)
            .attr("type", "error")
            .attr("id", iq.attr("id"))
            .attr("to", iq.attr("from"))
            .append(
                Element::builder("error", ns::CLIENT)
                    .attr("type", "cancel")
                    .append(Element::builder("service-unavailable", ns::STANZAS)),
            )
            .build();
        self.send(reply);
    }

    fn on_disconnect_timeout(&mut self) {
        log::debug!("on_disconnect_timeout was called");
        self.change_status(Status::ConnTimeout, None, None);
        self.transport.on_disconnect_timeout(&mut self.outbox);
        self.do_disconnect(None);
    }

    /// The last step of every disconnection.
    fn do_disconnect(&mut self, condition: Option<String>) {
        log::debug!("do_disconnect was called");
        self.disconnect_timeout = None;
        self.transport.do_disconnect(&mut self.outbox);
        self.authenticated = false;
        self.disconnecting = false;
        self.restored = false;
        self.registry.clear();
        self.sasl_handlers.clear();
        self.mechanism = None;
        self.change_status(Status::Disconnected, condition, None);
        self.connected = false;
    }
}
