//! XEP-0124/XEP-0206 long-polling transport.
//!
//! At most two requests are open at once. Each one carries a `<body/>`
//! with the next rid, and is retried with the same rid until it gets a
//! definitive answer or runs out of transmissions.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::request::{Request, RequestState};
use super::{
    escape_attr, find_descendant, parse_response, Attachment, ConnectCheck, Outbound, Outbox,
    ProtocolKind, RequestKind, Session, Transmission, Transport, TransportEvent,
};
use crate::minidom::Element;
use crate::session_store::{self, SessionRecord, SessionStore, SESSION_KEY};
use crate::status::condition;
use crate::{ns, BoshTimeouts, ConnectParams, ConnectionOptions, Error, Status};

/// A `<body/>` wrapper under construction.
#[derive(Debug, Default)]
struct Body {
    attrs: Vec<(&'static str, String)>,
    stanzas: Vec<Element>,
}

impl Body {
    fn attr<V: Into<String>>(&mut self, name: &'static str, value: V) -> &mut Body {
        self.attrs.push((name, value.into()));
        self
    }

    fn serialize(&self) -> String {
        let mut out = String::from("<body");
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("='");
            out.push_str(&escape_attr(value));
            out.push('\'');
        }
        if self.stanzas.is_empty() {
            out.push_str("/>");
            return out;
        }
        out.push('>');
        for stanza in &self.stanzas {
            out.push_str(&String::from(stanza));
        }
        out.push_str("</body>");
        out
    }
}

/// The condition of a terminating `<body/>`, a nested stream conflict
/// being reported as `conflict`.
pub(crate) fn terminate_condition(body: &Element) -> Option<String> {
    body.attr("condition").map(|cond| {
        if cond == "remote-stream-error"
            && find_descendant(body, &|elem| elem.name() == "conflict").is_some()
        {
            condition::CONFLICT.to_owned()
        } else {
            cond.to_owned()
        }
    })
}

fn fresh_rid() -> u64 {
    rand::thread_rng().gen_range(0..1u64 << 32)
}

pub(crate) struct Bosh {
    rid: u64,
    sid: Option<String>,
    hold: u32,
    wait: u32,
    window: u32,
    errors: u32,
    inactivity: Option<u32>,
    requests: Vec<Request>,
    next_id: u64,
    keepalive: bool,
    max_retries: u32,
    timeouts: BoshTimeouts,
    strip_wrapper: bool,
    store: Arc<dyn SessionStore>,
}

impl Bosh {
    pub fn new(options: &ConnectionOptions) -> Bosh {
        Bosh {
            rid: fresh_rid(),
            sid: None,
            hold: 1,
            wait: 60,
            window: 5,
            errors: 0,
            inactivity: None,
            requests: Vec::new(),
            next_id: 0,
            keepalive: options.keepalive,
            max_retries: options.max_retries,
            timeouts: options.timeouts,
            strip_wrapper: options.strip_wrapper,
            store: options.session_store.clone(),
        }
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn primary_timeout(&self) -> Duration {
        Duration::from_secs((self.timeouts.primary * f64::from(self.wait)).floor() as u64)
    }

    fn secondary_timeout(&self) -> Duration {
        Duration::from_secs((self.timeouts.secondary * f64::from(self.wait)).floor() as u64)
    }

    fn build_body(&mut self, session: &Session) -> (u64, Body) {
        let rid = self.rid;
        self.rid += 1;
        let mut body = Body::default();
        body.attr("rid", rid.to_string()).attr("xmlns", ns::HTTPBIND);
        if let Some(ref sid) = self.sid {
            body.attr("sid", sid.clone());
        }
        if self.keepalive {
            self.cache_session(session);
        }
        (rid, body)
    }

    fn cache_session(&self, session: &Session) {
        let result = if session.authenticated {
            match self.sid {
                Some(ref sid) if !session.jid.is_empty() => session_store::save(
                    &*self.store,
                    &SessionRecord {
                        jid: session.jid.clone(),
                        rid: self.rid,
                        sid: sid.clone(),
                    },
                ),
                _ => Ok(()),
            }
        } else {
            self.store.remove(SESSION_KEY)
        };
        if let Err(e) = result {
            log::warn!("Couldn't cache BOSH session: {}", e);
        }
    }

    fn forget_session(&self) {
        if let Err(e) = self.store.remove(SESSION_KEY) {
            log::warn!("Couldn't remove cached BOSH session: {}", e);
        }
    }

    fn push(&mut self, rid: u64, body: Body, kind: RequestKind) {
        let id = self.take_id();
        let data = body.serialize();
        self.requests.push(Request::new(id, rid, data, body.stanzas, kind));
    }

    fn throttle(&mut self, session: &Session, out: &mut Outbox) {
        log::debug!(
            "Throttled request handler called with {} requests",
            self.requests.len()
        );
        if self.requests.is_empty() {
            return;
        }
        self.process_request(0, session, out);
        if self.requests.len() > 1
            && self.requests[0].rid.abs_diff(self.requests[1].rid) < u64::from(self.window)
        {
            self.process_request(1, session, out);
        }
    }

    fn process_request(&mut self, index: usize, session: &Session, out: &mut Outbox) {
        let now = session.now;
        let primary = self.primary_timeout();
        let secondary = self.secondary_timeout();

        let req = &self.requests[index];
        let primary_timeout = req.age(now) > primary;
        let secondary_timeout = req.dead.is_some() && req.time_dead(now) > secondary;
        let server_error = matches!(req.state, RequestState::Done(status) if status < 1 || status >= 500);
        let needs_retry = primary_timeout || secondary_timeout || server_error;

        if (needs_retry || req.state == RequestState::Unsent) && req.sends >= self.max_retries {
            log::error!(
                "Request {} was already sent {} times, giving up",
                req.id,
                req.sends
            );
            self.abort_all_requests(out);
            out.event(TransportEvent::DisconnectTimeout);
            return;
        }

        if needs_retry {
            if secondary_timeout {
                log::error!("Request {} timed out (secondary), restarting", req.id);
            }
            if req.state == RequestState::Pending {
                out.transmit(Transmission::Abort { id: req.id });
            }
            let id = self.take_id();
            let retried = self.requests[index].retry(id);
            self.requests[index] = retried;
        }

        let req = &mut self.requests[index];
        if req.state != RequestState::Unsent {
            log::debug!(
                "{} request is in state {:?}",
                if index == 0 { "First" } else { "Second" },
                req.state
            );
            return;
        }

        let delay = if req.sends > 1 {
            Duration::from_secs(u64::from(req.sends).pow(3)).min(primary)
        } else {
            Duration::ZERO
        };
        log::debug!("Request id {}.{} posting", req.id, req.sends);
        req.date = Some(now + delay);
        req.state = RequestState::Pending;
        req.sends += 1;
        out.transmit(Transmission::Post {
            id: req.id,
            body: req.data.clone(),
            delay,
        });
        out.event(TransportEvent::Sent {
            raw: req.data.clone(),
            stanzas: req.stanzas.clone(),
        });
    }

    fn remove_request(&mut self, index: usize, session: &Session, out: &mut Outbox) {
        let req = self.requests.remove(index);
        log::debug!("Request id {} removed", req.id);
        self.throttle(session, out);
    }

    fn restart_request(&mut self, index: usize, session: &Session, out: &mut Outbox) {
        let req = &mut self.requests[index];
        if req.dead.is_none() {
            req.dead = Some(session.now);
        }
        self.process_request(index, session, out);
    }

    fn hit_error(&mut self, status: u16, out: &mut Outbox) {
        self.errors += 1;
        log::warn!(
            "Request errored, status: {}, number of errors: {}",
            status,
            self.errors
        );
        if self.errors >= self.max_retries {
            self.abort_all_requests(out);
            out.event(TransportEvent::DisconnectTimeout);
        }
    }

    fn give_up(&mut self, out: &mut Outbox) {
        self.abort_all_requests(out);
        out.status(Status::ConnFail, Some(condition::GIVING_UP));
        out.event(TransportEvent::DoDisconnect(Some(
            condition::GIVING_UP.to_owned(),
        )));
    }

    fn new_rid(&mut self, out: &mut Outbox) {
        self.rid = fresh_rid();
        out.event(TransportEvent::NextValidRid(self.rid));
    }
}

impl Transport for Bosh {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    fn strip(&self) -> Option<&'static str> {
        self.strip_wrapper.then_some("body")
    }

    fn connect(&mut self, session: &Session, params: &ConnectParams, out: &mut Outbox) {
        self.wait = params.wait;
        self.hold = params.hold;
        self.errors = 0;

        let (rid, mut body) = self.build_body(session);
        body.attr("to", session.domain.clone())
            .attr("xml:lang", "en")
            .attr("wait", self.wait.to_string())
            .attr("hold", self.hold.to_string())
            .attr("content", "text/xml; charset=utf-8")
            .attr("ver", "1.6")
            .attr("xmpp:version", "1.0")
            .attr("xmlns:xmpp", ns::BOSH);
        if let Some(ref route) = params.route {
            body.attr("route", route.clone());
        }
        self.push(rid, body, RequestKind::Connect);
        self.throttle(session, out);
    }

    fn connect_cb(&mut self, _session: &Session, body: &Element, out: &mut Outbox) -> ConnectCheck {
        if body.attr("type") == Some("terminate") {
            let cond = terminate_condition(body);
            log::error!(
                "BOSH connection failed: {}",
                cond.as_deref().unwrap_or("no condition")
            );
            out.status(
                Status::ConnFail,
                Some(cond.clone().unwrap_or_else(|| condition::UNKNOWN_REASON.to_owned())),
            );
            out.event(TransportEvent::DoDisconnect(cond));
            return ConnectCheck::Failed;
        }

        if self.sid.is_none() {
            self.sid = body.attr("sid").map(str::to_owned);
        }
        if let Some(window) = body.attr("requests").and_then(|v| v.parse().ok()) {
            if window < 2 {
                log::warn!(
                    "Server asked for {} concurrent requests, which is unsupported",
                    window
                );
            }
            self.window = window;
        }
        if let Some(hold) = body.attr("hold").and_then(|v| v.parse().ok()) {
            self.hold = hold;
        }
        if let Some(wait) = body.attr("wait").and_then(|v| v.parse().ok()) {
            self.wait = wait;
        }
        if let Some(inactivity) = body.attr("inactivity").and_then(|v| v.parse().ok()) {
            self.inactivity = Some(inactivity);
        }
        log::debug!(
            "BOSH session {:?}: wait={} hold={} window={} inactivity={:?}",
            self.sid,
            self.wait,
            self.hold,
            self.window,
            self.inactivity
        );
        ConnectCheck::Continue
    }

    fn attach(&mut self, attachment: Attachment) -> Result<(), Error> {
        self.sid = Some(attachment.sid);
        self.rid = attachment.rid;
        if let Some(wait) = attachment.wait {
            self.wait = wait;
        }
        if let Some(hold) = attachment.hold {
            self.hold = hold;
        }
        if let Some(window) = attachment.window {
            self.window = window;
        }
        Ok(())
    }

    fn cached_session(&self, jid: Option<&str>) -> Result<SessionRecord, Error> {
        match session_store::load(&*self.store)? {
            Some(record) if record.matches(jid) => Ok(record),
            _ => Err(Error::NoSession),
        }
    }

    fn no_auth_received(&mut self, session: &Session, out: &mut Outbox) {
        log::warn!(
            "Server did not yet offer a supported authentication mechanism. Sending a blank poll request."
        );
        let (rid, body) = self.build_body(session);
        self.push(rid, body, RequestKind::Connect);
        self.throttle(session, out);
    }

    fn send(&mut self, session: &Session, _data: &mut Vec<Outbound>, out: &mut Outbox) {
        self.throttle(session, out);
    }

    fn send_restart(&mut self, session: &Session, _data: &mut Vec<Outbound>, out: &mut Outbox) {
        self.throttle(session, out);
    }

    fn on_idle(&mut self, session: &Session, data: &mut Vec<Outbound>, out: &mut Outbox) {
        if session.authenticated
            && self.requests.is_empty()
            && data.is_empty()
            && !session.disconnecting
        {
            log::debug!("No requests during idle cycle, sending blank request");
            data.push(Outbound::Poll);
        }

        if session.paused {
            return;
        }

        if self.requests.len() < 2 && !data.is_empty() {
            let (rid, mut body) = self.build_body(session);
            for item in data.drain(..) {
                match item {
                    Outbound::Stanza(stanza) => body.stanzas.push(stanza),
                    Outbound::Restart => {
                        body.attr("to", session.domain.clone())
                            .attr("xml:lang", "en")
                            .attr("xmpp:restart", "true")
                            .attr("xmlns:xmpp", ns::BOSH);
                    }
                    Outbound::Poll => (),
                }
            }
            self.push(rid, body, RequestKind::Data);
            self.throttle(session, out);
        }

        if let Some(first) = self.requests.first() {
            let now = session.now;
            if first.dead.is_some() && first.time_dead(now) > self.secondary_timeout() {
                self.throttle(session, out);
            }
        }
        if let Some(first) = self.requests.first() {
            let primary = self.primary_timeout();
            if first.age(session.now) > primary {
                log::warn!(
                    "Request {} timed out, over {} seconds since last activity",
                    first.id,
                    primary.as_secs()
                );
                self.throttle(session, out);
            }
        }
    }

    fn disconnect(&mut self, session: &Session, presence: Option<Element>, out: &mut Outbox) {
        let (rid, mut body) = self.build_body(session);
        body.attr("type", "terminate");
        body.stanzas.extend(presence);
        self.push(rid, body, RequestKind::Data);
        self.throttle(session, out);
    }

    fn do_disconnect(&mut self, out: &mut Outbox) {
        self.abort_all_requests(out);
        self.sid = None;
        self.forget_session();
        self.new_rid(out);
    }

    fn on_disconnect_timeout(&mut self, out: &mut Outbox) {
        self.abort_all_requests(out);
    }

    fn abort_all_requests(&mut self, out: &mut Outbox) {
        while let Some(req) = self.requests.pop() {
            if req.state == RequestState::Pending {
                out.transmit(Transmission::Abort { id: req.id });
            }
        }
    }

    fn reset(&mut self, out: &mut Outbox) {
        self.abort_all_requests(out);
        self.sid = None;
        self.errors = 0;
        self.forget_session();
        self.new_rid(out);
    }

    fn empty_queue(&self) -> bool {
        self.requests.is_empty()
    }

    fn handle_http_response(
        &mut self,
        session: &Session,
        id: u64,
        status: u16,
        body: Option<String>,
        out: &mut Outbox,
    ) {
        let Some(index) = self.requests.iter().position(|req| req.id == id) else {
            log::debug!("Ignoring response to unknown request {}", id);
            return;
        };
        let req = &mut self.requests[index];
        req.state = RequestState::Done(status);
        let (rid, sends, kind) = (req.rid, req.sends, req.kind);
        log::debug!("Request id {}.{} got status {}", id, sends, status);

        if session.disconnecting && status >= 400 {
            self.hit_error(status, out);
            out.event(TransportEvent::ProtocolError(ProtocolKind::Http, status));
            return;
        }

        let valid = status > 0 && status < 500;
        let too_many = sends >= self.max_retries;
        if valid || too_many {
            self.remove_request(index, session, out);
        }

        if status == 200 {
            let restart_other = index == 1
                || (index == 0
                    && self
                        .requests
                        .first()
                        .is_some_and(|other| other.age(session.now) > self.primary_timeout()));
            if restart_other && !self.requests.is_empty() {
                self.restart_request(0, session, out);
            }
            out.event(TransportEvent::NextValidRid(rid + 1));
            self.errors = 0;
            let raw = body.unwrap_or_default();
            let body = parse_response(&raw);
            out.event(TransportEvent::Received { kind, raw, body });
        } else if status == 0 || (400..600).contains(&status) || status >= 12000 {
            log::error!("Request id {}.{} error {} happened", id, sends, status);
            if too_many {
                self.give_up(out);
                return;
            }
            self.hit_error(status, out);
            out.event(TransportEvent::ProtocolError(ProtocolKind::Http, status));
            if (400..500).contains(&status) {
                out.status(Status::Disconnecting, None::<String>);
                out.event(TransportEvent::DoDisconnect(None));
            }
        } else {
            log::error!("Request id {}.{} error {} happened", id, sends, status);
        }

        if !valid && !too_many {
            self.throttle(session, out);
        }
    }
}
