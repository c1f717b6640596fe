use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;

use super::*;
use crate::HandlerError;
use crate::observer::Observer;
use crate::session_store::{self, MemoryStore};

const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";

const SASL_FEATURES: &str = "<body xmlns='http://jabber.org/protocol/httpbind' sid='s1' wait='60' requests='2' hold='1' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms></stream:features></body>";

const SASL_SUCCESS: &str = "<body xmlns='http://jabber.org/protocol/httpbind'><success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/></body>";

const BIND_FEATURES: &str = "<body xmlns='http://jabber.org/protocol/httpbind' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/><session xmlns='urn:ietf:params:xml:ns:xmpp-session'/></stream:features></body>";

const BIND_RESULT: &str = "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='_bind_auth_2'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>romeo@montague.lit/orchard</jid></bind></iq></body>";

const SESSION_RESULT: &str = "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='_session_auth_2'/></body>";

const EMPTY: &str = "<body xmlns='http://jabber.org/protocol/httpbind'/>";

type Log = Arc<Mutex<Vec<(Status, Option<String>)>>>;

fn recorder() -> (
    Log,
    impl FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
) {
    let log = Log::default();
    let recorded = log.clone();
    let callback = move |_: &mut Connection, status: Status, cond: Option<&str>, _: Option<&Element>| {
        recorded.lock().unwrap().push((status, cond.map(str::to_owned)));
    };
    (log, callback)
}

fn statuses(log: &Log) -> Vec<Status> {
    log.lock().unwrap().iter().map(|(status, _)| *status).collect()
}

fn last(log: &Log) -> (Status, Option<String>) {
    log.lock().unwrap().last().cloned().unwrap()
}

fn options(store: Arc<MemoryStore>) -> ConnectionOptions {
    ConnectionOptions {
        session_store: store,
        ..ConnectionOptions::default()
    }
}

fn bosh_connection() -> Connection {
    Connection::new(
        "https://montague.lit/http-bind",
        options(Arc::new(MemoryStore::default())),
    )
}

fn posts(conn: &mut Connection) -> Vec<(u64, String)> {
    conn.take_transmissions()
        .into_iter()
        .filter_map(|transmission| match transmission {
            Transmission::Post { id, body, .. } => Some((id, body)),
            _ => None,
        })
        .collect()
}

fn stanzas(body: &str) -> Vec<Element> {
    let body: Element = body.parse().unwrap();
    assert!(body.is("body", HTTPBIND));
    body.children().cloned().collect()
}

/// Flushes, then answers the single outstanding request with `reply` and
/// returns what it carried.
fn exchange(conn: &mut Connection, reply: &str) -> String {
    conn.flush();
    let mut posted = posts(conn);
    assert_eq!(posted.len(), 1, "one request expected, got {:?}", posted);
    let (id, body) = posted.remove(0);
    conn.handle_http_response(id, 200, Some(reply.to_owned()));
    body
}

/// Runs a full PLAIN login of romeo@montague.lit with resource binding and
/// session establishment.
fn login<F>(conn: &mut Connection, callback: F)
where
    F: FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
{
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    exchange(conn, SASL_FEATURES);
    exchange(conn, SASL_SUCCESS);
    exchange(conn, BIND_FEATURES);
    exchange(conn, BIND_RESULT);
    exchange(conn, SESSION_RESULT);
    assert!(conn.is_authenticated());
}

#[tokio::test]
async fn plain_login_binds_and_opens_session() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();

    let creation = exchange(&mut conn, SASL_FEATURES);
    assert!(creation.contains("to='montague.lit'"));
    assert_eq!(statuses(&log), [Status::Connecting, Status::Authenticating]);

    let auth = exchange(&mut conn, SASL_SUCCESS);
    let auth = stanzas(&auth).remove(0);
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    assert_eq!(auth.text(), "AHJvbWVvAHNlY3JldA==");

    let restart = exchange(&mut conn, BIND_FEATURES);
    assert!(restart.contains("xmpp:restart='true'"));
    assert!(conn.features().is_some());

    let bind = stanzas(&exchange(&mut conn, BIND_RESULT)).remove(0);
    assert_eq!(bind.attr("id"), Some("_bind_auth_2"));
    assert!(bind.get_child("bind", ns::BIND).is_some());
    assert_eq!(conn.jid(), "romeo@montague.lit/orchard");

    let session = stanzas(&exchange(&mut conn, SESSION_RESULT)).remove(0);
    assert!(session.get_child("session", ns::SESSION).is_some());

    assert_eq!(
        statuses(&log),
        [Status::Connecting, Status::Authenticating, Status::Connected]
    );
    assert!(conn.is_authenticated());
    assert_eq!(conn.status(), Status::Connected);
}

#[tokio::test]
async fn sasl_failure_reports_the_condition() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "wrong", callback, ConnectParams::default())
        .unwrap();
    exchange(&mut conn, SASL_FEATURES);
    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><text>Nope</text><not-authorized/></failure></body>",
    );
    assert_eq!(
        last(&log),
        (Status::AuthFail, Some(String::from("not-authorized")))
    );
    assert!(!conn.is_authenticated());
}

const SCRAM_FEATURES: &str = "<body xmlns='http://jabber.org/protocol/httpbind' sid='s1' wait='60' requests='2' hold='1' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>SCRAM-SHA-1</mechanism><mechanism>PLAIN</mechanism></mechanisms></stream:features></body>";

fn sasl_body(name: &str, payload: &str) -> String {
    format!(
        "<body xmlns='http://jabber.org/protocol/httpbind'><{} xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>{}</{}></body>",
        name,
        Base64.encode(payload),
        name
    )
}

/// Connects with SCRAM-SHA-1 only and returns the outstanding request
/// carrying `<auth/>`, with the client nonce it announced.
fn scram_connection<F>(callback: F) -> (Connection, u64, String)
where
    F: FnMut(&mut Connection, Status, Option<&str>, Option<&Element>) + Send + 'static,
{
    let mut conn = Connection::new(
        "https://montague.lit/http-bind",
        ConnectionOptions {
            mechanisms: Some(vec![String::from("SCRAM-SHA-1")]),
            ..options(Arc::new(MemoryStore::default()))
        },
    );
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    exchange(&mut conn, SCRAM_FEATURES);

    conn.flush();
    let (id, body) = posts(&mut conn).remove(0);
    let auth = stanzas(&body).remove(0);
    assert_eq!(auth.attr("mechanism"), Some("SCRAM-SHA-1"));
    let initial = String::from_utf8(Base64.decode(auth.text()).unwrap()).unwrap();
    let nonce = initial
        .split(',')
        .find_map(|field| field.strip_prefix("r="))
        .unwrap()
        .to_owned();
    (conn, id, nonce)
}

#[tokio::test]
async fn scram_rejects_a_forged_server_signature() {
    let (log, callback) = recorder();
    let (mut conn, id, nonce) = scram_connection(callback);
    let server_first = format!("r={}3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096", nonce);
    conn.handle_http_response(id, 200, Some(sasl_body("challenge", &server_first)));

    let sent = exchange(&mut conn, &sasl_body("success", "v=AAAAAAAAAAAAAAAAAAAAAAAAAAA="));
    let response = stanzas(&sent).remove(0);
    assert!(response.is("response", ns::SASL));

    assert_eq!(
        statuses(&log),
        [Status::Connecting, Status::Authenticating, Status::AuthFail]
    );
    assert!(!conn.is_authenticated());
    assert!(conn.scram_keys().is_none());
    conn.flush();
    assert!(posts(&mut conn)
        .iter()
        .all(|(_, body)| !body.contains("xmpp:restart")));
}

#[tokio::test]
async fn scram_refuses_a_foreign_server_nonce() {
    let (log, callback) = recorder();
    let (mut conn, id, _) = scram_connection(callback);
    conn.handle_http_response(
        id,
        200,
        Some(sasl_body(
            "challenge",
            "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096",
        )),
    );

    assert_eq!(
        statuses(&log),
        [Status::Connecting, Status::Authenticating, Status::AuthFail]
    );
    conn.flush();
    assert!(posts(&mut conn)
        .iter()
        .all(|(_, body)| stanzas(body).iter().all(|stanza| stanza.name() != "response")));
}

#[tokio::test]
async fn unknown_mechanisms_trigger_a_blank_poll() {
    let mut conn = Connection::new(
        "https://montague.lit/http-bind",
        ConnectionOptions {
            mechanisms: Some(vec![String::from("SCRAM-SHA-1")]),
            ..options(Arc::new(MemoryStore::default()))
        },
    );
    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    let (id, _) = posts(&mut conn).remove(0);
    conn.handle_http_response(id, 200, Some(SASL_FEATURES.to_owned()));

    let mut posted = posts(&mut conn);
    assert_eq!(posted.len(), 1);
    let (_, poll) = posted.remove(0);
    assert!(poll.contains("sid='s1'"));
    assert!(stanzas(&poll).is_empty());
    assert_eq!(statuses(&log), [Status::Connecting]);
}

#[tokio::test]
async fn unhandled_iq_requests_get_an_error_reply() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);

    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='get' id='v1' from='juliet@capulet.lit/balcony'><query xmlns='jabber:iq:version'/></iq><iq xmlns='jabber:client' type='result' id='r1'/></body>",
    );
    conn.flush();
    let (_, reply) = posts(&mut conn).remove(0);
    let mut replies = stanzas(&reply);
    assert_eq!(replies.len(), 1);
    let reply = replies.remove(0);
    assert_eq!(reply.attr("type"), Some("error"));
    assert_eq!(reply.attr("id"), Some("v1"));
    assert_eq!(reply.attr("to"), Some("juliet@capulet.lit/balcony"));
    let error = reply.get_child("error", ns::CLIENT).unwrap();
    assert_eq!(error.attr("type"), Some("cancel"));
    assert!(error.get_child("service-unavailable", ns::STANZAS).is_some());
}

#[tokio::test]
async fn failing_handlers_do_not_suppress_the_error_reply() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);
    conn.add_handler(StanzaFilter::new().name("iq"), |_, _| {
        Err(HandlerError(String::from("cannot answer")).into())
    });

    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='set' id='x1' from='juliet@capulet.lit/balcony'><query xmlns='jabber:iq:roster'/></iq></body>",
    );
    let sent = exchange(&mut conn, EMPTY);
    let mut replies = stanzas(&sent);
    assert_eq!(replies.len(), 1);
    let reply = replies.remove(0);
    assert_eq!(reply.attr("type"), Some("error"));
    assert_eq!(reply.attr("id"), Some("x1"));
}

#[tokio::test]
async fn handled_iq_requests_are_left_alone() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    conn.add_handler(
        StanzaFilter::new().ns(ns::VERSION).name("iq").type_("get"),
        move |_, iq| {
            recorded.lock().unwrap().push(iq.attr("id").unwrap_or_default().to_owned());
            Ok(true)
        },
    );
    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='get' id='v2'><query xmlns='jabber:iq:version'/></iq></body>",
    );
    assert_eq!(*seen.lock().unwrap(), ["v2"]);

    conn.flush();
    let (_, poll) = posts(&mut conn).remove(0);
    assert!(stanzas(&poll).is_empty());
}

#[tokio::test]
async fn legacy_auth_when_sasl_is_missing() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();

    let creation = exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' sid='s1' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><auth xmlns='http://jabber.org/features/iq-auth'/></stream:features></body>",
    );
    assert!(stanzas(&creation).is_empty());
    assert_eq!(statuses(&log), [Status::Connecting, Status::Authenticating]);

    let query = stanzas(&exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='_auth_1'/></body>",
    ))
    .remove(0);
    assert_eq!(query.attr("type"), Some("get"));
    assert_eq!(query.attr("to"), Some("montague.lit"));
    let username = query
        .get_child("query", ns::AUTH)
        .and_then(|query| query.get_child("username", ns::AUTH))
        .unwrap();
    assert_eq!(username.text(), "romeo");

    let set = stanzas(&exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='_auth_2'/></body>",
    ))
    .remove(0);
    assert_eq!(set.attr("id"), Some("_auth_2"));
    let query = set.get_child("query", ns::AUTH).unwrap();
    assert_eq!(query.get_child("password", ns::AUTH).unwrap().text(), "secret");
    assert_eq!(
        query.get_child("resource", ns::AUTH).unwrap().text(),
        "xmpp-session"
    );
    assert_eq!(conn.jid(), "romeo@montague.lit/xmpp-session");
    assert_eq!(last(&log).0, Status::Connected);
    assert!(conn.is_authenticated());
}

#[tokio::test]
async fn legacy_auth_needs_a_node() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.connect("montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' sid='s1' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><auth xmlns='http://jabber.org/features/iq-auth'/></stream:features></body>",
    );
    let terminate = exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' type='terminate'/>",
    );
    assert!(terminate.contains("type='terminate'"));

    let log = log.lock().unwrap().clone();
    let missing = Some(String::from(condition::MISSING_JID_NODE));
    assert_eq!(
        log,
        [
            (Status::Connecting, None),
            (Status::ConnFail, missing.clone()),
            (Status::Disconnecting, missing),
            (Status::Disconnected, None),
        ]
    );
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn explicit_binding_waits_for_the_application() {
    let mut conn = Connection::new(
        "https://montague.lit/http-bind",
        ConnectionOptions {
            explicit_resource_binding: true,
            ..options(Arc::new(MemoryStore::default()))
        },
    );
    let (log, callback) = recorder();
    conn.connect(
        "romeo@montague.lit/orchard",
        "secret",
        callback,
        ConnectParams::default(),
    )
    .unwrap();
    exchange(&mut conn, SASL_FEATURES);
    exchange(&mut conn, SASL_SUCCESS);
    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' xmlns:stream='http://etherx.jabber.org/streams'><stream:features><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/></stream:features></body>",
    );
    assert_eq!(last(&log).0, Status::BindRequired);
    conn.flush();
    assert!(posts(&mut conn).iter().all(|(_, body)| !body.contains("_bind_auth_2")));

    conn.bind();
    let bind = stanzas(&exchange(&mut conn, BIND_RESULT)).remove(0);
    let resource = bind
        .get_child("bind", ns::BIND)
        .and_then(|bind| bind.get_child("resource", ns::BIND))
        .unwrap();
    assert_eq!(resource.text(), "orchard");
    assert_eq!(last(&log).0, Status::Connected);
}

#[tokio::test]
async fn bind_conflict_fails_authentication() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    exchange(&mut conn, SASL_FEATURES);
    exchange(&mut conn, SASL_SUCCESS);
    exchange(&mut conn, BIND_FEATURES);
    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='error' id='_bind_auth_2'><error type='cancel'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error></iq></body>",
    );
    assert_eq!(last(&log), (Status::AuthFail, Some(String::from("conflict"))));
    assert!(!conn.is_authenticated());
}

#[tokio::test]
async fn send_iq_resolves_with_the_reply() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);

    let outcome = Arc::new(Mutex::new(Vec::new()));
    let (on_result, on_error) = (outcome.clone(), outcome.clone());
    let ping = Element::builder("iq", ns::CLIENT)
        .attr("type", "get")
        .append(Element::builder("ping", "urn:xmpp:ping"))
        .build();
    let id = conn.send_iq(
        ping,
        move |_, reply| on_result.lock().unwrap().push(format!("result {}", reply.attr("id").unwrap())),
        move |_, _| on_error.lock().unwrap().push(String::from("error")),
        None,
    );
    assert!(id.ends_with(":sendIQ"));

    let sent = exchange(&mut conn, EMPTY);
    assert_eq!(stanzas(&sent)[0].attr("id"), Some(id.as_str()));
    let reply = format!(
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='{}'/></body>",
        id
    );
    exchange(&mut conn, &reply);
    exchange(&mut conn, &reply);
    assert_eq!(*outcome.lock().unwrap(), [format!("result {}", id)]);
}

#[tokio::test]
async fn send_iq_ignores_requests_reusing_its_id() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);

    let outcome = Arc::new(Mutex::new(Vec::new()));
    let (on_result, on_error) = (outcome.clone(), outcome.clone());
    let query = Element::builder("iq", ns::CLIENT)
        .attr("type", "get")
        .attr("id", "version-1")
        .append(Element::builder("query", ns::VERSION))
        .build();
    conn.send_iq(
        query,
        move |_, _| on_result.lock().unwrap().push("result"),
        move |_, _| on_error.lock().unwrap().push("error"),
        None,
    );
    exchange(&mut conn, EMPTY);

    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='set' id='version-1' from='montague.lit'/></body>",
    );
    let sent = exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='version-1'/></body>",
    );
    let mut replies = stanzas(&sent);
    assert_eq!(replies.len(), 1);
    let reply = replies.remove(0);
    assert_eq!(reply.attr("type"), Some("error"));
    assert_eq!(reply.attr("id"), Some("version-1"));
    assert!(reply
        .get_child("error", ns::CLIENT)
        .and_then(|error| error.get_child("service-unavailable", ns::STANZAS))
        .is_some());
    assert_eq!(*outcome.lock().unwrap(), ["result"]);
}

#[tokio::test(start_paused = true)]
async fn send_iq_times_out() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    login(&mut conn, callback);

    let outcome = Arc::new(Mutex::new(Vec::new()));
    let (on_result, on_error) = (outcome.clone(), outcome.clone());
    let ping = Element::builder("iq", ns::CLIENT)
        .attr("type", "get")
        .attr("id", "ping-1")
        .build();
    let id = conn.send_iq(
        ping,
        move |_, _| on_result.lock().unwrap().push("result"),
        move |_, reply: Option<&Element>| {
            on_error
                .lock()
                .unwrap()
                .push(if reply.is_none() { "timeout" } else { "error" })
        },
        Some(Duration::from_secs(5)),
    );
    assert_eq!(id, "ping-1");
    conn.flush();
    let (request, _) = posts(&mut conn).remove(0);

    tokio::time::advance(Duration::from_secs(6)).await;
    conn.on_idle();
    assert_eq!(*outcome.lock().unwrap(), ["timeout"]);

    conn.handle_http_response(
        request,
        200,
        Some("<body xmlns='http://jabber.org/protocol/httpbind'><iq xmlns='jabber:client' type='result' id='ping-1'/></body>".to_owned()),
    );
    assert_eq!(*outcome.lock().unwrap(), ["timeout"]);
}

#[tokio::test]
async fn graceful_disconnect() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    login(&mut conn, callback);

    conn.disconnect(Some("done"));
    assert_eq!(last(&log), (Status::Disconnecting, Some(String::from("done"))));
    let terminate = exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' type='terminate'/>",
    );
    assert!(terminate.contains("type='terminate'"));
    let presence = stanzas(&terminate).remove(0);
    assert!(presence.is("presence", ns::CLIENT));
    assert_eq!(presence.attr("type"), Some("unavailable"));

    assert_eq!(last(&log), (Status::Disconnected, None));
    assert!(!conn.is_connected());
    assert!(!conn.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn disconnect_gives_up_after_the_timeout() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    login(&mut conn, callback);

    conn.disconnect(None);
    let (request, _) = posts(&mut conn).remove(0);
    tokio::time::advance(Duration::from_millis(3100)).await;
    conn.on_idle();

    let tail: Vec<Status> = statuses(&log).into_iter().rev().take(3).collect();
    assert_eq!(
        tail,
        [Status::Disconnected, Status::ConnTimeout, Status::Disconnecting]
    );
    assert!(conn
        .take_transmissions()
        .contains(&Transmission::Abort { id: request }));
}

#[tokio::test]
async fn server_terminate_is_a_connection_failure() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    login(&mut conn, callback);

    exchange(
        &mut conn,
        "<body xmlns='http://jabber.org/protocol/httpbind' type='terminate' condition='remote-stream-error'><stream:error xmlns:stream='http://etherx.jabber.org/streams'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error></body>",
    );
    let log = log.lock().unwrap().clone();
    assert_eq!(
        log[log.len() - 2..],
        [
            (Status::ConnFail, Some(String::from("conflict"))),
            (Status::Disconnected, Some(String::from("conflict"))),
        ]
    );
}

#[tokio::test]
async fn protocol_error_handlers_see_http_errors() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    let codes = Arc::new(Mutex::new(Vec::new()));
    let recorded = codes.clone();
    conn.add_protocol_error_handler(ProtocolKind::Http, 404, move |_, code| {
        recorded.lock().unwrap().push(code);
    });
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    let (id, _) = posts(&mut conn).remove(0);
    conn.handle_http_response(id, 404, None);

    assert_eq!(*codes.lock().unwrap(), [404]);
    assert_eq!(
        statuses(&log),
        [Status::Connecting, Status::Disconnecting, Status::Disconnected]
    );
}

#[tokio::test]
async fn plugins_hear_statuses_before_the_callback() {
    struct Tracer {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Tracer {
        fn init(&mut self, conn: &mut Connection) {
            conn.namespaces_mut().add("TRACER", "urn:example:tracer");
        }

        fn status_changed(&mut self, status: Status, _: Option<&str>) {
            self.events.lock().unwrap().push(format!("plugin {}", status));
        }
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut conn = bosh_connection();
    conn.register_plugin(
        "tracer",
        Tracer {
            events: events.clone(),
        },
    );
    assert_eq!(conn.namespaces().get("TRACER"), Some("urn:example:tracer"));
    assert!(conn.plugin::<Tracer>("tracer").is_some());
    assert!(conn.plugin::<Tracer>("other").is_none());

    let recorded = events.clone();
    conn.connect(
        "romeo@montague.lit",
        "secret",
        move |_, status, _, _| recorded.lock().unwrap().push(format!("callback {}", status)),
        ConnectParams::default(),
    )
    .unwrap();
    assert_eq!(*events.lock().unwrap(), ["plugin 1", "callback 1"]);
}

#[tokio::test]
async fn status_changes_from_a_callback_are_delivered_in_order() {
    let mut conn = bosh_connection();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = events.clone();
    let callback = move |conn: &mut Connection, status: Status, _: Option<&str>, _: Option<&Element>| {
        recorded.lock().unwrap().push(format!("enter {:?}", status));
        if status == Status::Connected {
            conn.disconnect(None);
        }
        recorded.lock().unwrap().push(format!("leave {:?}", status));
    };
    login(&mut conn, callback);

    let events = events.lock().unwrap().clone();
    let tail = &events[events.len() - 4..];
    assert_eq!(
        tail,
        [
            "enter Connected",
            "leave Connected",
            "enter Disconnecting",
            "leave Disconnecting"
        ]
    );
    assert_eq!(conn.status(), Status::Disconnecting);
}

#[tokio::test]
async fn attach_resumes_an_external_session() {
    let mut conn = bosh_connection();
    let (log, callback) = recorder();
    conn.attach(
        "romeo@montague.lit/orchard",
        "s9",
        1000,
        callback,
        AttachParams::default(),
    )
    .unwrap();
    assert_eq!(statuses(&log), [Status::Attached]);
    assert!(conn.is_authenticated());
    assert!(conn.is_connected());
    assert!(!conn.is_restored());

    conn.send(Element::builder("presence", ns::CLIENT).build());
    conn.flush();
    let (_, body) = posts(&mut conn).remove(0);
    assert!(body.contains("rid='1000'"));
    assert!(body.contains("sid='s9'"));
}

#[tokio::test]
async fn restore_picks_up_the_cached_session() {
    let store = Arc::new(MemoryStore::default());
    let keepalive = || ConnectionOptions {
        keepalive: true,
        ..options(store.clone())
    };

    let mut first = Connection::new("https://montague.lit/http-bind", keepalive());
    let (_, callback) = recorder();
    login(&mut first, callback);
    // The session is cached whenever a body is built once authenticated.
    first.flush();
    let record = session_store::load(&*store).unwrap().unwrap();
    assert_eq!(record.jid, "romeo@montague.lit/orchard");
    assert_eq!(record.sid, "s1");

    let mut second = Connection::new("https://montague.lit/http-bind", keepalive());
    let (_, callback) = recorder();
    assert!(matches!(
        second.restore(Some("juliet@capulet.lit"), callback, AttachParams::default()),
        Err(Error::NoSession)
    ));
    assert!(!second.is_restored());

    let (log, callback) = recorder();
    second
        .restore(Some("romeo@montague.lit"), callback, AttachParams::default())
        .unwrap();
    assert_eq!(statuses(&log), [Status::Attached]);
    assert!(second.is_restored());
    assert_eq!(second.jid(), "romeo@montague.lit/orchard");

    second.send(Element::builder("presence", ns::CLIENT).build());
    second.flush();
    let (_, body) = posts(&mut second).remove(0);
    assert!(body.contains(&format!("rid='{}'", record.rid)));
}

#[tokio::test]
async fn websocket_sessions_cannot_be_attached() {
    let mut conn = Connection::new(
        "wss://montague.lit/xmpp-websocket",
        options(Arc::new(MemoryStore::default())),
    );
    let (log, callback) = recorder();
    let result = conn.attach("romeo@montague.lit", "s1", 1, callback, AttachParams::default());
    assert!(matches!(result, Err(Error::Unsupported(_))));
    assert!(statuses(&log).is_empty());
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn reset_then_connect_starts_a_fresh_session() {
    let mut conn = bosh_connection();
    let (_, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    let (id, _) = posts(&mut conn).remove(0);

    conn.reset();
    assert!(conn
        .take_transmissions()
        .contains(&Transmission::Abort { id }));
    assert!(!conn.is_connected());

    let (log, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    let posted = posts(&mut conn);
    assert_eq!(posted.len(), 1);
    assert!(!posted[0].1.contains("sid="));
    assert_eq!(statuses(&log), [Status::Connecting]);
}

#[tokio::test]
async fn observer_sees_stripped_stanzas() {
    #[derive(Default)]
    struct Sink {
        input: Arc<Mutex<Vec<String>>>,
        output: Arc<Mutex<Vec<String>>>,
    }

    impl Observer for Sink {
        fn xml_input(&mut self, elem: &Element) {
            self.input.lock().unwrap().push(elem.name().to_owned());
        }

        fn raw_output(&mut self, data: &str) {
            self.output.lock().unwrap().push(data.to_owned());
        }
    }

    let sink = Sink::default();
    let (input, output) = (sink.input.clone(), sink.output.clone());
    let mut conn = Connection::new(
        "https://montague.lit/http-bind",
        ConnectionOptions {
            strip_wrapper: true,
            ..options(Arc::new(MemoryStore::default()))
        },
    );
    conn.set_observer(sink);
    let (_, callback) = recorder();
    conn.connect("romeo@montague.lit", "secret", callback, ConnectParams::default())
        .unwrap();
    exchange(&mut conn, SASL_FEATURES);
    assert_eq!(*input.lock().unwrap(), ["features"]);
    assert_eq!(output.lock().unwrap().len(), 1);
}

#[test]
fn unique_ids_carry_the_suffix() {
    let conn = bosh_connection();
    let first = conn.unique_id(Some("sendIQ"));
    let second = conn.unique_id(Some("sendIQ"));
    assert!(first.ends_with(":sendIQ"));
    assert_ne!(first, second);
    assert!(!conn.unique_id(None).contains(':'));
}
