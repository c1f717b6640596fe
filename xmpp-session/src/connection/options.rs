use std::sync::Arc;
use std::time::Duration;

use crate::session_store::{MemoryStore, SessionStore};

/// Multipliers of the BOSH `wait` value after which a request is
/// considered lost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoshTimeouts {
    /// A request older than `primary * wait` seconds is re-sent.
    pub primary: f64,
    /// A request presumed dead for more than `secondary * wait` seconds is
    /// re-sent.
    pub secondary: f64,
}

impl Default for BoshTimeouts {
    fn default() -> BoshTimeouts {
        BoshTimeouts {
            primary: 1.1,
            secondary: 0.1,
        }
    }
}

/// Settings fixed when a [`Connection`](crate::Connection) is created.
pub struct ConnectionOptions {
    /// `ws` or `wss` selects the WebSocket transport for a service given
    /// without a scheme.
    pub protocol: Option<String>,
    /// Cache the BOSH session so that it can be restored later.
    pub keepalive: bool,
    /// Content-Type of BOSH requests.
    pub content_type: String,
    /// Extra headers sent with every BOSH request.
    pub custom_headers: Vec<(String, String)>,
    /// Keep cookies between BOSH requests.
    pub cookie_store: bool,
    /// Stop at [`Status::BindRequired`](crate::Status::BindRequired) and let
    /// the application call [`Connection::bind`](crate::Connection::bind).
    pub explicit_resource_binding: bool,
    /// Only use these SASL mechanisms, if set.
    pub mechanisms: Option<Vec<String>>,
    /// How many times a BOSH request is sent before giving up.
    pub max_retries: u32,
    /// Hide the `<body/>` wrapper from [`Observer::xml_input`](crate::Observer::xml_input).
    pub strip_wrapper: bool,
    /// BOSH request timeouts.
    pub timeouts: BoshTimeouts,
    /// Where BOSH sessions are cached when `keepalive` is set.
    pub session_store: Arc<dyn SessionStore>,
}

impl Default for ConnectionOptions {
    fn default() -> ConnectionOptions {
        ConnectionOptions {
            protocol: None,
            keepalive: false,
            content_type: String::from("text/xml; charset=utf-8"),
            custom_headers: Vec::new(),
            cookie_store: false,
            explicit_resource_binding: false,
            mechanisms: None,
            max_retries: 5,
            strip_wrapper: false,
            timeouts: BoshTimeouts::default(),
            session_store: MemoryStore::global(),
        }
    }
}

/// Optional arguments of [`Connection::connect`](crate::Connection::connect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// How long the BOSH server may hold a request, in seconds.
    pub wait: u32,
    /// How many requests the BOSH server may hold.
    pub hold: u32,
    /// Where the BOSH server should connect to, as `xmpp:host:port`.
    pub route: Option<String>,
    /// Authenticate as this identity instead of the JID's node.
    pub authcid: Option<String>,
    /// How long to wait for the server to acknowledge a disconnect.
    pub disconnection_timeout: Duration,
}

impl Default for ConnectParams {
    fn default() -> ConnectParams {
        ConnectParams {
            wait: 60,
            hold: 1,
            route: None,
            authcid: None,
            disconnection_timeout: Duration::from_millis(3000),
        }
    }
}

/// Optional arguments of [`Connection::attach`](crate::Connection::attach)
/// and [`Connection::restore`](crate::Connection::restore).
///
/// Unset values keep what the transport currently uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachParams {
    /// BOSH `wait`, in seconds.
    pub wait: Option<u32>,
    /// BOSH `hold`.
    pub hold: Option<u32>,
    /// BOSH `window`: how far apart outstanding rids may be.
    pub window: Option<u32>,
}
