use core::fmt;

/// Lifecycle state of a [`Connection`](crate::Connection), announced to the
/// status callback on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// A stream error was received after the session was established.
    Error = 0,
    /// The connection is being established.
    Connecting = 1,
    /// The connection attempt failed.
    ConnFail = 2,
    /// SASL or legacy authentication is in progress.
    Authenticating = 3,
    /// Authentication failed.
    AuthFail = 4,
    /// The session is authenticated and bound.
    Connected = 5,
    /// The connection has been torn down.
    Disconnected = 6,
    /// A graceful disconnect is in progress.
    Disconnecting = 7,
    /// An existing BOSH session was attached or restored.
    Attached = 8,
    /// The server asked us to reconnect elsewhere.
    Redirect = 9,
    /// The server did not acknowledge a disconnect in time.
    ConnTimeout = 10,
    /// Authentication succeeded and the application must call `bind()`.
    BindRequired = 11,
    /// Attaching to an existing session failed.
    AttachFail = 12,
}

impl fmt::Display for Status {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Error => "error",
            Status::Connecting => "connecting",
            Status::ConnFail => "connection failed",
            Status::Authenticating => "authenticating",
            Status::AuthFail => "authentication failed",
            Status::Connected => "connected",
            Status::Disconnected => "disconnected",
            Status::Disconnecting => "disconnecting",
            Status::Attached => "attached",
            Status::Redirect => "redirect",
            Status::ConnTimeout => "connection timeout",
            Status::BindRequired => "bind required",
            Status::AttachFail => "attach failed",
        };
        fmt.write_str(name)
    }
}

/// Condition strings passed along with a [`Status`].
///
/// Stream errors use their RFC 6120 element name, the ones below are synthetic.
pub mod condition {
    /// A response couldn't be parsed during connection.
    pub const BAD_FORMAT: &str = "bad-format";
    /// Another session took over this resource.
    pub const CONFLICT: &str = "conflict";
    /// Legacy authentication needs a node in the JID.
    pub const MISSING_JID_NODE: &str = "x-bad-non-anon-jid";
    /// The server offered no usable authentication mechanism.
    pub const NO_AUTH_MECH: &str = "no-auth-mech";
    /// The server terminated the session without a condition.
    pub const UNKNOWN_REASON: &str = "unknown";
    /// A response couldn't be parsed once connected.
    pub const PARSER_ERROR: &str = "strophe-parsererror";
    /// A request exhausted its retries.
    pub const GIVING_UP: &str = "giving-up";
}
