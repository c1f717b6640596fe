use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use crate::{jid, minidom};

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Error parsing Jabber-Id
    JidParse(jid::Error),
    /// XML parser error
    Parse(minidom::Error),
    /// HTTP client error
    Http(reqwest::Error),
    /// WebSocket client error
    #[cfg(feature = "websocket")]
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Session storage I/O error
    Io(IoError),
    /// Session record (de)serialization error
    Json(serde_json::Error),
    /// No session could be restored for the requested JID
    NoSession,
    /// The active transport doesn't offer this operation
    Unsupported(&'static str),
    /// Should never happen
    InvalidState,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Parse(e) => write!(fmt, "XML parser error: {}", e),
            Error::Http(e) => write!(fmt, "HTTP error: {}", e),
            #[cfg(feature = "websocket")]
            Error::WebSocket(e) => write!(fmt, "WebSocket error: {}", e),
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::Json(e) => write!(fmt, "session record error: {}", e),
            Error::NoSession => write!(fmt, "no restorable session"),
            Error::Unsupported(what) => write!(fmt, "{} is not supported by this transport", what),
            Error::InvalidState => write!(fmt, "invalid state"),
        }
    }
}

impl StdError for Error {}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<minidom::Error> for Error {
    fn from(e: minidom::Error) -> Self {
        Error::Parse(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

#[cfg(feature = "websocket")]
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

/// Error returned by a stanza or timed handler, which removes it.
#[derive(Debug)]
pub struct HandlerError(pub String);

impl fmt::Display for HandlerError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl StdError for HandlerError {}
