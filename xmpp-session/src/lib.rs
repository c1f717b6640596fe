//! Sans-IO [XMPP](https://xmpp.org/) client session engine, running over
//! [BOSH](https://xmpp.org/extensions/xep-0206.html) or
//! [WebSocket](https://www.rfc-editor.org/rfc/rfc7395), with a
//! [tokio](https://tokio.rs/) driver.
//!
//! # Getting started
//!
//! A [`Connection`] negotiates the session: SASL or legacy authentication,
//! resource binding, and session establishment, then dispatches incoming
//! stanzas to the handlers registered on it. It never performs I/O itself,
//! instead queueing [`Transmission`]s and expecting the results back through
//! its `handle_*` methods. The [`Driver`] does exactly that on tokio.
//!
//! Progress is reported to the callback given to [`Connection::connect`],
//! as a [`Status`] with an optional condition from [`condition`].
//!
//! # Features
//!
//! - `websocket` (default): WebSocket I/O in the [`Driver`].

#![deny(unsafe_code, missing_docs, bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod connection;
pub use connection::{
    AttachParams, BoshTimeouts, ConnectCallback, ConnectParams, Connection, ConnectionOptions,
};
mod driver;
pub use driver::Driver;

pub mod handler;
pub use handler::{
    FilterOptions, HandlerHost, HandlerRef, HandlerResult, Registry, StanzaFilter, TimedRef,
};

pub mod ns;
pub use ns::Namespaces;

mod observer;
pub use observer::{Observer, TraceObserver};

mod plugin;
pub use plugin::{AsAny, Plugin};

pub mod session_store;
pub use session_store::{FileStore, MemoryStore, SessionRecord, SessionStore};

mod status;
pub use status::{condition, Status};

mod transport;
pub use transport::{ProtocolKind, Transmission};

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic xmpp_session Error
pub use crate::error::{Error, HandlerError};

// Re-exports
pub use minidom;
pub use sasl;
pub use xmpp_parsers as parsers;
pub use xmpp_parsers::jid;
