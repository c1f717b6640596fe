//! Stanza and timed handlers, and the passes that run them.
//!
//! Handlers are never added to or removed from the live lists directly:
//! every change is staged and merged at the start of the next pass, so a
//! pass only ever runs the handlers that were live when it began.

use core::error::Error;
use core::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::minidom::Element;

/// What a handler returns: `Ok(true)` keeps it registered, `Ok(false)`
/// removes it, and `Err` is logged and removes it too.
pub type HandlerResult = Result<bool, Box<dyn Error + Send + Sync>>;

type StanzaCallback<C> = Box<dyn FnMut(&mut C, &Element) -> HandlerResult + Send>;
type TimedCallback<C> = Box<dyn FnMut(&mut C) -> HandlerResult + Send>;

/// Token returned when registering a stanza handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerRef(u64);

/// Token returned when registering a timed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimedRef(u64);

/// Extra matching rules of a [`StanzaFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Compare the bare form of the `from` attribute.
    pub match_bare_from_jid: bool,
    /// Ignore everything after `#` in the stanza namespaces.
    pub ignore_namespace_fragment: bool,
}

/// The predicates a stanza must satisfy for a handler to run.
///
/// Every unset field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StanzaFilter {
    /// Namespace of the stanza itself or of one of its direct children.
    pub ns: Option<String>,
    /// Element name.
    pub name: Option<String>,
    /// Accepted values of the `type` attribute.
    pub types: Vec<String>,
    /// Value of the `id` attribute.
    pub id: Option<String>,
    /// Value of the `from` attribute.
    pub from: Option<String>,
    /// Matching options.
    pub options: FilterOptions,
}

fn bare(jid: &str) -> &str {
    jid.split('/').next().unwrap_or(jid)
}

impl StanzaFilter {
    /// A filter matching every stanza.
    pub fn new() -> StanzaFilter {
        StanzaFilter::default()
    }

    /// Restricts to a namespace.
    pub fn ns<S: Into<String>>(mut self, ns: S) -> StanzaFilter {
        self.ns = Some(ns.into());
        self
    }

    /// Restricts to an element name.
    pub fn name<S: Into<String>>(mut self, name: S) -> StanzaFilter {
        self.name = Some(name.into());
        self
    }

    /// Adds an accepted `type` value.
    pub fn type_<S: Into<String>>(mut self, type_: S) -> StanzaFilter {
        self.types.push(type_.into());
        self
    }

    /// Restricts to an `id`.
    pub fn id<S: Into<String>>(mut self, id: S) -> StanzaFilter {
        self.id = Some(id.into());
        self
    }

    /// Restricts to a sender.
    pub fn from<S: Into<String>>(mut self, from: S) -> StanzaFilter {
        self.from = Some(from.into());
        self
    }

    /// Sets the matching options.
    pub fn options(mut self, options: FilterOptions) -> StanzaFilter {
        self.options = options;
        self
    }

    fn namespace_of(&self, elem: &Element) -> String {
        let ns = elem.ns();
        if self.options.ignore_namespace_fragment {
            if let Some((base, _)) = ns.split_once('#') {
                return base.to_owned();
            }
        }
        ns
    }

    fn namespace_matches(&self, elem: &Element) -> bool {
        let Some(ref ns) = self.ns else {
            return true;
        };
        elem.children().any(|child| &self.namespace_of(child) == ns)
            || &self.namespace_of(elem) == ns
    }

    /// Whether `elem` satisfies every predicate of this filter.
    pub fn matches(&self, elem: &Element) -> bool {
        if !self.namespace_matches(elem) {
            return false;
        }
        if let Some(ref name) = self.name {
            if elem.name() != name {
                return false;
            }
        }
        if !self.types.is_empty() {
            match elem.attr("type") {
                Some(type_) if self.types.iter().any(|t| t == type_) => (),
                _ => return false,
            }
        }
        if let Some(ref id) = self.id {
            if elem.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(ref from) = self.from {
            let expected = if self.options.match_bare_from_jid {
                bare(from)
            } else {
                from.as_str()
            };
            let actual = match elem.attr("from") {
                Some(actual) if self.options.match_bare_from_jid => bare(actual),
                Some(actual) => actual,
                None => return false,
            };
            if actual != expected {
                return false;
            }
        }
        true
    }
}

struct Handler<C> {
    id: u64,
    filter: StanzaFilter,
    user: bool,
    callback: StanzaCallback<C>,
}

struct TimedHandler<C> {
    id: u64,
    period: Duration,
    last: Instant,
    user: bool,
    callback: TimedCallback<C>,
}

/// All handlers of one connection, with their staging lists.
pub struct Registry<C> {
    handlers: Vec<Handler<C>>,
    add_handlers: Vec<Handler<C>>,
    remove_handlers: Vec<u64>,
    timed: Vec<TimedHandler<C>>,
    add_timed: Vec<TimedHandler<C>>,
    remove_timed: Vec<u64>,
    next_id: u64,
    generation: u64,
}

impl<C> Default for Registry<C> {
    fn default() -> Registry<C> {
        Registry {
            handlers: Vec::new(),
            add_handlers: Vec::new(),
            remove_handlers: Vec::new(),
            timed: Vec::new(),
            add_timed: Vec::new(),
            remove_timed: Vec::new(),
            next_id: 0,
            generation: 0,
        }
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Registry")
            .field("handlers", &self.handlers.len())
            .field("add_handlers", &self.add_handlers.len())
            .field("remove_handlers", &self.remove_handlers)
            .field("timed", &self.timed.len())
            .field("add_timed", &self.add_timed.len())
            .field("remove_timed", &self.remove_timed)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<C> Registry<C> {
    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Stages a stanza handler.
    ///
    /// User handlers only run once the connection is authenticated.
    pub fn add<F>(&mut self, filter: StanzaFilter, user: bool, callback: F) -> HandlerRef
    where
        F: FnMut(&mut C, &Element) -> HandlerResult + Send + 'static,
    {
        let id = self.take_id();
        self.add_handlers.push(Handler {
            id,
            filter,
            user,
            callback: Box::new(callback),
        });
        HandlerRef(id)
    }

    /// Stages the removal of a stanza handler.
    ///
    /// A handler whose addition is still staged is dropped right away.
    pub fn delete(&mut self, handler: HandlerRef) {
        self.remove_handlers.push(handler.0);
        self.add_handlers.retain(|staged| staged.id != handler.0);
    }

    /// Stages a timed handler, first due `period` from now.
    pub fn add_timed<F>(&mut self, period: Duration, user: bool, callback: F) -> TimedRef
    where
        F: FnMut(&mut C) -> HandlerResult + Send + 'static,
    {
        let id = self.take_id();
        self.add_timed.push(TimedHandler {
            id,
            period,
            last: Instant::now(),
            user,
            callback: Box::new(callback),
        });
        TimedRef(id)
    }

    /// Stages the removal of a timed handler.
    pub fn delete_timed(&mut self, handler: TimedRef) {
        self.remove_timed.push(handler.0);
    }

    /// Drops every handler, live or staged.
    ///
    /// A pass in progress stops after the current handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.add_handlers.clear();
        self.remove_handlers.clear();
        self.timed.clear();
        self.add_timed.clear();
        self.remove_timed.clear();
        self.generation += 1;
    }

    /// Changes every time the registry is cleared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live stanza handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no stanza handler is live.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Merges staged stanza handler changes, removals first.
    pub fn merge(&mut self) {
        let removed = core::mem::take(&mut self.remove_handlers);
        self.handlers.retain(|handler| !removed.contains(&handler.id));
        self.handlers.append(&mut self.add_handlers);
    }

    fn merge_timed(&mut self) {
        self.timed.append(&mut self.add_timed);
        let removed = core::mem::take(&mut self.remove_timed);
        self.timed.retain(|handler| !removed.contains(&handler.id));
    }
}

/// The owner of a [`Registry`], handed to every handler it runs.
pub trait HandlerHost: Sized {
    /// The registry of this host.
    fn registry(&mut self) -> &mut Registry<Self>;

    /// Whether user handlers may run.
    fn is_authenticated(&self) -> bool;
}

/// Runs the live stanza handlers against one stanza, in registration order,
/// and returns how many of them ran without error.
///
/// Call [`Registry::merge`] first to apply staged changes.
pub fn dispatch<C: HandlerHost>(host: &mut C, stanza: &Element) -> usize {
    let generation = host.registry().generation;
    let handlers = core::mem::take(&mut host.registry().handlers);
    let mut survivors = Vec::with_capacity(handlers.len());
    let mut matched = 0;

    for mut handler in handlers {
        if !handler.filter.matches(stanza) || (handler.user && !host.is_authenticated()) {
            survivors.push(handler);
            continue;
        }
        match (handler.callback)(host, stanza) {
            Ok(true) => {
                matched += 1;
                survivors.push(handler);
            }
            Ok(false) => matched += 1,
            Err(e) => {
                log::warn!("Removing stanza handler after error: {}", e);
            }
        }
        if host.registry().generation != generation {
            return matched;
        }
    }

    let registry = host.registry();
    survivors.append(&mut registry.handlers);
    registry.handlers = survivors;
    matched
}

/// Merges staged timed handler changes, then runs every handler that is due.
///
/// User handlers are kept but skipped until the host is authenticated.
pub fn fire_timers<C: HandlerHost>(host: &mut C, now: Instant) {
    host.registry().merge_timed();
    let generation = host.registry().generation;
    let timed = core::mem::take(&mut host.registry().timed);
    let mut survivors = Vec::with_capacity(timed.len());

    for mut handler in timed {
        if handler.user && !host.is_authenticated() {
            survivors.push(handler);
            continue;
        }
        if now.saturating_duration_since(handler.last) < handler.period {
            survivors.push(handler);
            continue;
        }
        handler.last = now;
        match (handler.callback)(host) {
            Ok(true) => survivors.push(handler),
            Ok(false) => (),
            Err(e) => {
                log::warn!("Removing timed handler after error: {}", e);
            }
        }
        if host.registry().generation != generation {
            return;
        }
    }

    let registry = host.registry();
    survivors.append(&mut registry.timed);
    registry.timed = survivors;
}
