//! Request/response tracking for iq and presence stanzas.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::Connection;
use crate::handler::{StanzaFilter, TimedRef};
use crate::minidom::Element;

type Pending<R, E> = Arc<Mutex<Option<(R, E)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy)]
enum Tracked {
    Iq,
    Presence,
}

impl Connection {
    /// Sends an iq and calls `on_result` or `on_error` with the reply.
    ///
    /// An `id` is generated if the stanza has none. After `timeout`,
    /// `on_error` is called without a stanza and a late reply is ignored.
    /// Returns the id of the stanza.
    pub fn send_iq<R, E>(
        &mut self,
        stanza: Element,
        on_result: R,
        on_error: E,
        timeout: Option<Duration>,
    ) -> String
    where
        R: FnOnce(&mut Connection, &Element) + Send + 'static,
        E: FnOnce(&mut Connection, Option<&Element>) + Send + 'static,
    {
        self.send_tracked(Tracked::Iq, stanza, on_result, on_error, timeout)
    }

    /// Sends a presence and calls `on_result` with any presence answering
    /// it, or `on_error` with a presence of type `error`.
    ///
    /// Timeouts work as in [`send_iq`](Connection::send_iq).
    pub fn send_presence<R, E>(
        &mut self,
        stanza: Element,
        on_result: R,
        on_error: E,
        timeout: Option<Duration>,
    ) -> String
    where
        R: FnOnce(&mut Connection, &Element) + Send + 'static,
        E: FnOnce(&mut Connection, Option<&Element>) + Send + 'static,
    {
        self.send_tracked(Tracked::Presence, stanza, on_result, on_error, timeout)
    }

    fn send_tracked<R, E>(
        &mut self,
        tracked: Tracked,
        mut stanza: Element,
        on_result: R,
        on_error: E,
        timeout: Option<Duration>,
    ) -> String
    where
        R: FnOnce(&mut Connection, &Element) + Send + 'static,
        E: FnOnce(&mut Connection, Option<&Element>) + Send + 'static,
    {
        let existing = stanza.attr("id").map(str::to_owned);
        let id = match existing {
            Some(id) => id,
            None => {
                let suffix = match tracked {
                    Tracked::Iq => "sendIQ",
                    Tracked::Presence => "sendPresence",
                };
                let id = self.unique_id(Some(suffix));
                stanza.set_attr("id", id.clone());
                id
            }
        };

        let pending: Pending<R, E> = Arc::new(Mutex::new(Some((on_result, on_error))));
        let timer: Arc<Mutex<Option<TimedRef>>> = Arc::default();

        let filter = match tracked {
            Tracked::Iq => StanzaFilter::new()
                .name("iq")
                .type_("result")
                .type_("error")
                .id(id.clone()),
            Tracked::Presence => StanzaFilter::new().name("presence").id(id.clone()),
        };
        let handler = {
            let pending = pending.clone();
            let timer = timer.clone();
            self.add_handler(filter, move |conn, reply| {
                if let Some(timer) = lock(&timer).take() {
                    conn.delete_timed_handler(timer);
                }
                let callbacks = lock(&pending).take();
                match (tracked, reply.attr("type"), callbacks) {
                    (_, Some("error"), Some((_, on_error))) => on_error(conn, Some(reply)),
                    (Tracked::Iq, Some("result"), Some((on_result, _))) => on_result(conn, reply),
                    (Tracked::Presence, _, Some((on_result, _))) => on_result(conn, reply),
                    _ => (),
                }
                Ok(false)
            })
        };

        if let Some(timeout) = timeout {
            let timed = self.add_timed_handler(timeout, move |conn| {
                conn.delete_handler(handler);
                let callbacks = lock(&pending).take();
                if let Some((_, on_error)) = callbacks {
                    on_error(conn, None);
                }
                Ok(false)
            });
            *lock(&timer) = Some(timed);
        }

        self.send(stanza);
        id
    }
}
