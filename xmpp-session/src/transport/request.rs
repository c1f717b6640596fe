use std::time::Duration;

use tokio::time::Instant;

use super::RequestKind;
use crate::minidom::Element;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    /// Not handed to the driver yet.
    Unsent,
    /// Posted, waiting for the response.
    Pending,
    /// Answered with this HTTP status, 0 meaning no response at all.
    Done(u16),
}

/// One BOSH exchange, possibly transmitted several times.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub id: u64,
    pub rid: u64,
    pub data: String,
    pub stanzas: Vec<Element>,
    pub kind: RequestKind,
    pub sends: u32,
    /// When the current transmission leaves, delays included.
    pub date: Option<Instant>,
    /// When this request was first presumed dead.
    pub dead: Option<Instant>,
    pub state: RequestState,
}

impl Request {
    pub fn new(
        id: u64,
        rid: u64,
        data: String,
        stanzas: Vec<Element>,
        kind: RequestKind,
    ) -> Request {
        Request {
            id,
            rid,
            data,
            stanzas,
            kind,
            sends: 0,
            date: None,
            dead: None,
            state: RequestState::Unsent,
        }
    }

    /// A fresh transmission of the same payload under a new `id`.
    ///
    /// The rid and the number of sends are kept, the dead mark is not.
    pub fn retry(&self, id: u64) -> Request {
        Request {
            id,
            sends: self.sends,
            ..Request::new(
                id,
                self.rid,
                self.data.clone(),
                self.stanzas.clone(),
                self.kind,
            )
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        self.date
            .map(|date| now.saturating_duration_since(date))
            .unwrap_or_default()
    }

    pub fn time_dead(&self, now: Instant) -> Duration {
        self.dead
            .map(|dead| now.saturating_duration_since(dead))
            .unwrap_or_default()
    }
}
