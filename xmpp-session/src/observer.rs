use crate::minidom::Element;

/// Hooks called with the traffic of a connection.
///
/// All of them do nothing by default.
pub trait Observer: Send {
    /// A parsed element was received.
    ///
    /// With `strip_wrapper` set, this is called per child of the wrapper.
    fn xml_input(&mut self, _elem: &Element) {}

    /// An element is about to be sent.
    fn xml_output(&mut self, _elem: &Element) {}

    /// Raw text was received.
    fn raw_input(&mut self, _data: &str) {}

    /// Raw text is about to be sent.
    fn raw_output(&mut self, _data: &str) {}

    /// The next BOSH rid that can be used to resume the session.
    fn next_valid_rid(&mut self, _rid: u64) {}
}

/// Logs raw traffic at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceObserver;

impl Observer for TraceObserver {
    fn raw_input(&mut self, data: &str) {
        log::trace!("RECV {}", data);
    }

    fn raw_output(&mut self, data: &str) {
        log::trace!("SEND {}", data);
    }

    fn next_valid_rid(&mut self, rid: u64) {
        log::trace!("next valid rid: {}", rid);
    }
}
