//! XML namespaces used by the session engine.

use std::collections::BTreeMap;

/// XEP-0124: BOSH
pub const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";
/// XEP-0206: XMPP over BOSH
pub const BOSH: &str = "urn:xmpp:xbosh";
/// RFC 6120: client stanzas
pub const CLIENT: &str = "jabber:client";
/// XEP-0078: Non-SASL Authentication
pub const AUTH: &str = "jabber:iq:auth";
/// RFC 6121: roster
pub const ROSTER: &str = "jabber:iq:roster";
/// XEP-0154: User Profile
pub const PROFILE: &str = "jabber:iq:profile";
/// XEP-0030: Service Discovery, info
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
/// XEP-0030: Service Discovery, items
pub const DISCO_ITEMS: &str = "http://jabber.org/protocol/disco#items";
/// XEP-0045: Multi-User Chat
pub const MUC: &str = "http://jabber.org/protocol/muc";
/// RFC 6120: SASL negotiation
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
/// RFC 6120: stream elements
pub const STREAM: &str = "http://etherx.jabber.org/streams";
/// RFC 7395: WebSocket framing
pub const FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
/// RFC 6120: resource binding
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
/// RFC 3921: session establishment
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
/// XEP-0092: Software Version
pub const VERSION: &str = "jabber:iq:version";
/// RFC 6120: stanza error conditions
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";
/// RFC 6120: stream error conditions
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
/// XEP-0071: XHTML-IM
pub const XHTML_IM: &str = "http://jabber.org/protocol/xhtml-im";
/// XHTML body
pub const XHTML: &str = "http://www.w3.org/1999/xhtml";

/// A per-connection namespace table, seeded with the standard namespaces and
/// extensible by plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces(BTreeMap<String, String>);

impl Default for Namespaces {
    fn default() -> Namespaces {
        let table = [
            ("HTTPBIND", HTTPBIND),
            ("BOSH", BOSH),
            ("CLIENT", CLIENT),
            ("AUTH", AUTH),
            ("ROSTER", ROSTER),
            ("PROFILE", PROFILE),
            ("DISCO_INFO", DISCO_INFO),
            ("DISCO_ITEMS", DISCO_ITEMS),
            ("MUC", MUC),
            ("SASL", SASL),
            ("STREAM", STREAM),
            ("FRAMING", FRAMING),
            ("BIND", BIND),
            ("SESSION", SESSION),
            ("VERSION", VERSION),
            ("STANZAS", STANZAS),
            ("XHTML_IM", XHTML_IM),
            ("XHTML", XHTML),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();
        Namespaces(table)
    }
}

impl Namespaces {
    /// Registers a namespace under `name`, replacing any previous value.
    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.0.insert(name.into(), value.into());
    }

    /// Looks up a namespace by its short name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}
