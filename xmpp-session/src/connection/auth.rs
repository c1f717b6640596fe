use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use sasl::common::Credentials;

use super::Connection;
use crate::handler::StanzaFilter;
use crate::jid::Jid;
use crate::minidom::Element;
use crate::ns;
use crate::status::condition;
use crate::Status;

/// Resource used by legacy authentication when the JID has none.
pub(crate) const DEFAULT_RESOURCE: &str = "xmpp-session";

const LEGACY_FIELDS_ID: &str = "_auth_1";
const LEGACY_AUTH_ID: &str = "_auth_2";

/// Decodes the text of a SASL element, `=` standing for empty data.
fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let text = text.trim();
    if text.is_empty() || text == "=" {
        Ok(Vec::new())
    } else {
        Base64.decode(text)
    }
}

impl Connection {
    fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::default()
            .with_domain(self.domain.clone())
            .with_secret(self.secret.clone());
        if let Some(ref authcid) = self.authcid {
            credentials = credentials.with_username(authcid.clone());
        }
        if let Some(ref authzid) = self.authzid {
            credentials = credentials.with_authzid(authzid.clone());
        }
        credentials
    }

    /// Authenticates with the best SASL mechanism among `offered`, falling
    /// back to legacy authentication.
    pub(super) fn authenticate(&mut self, offered: &[String]) {
        if !self.attempt_sasl_auth(offered) {
            self.attempt_legacy_auth();
        }
    }

    fn attempt_sasl_auth(&mut self, offered: &[String]) -> bool {
        let credentials = self.credentials();
        let mut selected = None;
        for descriptor in self.catalog.matching(offered) {
            if !descriptor.test(&credentials) {
                continue;
            }
            match descriptor.build(credentials.clone()) {
                Ok(mechanism) => {
                    selected = Some((mechanism, descriptor.client_first));
                    break;
                }
                Err(e) => log::warn!("Couldn't start SASL {}: {}", descriptor.name, e),
            }
        }
        let Some((mut mechanism, client_first)) = selected else {
            return false;
        };
        log::debug!("Authenticating with SASL {}", mechanism.name());

        self.sasl_handlers = vec![
            self.add_sys_handler(
                StanzaFilter::new().ns(ns::SASL).name("success"),
                |conn, elem| Ok(conn.on_sasl_success(elem)),
            ),
            self.add_sys_handler(
                StanzaFilter::new().ns(ns::SASL).name("failure"),
                |conn, elem| {
                    conn.sasl_failed(Some(elem));
                    Ok(false)
                },
            ),
            self.add_sys_handler(
                StanzaFilter::new().ns(ns::SASL).name("challenge"),
                |conn, elem| Ok(conn.on_sasl_challenge(elem)),
            ),
        ];

        let mut auth = Element::builder("auth", ns::SASL).attr("mechanism", mechanism.name());
        if client_first {
            let initial = mechanism.initial();
            auth = auth.append(if initial.is_empty() {
                String::from("=")
            } else {
                Base64.encode(initial)
            });
        }
        let auth = auth.build();
        self.mechanism = Some(mechanism);
        self.change_status(Status::Authenticating, None, None);
        self.send(auth);
        true
    }

    fn on_sasl_challenge(&mut self, challenge: &Element) -> bool {
        let response = match (decode(&challenge.text()), self.mechanism.as_mut()) {
            (Ok(data), Some(mechanism)) => mechanism.response(&data).map_err(|e| e.to_string()),
            (Err(e), _) => Err(e.to_string()),
            (Ok(_), None) => Err(String::from("no mechanism in progress")),
        };
        match response {
            Ok(response) => {
                let mut stanza = Element::builder("response", ns::SASL);
                if !response.is_empty() {
                    stanza = stanza.append(Base64.encode(response));
                }
                self.send(stanza.build());
                true
            }
            Err(e) => {
                log::warn!("SASL challenge rejected: {}", e);
                self.sasl_failed(None);
                false
            }
        }
    }

    fn on_sasl_success(&mut self, success: &Element) -> bool {
        let verified = match (decode(&success.text()), self.mechanism.as_mut()) {
            (Ok(data), Some(mechanism)) => mechanism.success(&data).map_err(|e| e.to_string()),
            (Err(e), _) => Err(e.to_string()),
            (Ok(_), None) => Ok(()),
        };
        if let Err(e) = verified {
            log::warn!("SASL success couldn't be verified: {}", e);
            self.sasl_failed(None);
            return false;
        }

        log::info!("SASL authentication succeeded.");
        if let Some(mechanism) = self.mechanism.take() {
            if let Some(keys) = mechanism.derived_keys() {
                self.scram_keys = Some(keys.clone());
            }
        }
        for handler in self.sasl_handlers.drain(..) {
            self.registry.delete(handler);
        }
        self.add_sys_handler(
            StanzaFilter::new().ns(ns::STREAM).name("features"),
            |conn, features| {
                conn.on_stream_features_after_sasl(features);
                Ok(false)
            },
        );
        self.send_restart();
        false
    }

    fn sasl_failed(&mut self, failure: Option<&Element>) {
        for handler in self.sasl_handlers.drain(..) {
            self.registry.delete(handler);
        }
        self.mechanism = None;
        let cond = failure
            .and_then(|failure| failure.children().find(|child| child.name() != "text"))
            .map(|child| child.name().to_owned());
        self.change_status(Status::AuthFail, cond, failure.cloned());
    }

    /// XEP-0078, for servers without SASL.
    fn attempt_legacy_auth(&mut self) {
        let node = Jid::new(&self.jid)
            .ok()
            .and_then(|jid| jid.node().map(|node| node.as_str().to_owned()));
        let Some(node) = node else {
            self.change_status(
                Status::ConnFail,
                Some(condition::MISSING_JID_NODE.to_owned()),
                None,
            );
            self.disconnect(Some(condition::MISSING_JID_NODE));
            return;
        };

        self.change_status(Status::Authenticating, None, None);
        self.add_sys_handler(StanzaFilter::new().id(LEGACY_FIELDS_ID), |conn, _| {
            conn.on_legacy_auth_fields();
            Ok(false)
        });
        let iq = Element::builder("iq", ns::CLIENT)
            .attr("type", "get")
            .attr("to", self.domain.as_str())
            .attr("id", LEGACY_FIELDS_ID)
            .append(
                Element::builder("query", ns::AUTH)
                    .append(Element::builder("username", ns::AUTH).append(node)),
            )
            .build();
        self.send(iq);
    }

    fn on_legacy_auth_fields(&mut self) {
        let jid = match Jid::new(&self.jid) {
            Ok(jid) => jid,
            Err(e) => {
                log::error!("Invalid JID {}: {}", self.jid, e);
                return;
            }
        };
        let node = jid
            .node()
            .map(|node| node.as_str().to_owned())
            .unwrap_or_default();
        let resource = match jid.resource() {
            Some(resource) => resource.as_str().to_owned(),
            None => {
                self.jid = format!("{}/{}", jid.to_bare(), DEFAULT_RESOURCE);
                DEFAULT_RESOURCE.to_owned()
            }
        };
        let password = self.secret.password().unwrap_or_default().to_owned();

        self.add_sys_handler(StanzaFilter::new().id(LEGACY_AUTH_ID), |conn, elem| {
            conn.on_legacy_auth_done(elem);
            Ok(false)
        });
        let iq = Element::builder("iq", ns::CLIENT)
            .attr("type", "set")
            .attr("id", LEGACY_AUTH_ID)
            .append(
                Element::builder("query", ns::AUTH)
                    .append(Element::builder("username", ns::AUTH).append(node))
                    .append(Element::builder("password", ns::AUTH).append(password))
                    .append(Element::builder("resource", ns::AUTH).append(resource)),
            )
            .build();
        self.send(iq);
    }

    fn on_legacy_auth_done(&mut self, elem: &Element) {
        match elem.attr("type") {
            Some("result") => {
                self.authenticated = true;
                self.change_status(Status::Connected, None, None);
            }
            Some("error") => {
                log::info!("Legacy authentication failed.");
                self.change_status(Status::AuthFail, None, Some(elem.clone()));
                self.disconnect(Some("authentication failed"));
            }
            _ => (),
        }
    }
}
