use xmpp_parsers::bind::{BindQuery, BindResponse};
use xmpp_parsers::iq::Iq;

use super::Connection;
use crate::handler::StanzaFilter;
use crate::jid::{FullJid, Jid};
use crate::minidom::Element;
use crate::ns;
use crate::status::condition;
use crate::transport::find_descendant;
use crate::Status;

const BIND_ID: &str = "_bind_auth_2";
const SESSION_ID: &str = "_session_auth_2";

impl Connection {
    pub(super) fn on_stream_features_after_sasl(&mut self, features: &Element) {
        self.features = Some(features.clone());
        for child in features.children() {
            match child.name() {
                "bind" => self.do_bind = true,
                "session" => self.do_session = true,
                _ => (),
            }
        }

        if !self.do_bind {
            self.change_status(Status::AuthFail, None, None);
        } else if self.options.explicit_resource_binding {
            self.change_status(Status::BindRequired, None, None);
        } else {
            self.bind();
        }
    }

    /// Binds the resource of the JID, or one chosen by the server.
    ///
    /// Only needed with `explicit_resource_binding`, after
    /// [`Status::BindRequired`].
    pub fn bind(&mut self) {
        if !self.do_bind {
            log::info!("bind() was called but the server doesn't offer resource binding");
            return;
        }
        self.add_sys_handler(StanzaFilter::new().id(BIND_ID), |conn, elem| {
            conn.on_resource_bind_result(elem);
            Ok(false)
        });
        let resource = Jid::new(&self.jid)
            .ok()
            .and_then(|jid| jid.resource().map(|resource| resource.as_str().to_owned()));
        let iq = Iq::from_set(BIND_ID, BindQuery::new(resource));
        self.send(iq.into());
    }

    fn on_resource_bind_result(&mut self, elem: &Element) {
        if elem.attr("type") == Some("error") {
            log::warn!("Resource binding failed.");
            let cond = find_descendant(elem, &|child| child.name() == "conflict")
                .map(|_| condition::CONFLICT.to_owned());
            self.change_status(Status::AuthFail, cond, Some(elem.clone()));
            return;
        }

        match elem.get_child("bind", ns::BIND).cloned().map(BindResponse::try_from) {
            Some(Ok(response)) => {
                self.authenticated = true;
                self.jid = FullJid::from(response).to_string();
                if self.do_session {
                    self.establish_session();
                } else {
                    self.change_status(Status::Connected, None, None);
                }
            }
            Some(Err(e)) => {
                log::warn!("Invalid resource binding response: {:?}", e);
                self.change_status(Status::AuthFail, None, Some(elem.clone()));
            }
            None => {
                log::warn!("Resource binding response without a bind element.");
                self.change_status(Status::AuthFail, None, Some(elem.clone()));
            }
        }
    }

    /// RFC 3921 session establishment, for servers still announcing it.
    fn establish_session(&mut self) {
        self.add_sys_handler(StanzaFilter::new().id(SESSION_ID), |conn, elem| {
            conn.on_session_result(elem);
            Ok(false)
        });
        let iq = Element::builder("iq", ns::CLIENT)
            .attr("type", "set")
            .attr("id", SESSION_ID)
            .append(Element::builder("session", ns::SESSION))
            .build();
        self.send(iq);
    }

    fn on_session_result(&mut self, elem: &Element) {
        match elem.attr("type") {
            Some("result") => {
                self.authenticated = true;
                self.change_status(Status::Connected, None, None);
            }
            Some("error") => {
                log::warn!("Session creation failed.");
                self.authenticated = false;
                self.change_status(Status::AuthFail, None, Some(elem.clone()));
            }
            _ => (),
        }
    }
}
