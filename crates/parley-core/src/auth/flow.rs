//! Authentication stanza flow.
//!
//! ```text
//! authenticate ─┬─> <auth/> ──> challenge* ──> success ──> restart
//!               │                   │                        │
//!               │                failure                 features
//!               │                   ↓                        ↓
//!               │                AuthFail              bind (+ session)
//!               │                                            ↓
//!               └─> jabber:iq:auth get ──> set ──────────> Connected
//! ```
//!
//! Every step is a system handler, so it runs before the session is
//! authenticated. SASL handlers stay installed until success or failure;
//! IQ steps are one-shot.

use parley_proto::{Element, jid, ns, stanza};
use tracing::{debug, info, warn};

use super::{AuthContext, Credentials, Mechanism, MechanismFlags, Selection, select};
use crate::{
    connection::Connection,
    env::Environment,
    error::HandlerError,
    handler::Matcher,
    status::{Status, condition},
};

const BIND_ID: &str = "_bind_auth_2";
const SESSION_ID: &str = "_session_auth_2";
const LEGACY_QUERY_ID: &str = "_auth_1";
const LEGACY_SET_ID: &str = "_auth_2";

impl<E: Environment> Connection<E> {
    /// Pick a mechanism among those the server advertised and start it.
    pub(crate) fn authenticate(&mut self, advertised: MechanismFlags) {
        let has_node = jid::node(&self.jid).is_some();
        let env = &self.env;
        let selection = select(has_node, self.config.mechanisms, advertised, || {
            let mut nonce = [0u8; 16];
            env.random_bytes(&mut nonce);
            hex::encode(nonce)
        });

        match selection {
            Ok(Selection::Sasl(mechanism)) => self.start_sasl(mechanism),
            Ok(Selection::Legacy) => self.start_legacy(),
            Err(err) => {
                warn!(?advertised, condition = err.condition(), "no usable authentication");
                self.change_status(Status::ConnFail, Some(err.condition()));
                self.disconnect(Some(err.condition()));
            },
        }
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials { jid: &self.jid, password: self.password.as_deref().unwrap_or_default() }
    }

    fn start_sasl(&mut self, mut mechanism: Mechanism) {
        self.change_status(Status::Authenticating, None);
        info!(mechanism = mechanism.name(), "starting SASL authentication");

        let initial = mechanism.initial_response(&self.credentials());
        let mut auth = Element::new("auth")
            .with_attr("xmlns", ns::SASL)
            .with_attr("mechanism", mechanism.name());
        if let Some(text) = initial {
            auth.push_text(text);
        }

        let sasl = |name: &str| Matcher::new().name(name).namespace(ns::SASL);
        let handlers = vec![
            self.add_system_handler(sasl("success"), |conn, el| conn.on_sasl_success(el)),
            self.add_system_handler(sasl("failure"), |conn, el| conn.on_sasl_failure(el)),
            self.add_system_handler(sasl("challenge"), |conn, el| conn.on_sasl_challenge(el)),
        ];
        self.auth = Some(AuthContext { mechanism, handlers });
        self.send(auth);
    }

    fn on_sasl_challenge(&mut self, challenge: &Element) -> Result<bool, HandlerError> {
        let Some(mut context) = self.auth.take() else {
            return Ok(false);
        };

        match context.mechanism.respond(&challenge.text(), &self.credentials()) {
            Ok(text) => {
                self.auth = Some(context);
                let mut response = Element::new("response").with_attr("xmlns", ns::SASL);
                if !text.is_empty() {
                    response.push_text(text);
                }
                self.send(response);
                Ok(true)
            },
            Err(err) => {
                self.auth = Some(context);
                self.auth_failed(None);
                Err(err.into())
            },
        }
    }

    fn on_sasl_success(&mut self, success: &Element) -> Result<bool, HandlerError> {
        let Some(context) = self.auth.take() else {
            return Ok(false);
        };

        if let Err(err) = context.mechanism.verify_success(&success.text()) {
            self.auth = Some(context);
            self.auth_failed(None);
            return Err(err.into());
        }
        info!(mechanism = context.mechanism.name(), "SASL authentication succeeded");

        for id in context.handlers {
            self.delete_handler(id);
        }
        self.add_system_handler(Matcher::new().name("features"), |conn, features| {
            conn.on_restart_features(features)
        });
        self.send_restart();
        Ok(false)
    }

    fn on_sasl_failure(&mut self, failure: &Element) -> Result<bool, HandlerError> {
        let reason = failure.children().next().map(|child| child.local_name().to_string());
        warn!(condition = reason.as_deref().unwrap_or(""), "SASL authentication failed");
        self.auth_failed(reason.as_deref());
        Ok(false)
    }

    /// Drop the SASL context and its handlers and report `AuthFail`
    fn auth_failed(&mut self, reason: Option<&str>) {
        if let Some(context) = self.auth.take() {
            for id in context.handlers {
                self.delete_handler(id);
            }
        }
        self.change_status(Status::AuthFail, reason);
    }

    /// Stream features after the post-SASL restart
    fn on_restart_features(&mut self, features: &Element) -> Result<bool, HandlerError> {
        self.features = Some(features.clone());
        self.do_bind = features.child("bind").is_some();
        self.do_session = features.child("session").is_some();

        if !self.do_bind {
            warn!("server offered no resource binding");
            self.auth_failed(None);
            return Ok(false);
        }

        self.add_system_handler(Matcher::new().name("iq").id(BIND_ID), |conn, reply| {
            conn.on_bind_result(reply)
        });

        let mut bind = Element::new("bind").with_attr("xmlns", ns::BIND);
        if let Some(resource) = jid::resource(&self.jid) {
            bind.push_child(Element::new("resource").with_text(resource));
        }
        self.send(stanza::iq("set", Some(BIND_ID)).with_child(bind));
        Ok(false)
    }

    fn on_bind_result(&mut self, reply: &Element) -> Result<bool, HandlerError> {
        if reply.attr("type") == Some("error") {
            let reason = reply.has_descendant("conflict").then_some(condition::CONFLICT);
            warn!(condition = reason.unwrap_or(""), "resource binding failed");
            self.auth_failed(reason);
            return Ok(false);
        }

        let bound = reply
            .descendants("bind")
            .first()
            .and_then(|bind| bind.child("jid"))
            .map(Element::text)
            .filter(|bound| !bound.is_empty());
        let Some(bound) = bound else {
            warn!("bind result carried no JID");
            self.auth_failed(None);
            return Ok(false);
        };
        debug!(jid = bound.as_str(), "resource bound");
        self.jid = bound;

        if self.do_session {
            self.add_system_handler(Matcher::new().name("iq").id(SESSION_ID), |conn, reply| {
                conn.on_session_result(reply)
            });
            let session = Element::new("session").with_attr("xmlns", ns::SESSION);
            self.send(stanza::iq("set", Some(SESSION_ID)).with_child(session));
        } else {
            self.authenticated = true;
            self.change_status(Status::Connected, None);
        }
        Ok(false)
    }

    fn on_session_result(&mut self, reply: &Element) -> Result<bool, HandlerError> {
        match reply.attr("type") {
            Some("result") => {
                self.authenticated = true;
                self.change_status(Status::Connected, None);
            },
            Some("error") => {
                warn!("session establishment failed");
                self.auth_failed(None);
            },
            other => return Err(HandlerError::UnexpectedIqType(other.map(str::to_owned))),
        }
        Ok(false)
    }

    fn start_legacy(&mut self) {
        self.change_status(Status::Authenticating, None);
        info!("starting legacy authentication");

        self.add_system_handler(Matcher::new().name("iq").id(LEGACY_QUERY_ID), |conn, reply| {
            conn.on_legacy_fields(reply)
        });

        let username = jid::node(&self.jid).unwrap_or_default().to_string();
        let query = Element::new("query")
            .with_attr("xmlns", ns::AUTH)
            .with_child(Element::new("username").with_text(username));
        let iq = stanza::iq("get", Some(LEGACY_QUERY_ID))
            .with_attr("to", self.domain.as_str())
            .with_child(query);
        self.send(iq);
    }

    fn on_legacy_fields(&mut self, _fields: &Element) -> Result<bool, HandlerError> {
        if jid::resource(&self.jid).is_none() {
            self.jid = format!("{}/{}", jid::bare(&self.jid), self.config.legacy_resource);
        }
        let username = jid::node(&self.jid).unwrap_or_default().to_string();
        let password = self.password.clone().unwrap_or_default();
        let resource = jid::resource(&self.jid).unwrap_or_default().to_string();

        self.add_system_handler(Matcher::new().name("iq").id(LEGACY_SET_ID), |conn, reply| {
            conn.on_legacy_result(reply)
        });

        let query = Element::new("query")
            .with_attr("xmlns", ns::AUTH)
            .with_child(Element::new("username").with_text(username))
            .with_child(Element::new("password").with_text(password))
            .with_child(Element::new("resource").with_text(resource));
        self.send(stanza::iq("set", Some(LEGACY_SET_ID)).with_child(query));
        Ok(false)
    }

    fn on_legacy_result(&mut self, reply: &Element) -> Result<bool, HandlerError> {
        match reply.attr("type") {
            Some("result") => {
                self.authenticated = true;
                self.change_status(Status::Connected, None);
            },
            Some("error") => {
                warn!("legacy authentication failed");
                self.change_status(Status::AuthFail, None);
                self.disconnect(None);
            },
            other => return Err(HandlerError::UnexpectedIqType(other.map(str::to_owned))),
        }
        Ok(false)
    }
}
