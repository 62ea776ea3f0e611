//! Stanza dispatcher.
//!
//! Every immediate child of an inbound `<body/>` is offered, in document
//! order, to each active stanza handler. Per child:
//!
//! - handlers registered during the pass stay invisible until the next body
//! - a handler deleted during the pass still finishes the current child
//! - `Ok(false)` drops the handler once the child has been offered to all
//!   handlers
//! - errors are logged and the handler is kept; later handlers still run
//!
//! If a callback tears the session down (clearing the registry), the rest of
//! the body is abandoned.

use parley_proto::{Element, body as bosh};
use tracing::{debug, error};

use crate::{connection::Connection, env::Environment, status::Status};

impl<E: Environment> Connection<E> {
    /// Handle the response to a data request.
    pub(crate) fn data_recv(&mut self, raw: &[u8]) {
        let Some(body) = self.parse_body(raw) else {
            return;
        };

        self.handlers.reconcile();

        if self.disconnecting && self.requests.is_empty() {
            debug!("server acknowledged terminate");
            self.do_disconnect();
            return;
        }

        if let Some(reason) = bosh::terminate_condition(&body) {
            if self.disconnecting {
                return;
            }
            error!(condition = reason.as_str(), "session terminated by server");
            self.change_status(Status::ConnFail, Some(reason.as_str()));
            self.do_disconnect();
            return;
        }

        self.dispatch(&body);
    }

    /// Offer each child of `body` to the active handlers.
    pub(crate) fn dispatch(&mut self, body: &Element) {
        let generation = self.handlers.generation();

        for child in body.children() {
            let mut survivors = Vec::new();

            for id in self.handlers.active() {
                if !self.handlers.is_eligible(id, child, self.authenticated) {
                    survivors.push(id);
                    continue;
                }
                let Some(mut callback) = self.handlers.take_callback(id) else {
                    survivors.push(id);
                    continue;
                };

                let keep = match callback(self, child) {
                    Ok(keep) => keep,
                    Err(err) => {
                        error!(handler = %id, stanza = child.name(), %err, "stanza handler failed");
                        true
                    },
                };

                if self.handlers.generation() != generation {
                    debug!("handlers cleared during dispatch, dropping rest of body");
                    return;
                }
                self.handlers.restore_callback(id, callback);
                if keep {
                    survivors.push(id);
                }
            }

            self.handlers.retain_active(survivors);
        }
    }
}
