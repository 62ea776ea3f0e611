//! Idle scheduler.
//!
//! A cooperative tick every `idle_interval` (100ms by default), re-armed
//! only while connected and replaced whenever data is queued. Each tick:
//!
//! 1. reconciles staged timed-handler additions and removals
//! 2. fires due timed handlers (system handlers always, user handlers once
//!    authenticated)
//! 3. queues an empty poll when the session is authenticated and otherwise
//!    silent
//! 4. batches everything queued into one body, unless two requests are
//!    already in flight or the connection is paused
//! 5. re-checks the first request for timeouts

use parley_proto::{Element, body as bosh};
use tracing::{error, trace, warn};

use crate::{connection::Connection, env::Environment, request::RequestKind};

/// Outbound item waiting for the next body
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outbound {
    /// Stanza appended as a child of the body
    Stanza(Element),
    /// Stream restart attribute set
    Restart,
    /// Empty poll
    Poll,
}

impl<E: Environment> Connection<E> {
    /// Next instant at which [`handle_timeout`](Self::handle_timeout) has
    /// work to do
    #[must_use]
    pub fn poll_timeout(&self) -> Option<E::Instant> {
        self.idle_deadline
    }

    /// Run the idle tick if its deadline has passed.
    pub fn handle_timeout(&mut self, now: E::Instant) {
        self.update_clock(now);
        match self.idle_deadline {
            Some(deadline) if deadline <= self.clock => {
                self.idle_deadline = None;
                self.on_idle();
            },
            _ => {},
        }
    }

    pub(crate) fn on_idle(&mut self) {
        let now = self.clock;
        trace!("idle tick");

        self.fire_timed_handlers();

        if self.authenticated
            && self.requests.is_empty()
            && self.pending.is_empty()
            && !self.disconnecting
        {
            self.pending.push(Outbound::Poll);
        }

        if self.requests.len() < 2 && !self.pending.is_empty() && !self.paused {
            let rid = self.next_rid();
            let mut body = bosh::body(rid, self.sid.as_deref());
            for item in std::mem::take(&mut self.pending) {
                match item {
                    Outbound::Stanza(stanza) => body.push_child(stanza),
                    Outbound::Restart => {
                        bosh::mark_restart(&mut body, &self.domain, &self.config.lang);
                    },
                    Outbound::Poll => {},
                }
            }
            self.push_request(rid, &body, RequestKind::Data);
            self.throttle();
        }

        let timing = self.requests.timing();
        let stale = self.requests.get(0).map(|first| {
            let dead_too_long =
                first.is_dead() && first.time_dead(now) > timing.secondary_timeout();
            (first.rid(), dead_too_long, first.age(now) > timing.primary_timeout())
        });
        if let Some((rid, dead_too_long, too_old)) = stale {
            if dead_too_long {
                self.throttle();
            }
            if too_old {
                warn!(rid, "request exceeded the primary timeout");
                self.throttle();
            }
        }

        if self.connected {
            self.schedule_idle(self.config.idle_interval);
        }
    }

    fn fire_timed_handlers(&mut self) {
        self.timed.reconcile();
        let generation = self.timed.generation();
        let mut survivors = Vec::new();

        for id in self.timed.active() {
            let eligible = self.timed.is_eligible(id, self.authenticated);
            if !eligible || !self.timed.is_due(id, self.clock) {
                survivors.push(id);
                continue;
            }
            let Some(mut callback) = self.timed.take_callback(id, self.clock) else {
                survivors.push(id);
                continue;
            };

            let keep = match callback(self) {
                Ok(keep) => keep,
                Err(err) => {
                    error!(handler = %id, %err, "timed handler failed");
                    false
                },
            };

            if self.timed.generation() != generation {
                return;
            }
            self.timed.restore_callback(id, callback);
            if keep {
                survivors.push(id);
            }
        }

        self.timed.retain_active(survivors);
    }
}
