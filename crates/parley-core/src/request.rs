//! Request lifecycle manager.
//!
//! Every outbound `<body/>` becomes a [`Request`] in a small ordered window.
//! Only the first two slots are ever on the wire, and the second only while
//! its `rid` is within `window` of the first. The manager decides when a
//! request is (re)sent and emits [`ConnectionAction`]s for the driver; it
//! never sees the transport.
//!
//! # Staleness
//!
//! When a slot is processed, the attempt on the wire is abandoned and the
//! request re-created (same body, same `rid`, same send count, fresh id) if:
//!
//! 1. **primary timeout**: more than `floor(1.1 * wait)` seconds since the
//!    last send
//! 2. **secondary timeout**: marked dead for more than `floor(0.1 * wait)`
//!    seconds
//! 3. **server error**: the attempt completed with status `< 1` or `>= 500`
//!
//! # Backoff
//!
//! The first two sends go out immediately. Later sends wait
//! `min(floor(1.1 * wait), sends^3)` seconds, which the driver honours via
//! [`Transmit::delay`]. A request about to be processed with more than
//! `max_retries` sends means the session is dead.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    ops::Sub,
    time::Duration,
};

use tracing::{debug, error, warn};

use crate::{
    config::ConnectionConfig,
    connection::{ConnectionAction, Transmit},
    env::elapsed,
};

/// Local request id, distinct from the BOSH `rid`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw counter value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Which completion path handles the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Session creation (and the empty polls that wait for features)
    Connect,
    /// Everything else
    Data,
}

/// Where an attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Created, not yet handed to the driver
    Unsent,
    /// Transmit emitted, no completion yet
    InFlight,
    /// Completed with this HTTP status (0 for transport failures)
    Completed(u16),
}

/// One body in the request window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<I> {
    id: RequestId,
    rid: u64,
    body: String,
    kind: RequestKind,
    sends: u32,
    sent_at: Option<I>,
    dead_since: Option<I>,
    state: RequestState,
}

impl<I> Request<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn new(id: RequestId, rid: u64, body: String, kind: RequestKind, sends: u32) -> Self {
        Self {
            id,
            rid,
            body,
            kind,
            sends,
            sent_at: None,
            dead_since: None,
            state: RequestState::Unsent,
        }
    }

    /// Local id of the current attempt
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// BOSH request id
    #[must_use]
    pub fn rid(&self) -> u64 {
        self.rid
    }

    /// Serialized `<body/>`
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Completion path
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Number of times this body has been sent
    #[must_use]
    pub fn sends(&self) -> u32 {
        self.sends
    }

    /// Current attempt state
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Time since the last send (zero before the first send or while a
    /// delayed send is pending)
    #[must_use]
    pub fn age(&self, now: I) -> Duration {
        self.sent_at.map_or(Duration::ZERO, |sent_at| elapsed(now, sent_at))
    }

    /// Time since the request was marked dead
    #[must_use]
    pub fn time_dead(&self, now: I) -> Duration {
        self.dead_since.map_or(Duration::ZERO, |dead_since| elapsed(now, dead_since))
    }

    /// True once the request was marked dead
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead_since.is_some()
    }
}

/// Timeouts and limits of the request window
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    /// Current `wait` in seconds
    pub wait: u32,
    /// Current rid window
    pub window: u32,
    /// Sends per request before giving up
    pub max_retries: u32,
    /// Consecutive failures tolerated before a forced disconnect
    pub max_consecutive_errors: u32,
    /// Primary timeout multiplier
    pub timeout_multiplier: f64,
    /// Secondary timeout multiplier
    pub secondary_timeout_multiplier: f64,
}

impl Timing {
    /// Initial timing from a connection configuration
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            wait: config.wait,
            window: config.window,
            max_retries: config.max_retries,
            max_consecutive_errors: config.max_consecutive_errors,
            timeout_multiplier: config.timeout_multiplier,
            secondary_timeout_multiplier: config.secondary_timeout_multiplier,
        }
    }

    /// `floor(timeout_multiplier * wait)` seconds
    #[must_use]
    pub fn primary_timeout(&self) -> Duration {
        scaled_seconds(self.timeout_multiplier, self.wait)
    }

    /// `floor(secondary_timeout_multiplier * wait)` seconds
    #[must_use]
    pub fn secondary_timeout(&self) -> Duration {
        scaled_seconds(self.secondary_timeout_multiplier, self.wait)
    }

    /// Delay before a body that has already been sent `sends` times goes
    /// out again
    #[must_use]
    pub fn backoff(&self, sends: u32) -> Duration {
        if sends <= 1 {
            return Duration::ZERO;
        }
        let cap = self.primary_timeout().as_secs();
        Duration::from_secs(cap.min(u64::from(sends).saturating_pow(3)))
    }
}

fn scaled_seconds(multiplier: f64, wait: u32) -> Duration {
    let seconds = (multiplier * f64::from(wait)).floor();
    if seconds <= 0.0 { Duration::ZERO } else { Duration::from_secs(seconds as u64) }
}

/// Result of processing a window slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum ProcessOutcome {
    /// Nothing further to do
    Continue,
    /// A request exceeded `max_retries`; the session must be torn down
    RetriesExhausted,
}

/// Ordered window of outstanding requests.
#[derive(Debug)]
pub struct RequestManager<I> {
    requests: Vec<Request<I>>,
    timing: Timing,
    next_id: u64,
    aborted: HashSet<RequestId>,
    errors: u32,
    outbox: VecDeque<ConnectionAction>,
}

impl<I> RequestManager<I>
where
    I: Copy + Ord + fmt::Debug + Sub<Output = Duration> + std::ops::Add<Duration, Output = I>,
{
    /// Empty window
    #[must_use]
    pub fn new(timing: Timing) -> Self {
        Self {
            requests: Vec::new(),
            timing,
            next_id: 0,
            aborted: HashSet::new(),
            errors: 0,
            outbox: VecDeque::new(),
        }
    }

    /// Current timing
    #[must_use]
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Mutable timing (server-adopted `wait`/`window`)
    pub fn timing_mut(&mut self) -> &mut Timing {
        &mut self.timing
    }

    /// Number of requests in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Request at a slot
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Request<I>> {
        self.requests.get(index)
    }

    /// Requests in window order
    pub fn iter(&self) -> impl Iterator<Item = &Request<I>> {
        self.requests.iter()
    }

    /// Slot of the request with this attempt id
    #[must_use]
    pub fn position(&self, id: RequestId) -> Option<usize> {
        self.requests.iter().position(|request| request.id == id)
    }

    /// Consecutive failed completions
    #[must_use]
    pub fn errors(&self) -> u32 {
        self.errors
    }

    fn allocate_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Append a new body to the window
    pub fn push(&mut self, rid: u64, body: String, kind: RequestKind) -> RequestId {
        let id = self.allocate_id();
        debug!(request = %id, rid, ?kind, "queued request");
        self.requests.push(Request::new(id, rid, body, kind, 0));
        id
    }

    /// Process both window slots, the second only within `window`
    pub fn throttle(&mut self, now: I) -> ProcessOutcome {
        if self.requests.is_empty() {
            return ProcessOutcome::Continue;
        }

        if self.process(0, now) == ProcessOutcome::RetriesExhausted {
            return ProcessOutcome::RetriesExhausted;
        }

        let window = u64::from(self.timing.window);
        if self.requests.len() > 1 && self.requests[0].rid.abs_diff(self.requests[1].rid) < window {
            return self.process(1, now);
        }
        ProcessOutcome::Continue
    }

    /// Mark a slot dead (if not already) and process it
    pub fn restart(&mut self, index: usize, now: I) -> ProcessOutcome {
        let Some(request) = self.requests.get_mut(index) else {
            return ProcessOutcome::Continue;
        };
        if request.dead_since.is_none() {
            request.dead_since = Some(now);
        }
        self.process(index, now)
    }

    /// Re-create a stale attempt and send anything unsent
    pub fn process(&mut self, index: usize, now: I) -> ProcessOutcome {
        let Some(request) = self.requests.get(index) else {
            return ProcessOutcome::Continue;
        };

        if request.sends > self.timing.max_retries {
            warn!(request = %request.id, sends = request.sends, "request exceeded retry limit");
            return ProcessOutcome::RetriesExhausted;
        }

        let primary = request.age(now) > self.timing.primary_timeout();
        let secondary =
            request.is_dead() && request.time_dead(now) > self.timing.secondary_timeout();
        let server_error =
            matches!(request.state, RequestState::Completed(status) if status < 1 || status >= 500);

        if primary || secondary || server_error {
            if secondary {
                error!(request = %request.id, "request timed out (secondary), restarting");
            } else if primary {
                warn!(request = %request.id, "request timed out, restarting");
            }

            let fresh_id = self.allocate_id();
            let stale = &self.requests[index];
            if stale.state == RequestState::InFlight {
                self.aborted.insert(stale.id);
                self.outbox.push_back(ConnectionAction::Abort { request: stale.id });
            }
            let fresh =
                Request::new(fresh_id, stale.rid, stale.body.clone(), stale.kind, stale.sends);
            self.requests[index] = fresh;
        }

        let request = &mut self.requests[index];
        if request.state == RequestState::Unsent {
            let delay = self.timing.backoff(request.sends);
            request.sent_at = Some(now + delay);
            request.state = RequestState::InFlight;
            request.sends += 1;
            debug!(
                request = %request.id,
                rid = request.rid,
                sends = request.sends,
                ?delay,
                "posting"
            );
            self.outbox.push_back(ConnectionAction::Transmit(Transmit {
                request: request.id,
                rid: request.rid,
                body: request.body.clone(),
                delay,
            }));
        }
        ProcessOutcome::Continue
    }

    /// Record a completion status on a slot
    pub fn complete(&mut self, index: usize, status: u16) {
        if let Some(request) = self.requests.get_mut(index) {
            request.state = RequestState::Completed(status);
        }
    }

    /// Remove a slot from the window
    pub fn remove(&mut self, index: usize) -> Option<Request<I>> {
        (index < self.requests.len()).then(|| self.requests.remove(index))
    }

    /// Abort every request and empty the window; returns how many were on
    /// the wire.
    ///
    /// Aborted markers are dropped too: with the window empty, any late
    /// completion is unknown and ignored.
    pub fn abort_all(&mut self) -> usize {
        self.aborted.clear();
        let mut in_flight = 0;
        for request in self.requests.drain(..) {
            if request.state == RequestState::InFlight {
                in_flight += 1;
                self.outbox.push_back(ConnectionAction::Abort { request: request.id });
            }
        }
        in_flight
    }

    /// Consume the aborted marker of an attempt; true if it was aborted
    pub fn take_aborted(&mut self, id: RequestId) -> bool {
        self.aborted.remove(&id)
    }

    /// Attempts aborted whose completion has neither arrived nor been
    /// confirmed cancelled
    #[must_use]
    pub fn aborted_len(&self) -> usize {
        self.aborted.len()
    }

    /// Count a failed completion; true once more than
    /// `max_consecutive_errors` failures happened in a row
    pub fn record_error(&mut self, status: u16) -> bool {
        self.errors += 1;
        warn!(status, errors = self.errors, "request errored");
        self.errors > self.timing.max_consecutive_errors
    }

    /// Reset the consecutive failure counter
    pub fn reset_errors(&mut self) {
        self.errors = 0;
    }

    /// Next action for the driver
    pub fn poll_action(&mut self) -> Option<ConnectionAction> {
        self.outbox.pop_front()
    }
}
