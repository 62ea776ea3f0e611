//! BOSH connection state machine.
//!
//! A [`Connection`] emulates a long-lived XMPP stream over a sequence of
//! HTTP requests. It owns the request window, the idle scheduler, both
//! handler registries and the authentication machine.
//!
//! # Architecture: Action-Based State Machine
//!
//! The connection performs no I/O. A driver:
//!
//! - executes [`ConnectionAction`]s drained with [`Connection::poll_action`]
//!   (POST a body after a delay, or abort an in-flight POST)
//! - feeds each completed POST back with [`Connection::handle_response`]
//! - calls [`Connection::handle_timeout`] once [`Connection::poll_timeout`]
//!   has passed
//!
//! Operations that callbacks may invoke (`send`, `disconnect`, handler
//! registration) do not take a timestamp; they use the time of the last
//! driver call, which [`Connection::update_clock`] can advance explicitly.
//!
//! # Lifecycle
//!
//! ```text
//!  connect ──> Connecting ──> Authenticating ──> Connected
//!                 │                 │                │
//!                 │ terminate/      │ SASL failure,  │ disconnect
//!                 │ giving-up       │ bind error     ↓
//!                 ↓                 ↓           Disconnecting
//!              ConnFail          AuthFail            │
//!                                                    ↓
//!  attach ──> Attached                          Disconnected
//! ```
//!
//! # Completion rules
//!
//! A completion is dropped if its request was aborted. Otherwise the request
//! leaves the window when `0 < status < 500` or its sends exceed
//! `max_retries`. Successful responses are dispatched; failures (status 0,
//! 4xx, 5xx, >= 12000) count towards the consecutive error limit, and 4xx
//! additionally tears the session down at once.

use std::{cell::RefCell, fmt, rc::Rc, time::Duration};

use parley_proto::{Element, body as bosh, jid, stanza};
use tracing::{debug, error, info, trace, warn};

use crate::{
    auth::{AuthContext, MechanismFlags},
    config::ConnectionConfig,
    env::Environment,
    error::{ConnectionError, HandlerError},
    handler::{HandlerId, Handlers, Matcher, TimedHandlerId, TimedHandlers},
    idle::Outbound,
    plugin::{Plugin, PluginRegistry},
    request::{ProcessOutcome, RequestId, RequestKind, RequestManager, Timing},
    status::{Status, condition},
    transport::HttpResponse,
};

/// Callback invoked for matching inbound stanzas.
///
/// `Ok(true)` keeps the handler, `Ok(false)` removes it after the current
/// pass. Errors are logged and the handler is kept.
pub type StanzaCallback<E> =
    Box<dyn FnMut(&mut Connection<E>, &Element) -> Result<bool, HandlerError>>;

/// Callback invoked by the idle loop once its period elapsed.
///
/// `Ok(true)` re-arms the handler; `Ok(false)` and errors remove it.
pub type TimedCallback<E> = Box<dyn FnMut(&mut Connection<E>) -> Result<bool, HandlerError>>;

/// Receives every status transition with its optional condition
pub type StatusCallback = Box<dyn FnMut(Status, Option<&str>)>;

/// Actions returned by the connection state machine.
///
/// The driver executes these actions:
/// - `Transmit`: wait `delay`, then POST `body` and report the completion
///   under `request`
/// - `Abort`: cancel the POST for `request` if it is still running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// POST a body
    Transmit(Transmit),

    /// Cancel an in-flight POST
    Abort {
        /// Attempt to cancel
        request: RequestId,
    },
}

/// One POST of a `<body/>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Attempt id to report the completion under
    pub request: RequestId,
    /// BOSH rid carried by the body
    pub rid: u64,
    /// Serialized body
    pub body: String,
    /// Backoff before sending
    pub delay: Duration,
}

/// Per-call overrides for [`Connection::connect_with`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Override of `wait`
    pub wait: Option<u32>,
    /// Override of `hold`
    pub hold: Option<u32>,
    /// Override of `route`
    pub route: Option<String>,
}

/// Parameters for resuming a session created elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAttachment {
    /// Full JID bound to the session
    pub jid: String,
    /// Session id
    pub sid: String,
    /// Next rid to use
    pub rid: u64,
    /// Override of `wait`
    pub wait: Option<u32>,
    /// Override of `hold`
    pub hold: Option<u32>,
    /// Override of the request window
    pub window: Option<u32>,
}

impl SessionAttachment {
    /// Attachment without timing overrides
    pub fn new(jid: impl Into<String>, sid: impl Into<String>, rid: u64) -> Self {
        Self { jid: jid.into(), sid: sid.into(), rid, wait: None, hold: None, window: None }
    }
}

/// BOSH connection.
///
/// Generic over the [`Environment`] supplying randomness; time is passed in
/// by the driver. Not `Send`: handlers are plain closures and reentrancy is
/// handled by staging, not locking.
pub struct Connection<E: Environment> {
    pub(crate) env: E,
    pub(crate) config: ConnectionConfig,
    service: String,
    pub(crate) clock: E::Instant,
    status: Status,

    pub(crate) jid: String,
    pub(crate) domain: String,
    pub(crate) password: Option<String>,
    pub(crate) sid: Option<String>,
    stream_id: Option<String>,
    rid: u64,
    hold: u32,
    pub(crate) features: Option<Element>,

    pub(crate) connected: bool,
    pub(crate) authenticated: bool,
    pub(crate) disconnecting: bool,
    pub(crate) paused: bool,
    pub(crate) do_bind: bool,
    pub(crate) do_session: bool,

    pub(crate) requests: RequestManager<E::Instant>,
    pub(crate) pending: Vec<Outbound>,
    pub(crate) idle_deadline: Option<E::Instant>,
    pub(crate) handlers: Handlers<StanzaCallback<E>>,
    pub(crate) timed: TimedHandlers<TimedCallback<E>, E::Instant>,
    pub(crate) auth: Option<AuthContext>,
    disconnect_timer: Option<TimedHandlerId>,
    unique_id: u64,

    status_callback: Option<StatusCallback>,
    plugins: Vec<(String, Box<dyn Plugin>)>,
}

impl<E: Environment> Connection<E> {
    /// Create a connection to a BOSH `service` URL.
    ///
    /// Every plugin in `plugins` is initialized against the new connection,
    /// in registration order.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(
        service: impl Into<String>,
        env: E,
        config: ConnectionConfig,
        plugins: &PluginRegistry<E>,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;

        let clock = env.now();
        let rid = u64::from(env.random_u32());
        let unique_id = u64::from(env.random_u32() % 10_001);
        let timing = Timing::from_config(&config);
        let hold = config.hold;

        let mut connection = Self {
            env,
            config,
            service: service.into(),
            clock,
            status: Status::Disconnected,
            jid: String::new(),
            domain: String::new(),
            password: None,
            sid: None,
            stream_id: None,
            rid,
            hold,
            features: None,
            connected: false,
            authenticated: false,
            disconnecting: false,
            paused: false,
            do_bind: false,
            do_session: false,
            requests: RequestManager::new(timing),
            pending: Vec::new(),
            idle_deadline: None,
            handlers: Handlers::new(),
            timed: TimedHandlers::new(),
            auth: None,
            disconnect_timer: None,
            unique_id,
            status_callback: None,
            plugins: Vec::new(),
        };

        for (name, init) in plugins.entries() {
            let plugin = init(&mut connection);
            debug!(plugin = name, "plugin initialized");
            connection.plugins.push((name.to_string(), plugin));
        }

        Ok(connection)
    }

    /// Last reported status
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Service URL
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Working JID; replaced by the server-assigned JID after binding
    #[must_use]
    pub fn jid(&self) -> &str {
        &self.jid
    }

    /// Domain of the JID given to `connect`/`attach`
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Session id, once the server assigned one
    #[must_use]
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Stream id (`authid`) of the session
    #[must_use]
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// rid the next body will carry
    #[must_use]
    pub fn rid(&self) -> u64 {
        self.rid
    }

    /// Current `wait` in seconds
    #[must_use]
    pub fn wait(&self) -> u32 {
        self.requests.timing().wait
    }

    /// Current `hold`
    #[must_use]
    pub fn hold(&self) -> u32 {
        self.hold
    }

    /// Current request window
    #[must_use]
    pub fn window(&self) -> u32 {
        self.requests.timing().window
    }

    /// Most recent `stream:features`
    #[must_use]
    pub fn features(&self) -> Option<&Element> {
        self.features.as_ref()
    }

    /// True once the session-creation response arrived
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True once authentication, binding and session setup completed
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// True while a graceful disconnect is in progress
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting
    }

    /// True while outbound batching is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Requests in the window
    #[must_use]
    pub fn requests(&self) -> &RequestManager<E::Instant> {
        &self.requests
    }

    /// Number of queued outbound items
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Plugin registered under `name`, if it has type `T`
    #[must_use]
    pub fn plugin<T: Plugin>(&self, name: &str) -> Option<&T> {
        self.plugins
            .iter()
            .find(|(registered, _)| registered == name)
            .and_then(|(_, plugin)| plugin.as_any().downcast_ref::<T>())
    }

    /// Mutable plugin registered under `name`, if it has type `T`
    pub fn plugin_mut<T: Plugin>(&mut self, name: &str) -> Option<&mut T> {
        self.plugins
            .iter_mut()
            .find(|(registered, _)| registered == name)
            .and_then(|(_, plugin)| plugin.as_any_mut().downcast_mut::<T>())
    }

    /// Advance the connection's notion of the current time.
    ///
    /// Earlier instants are ignored.
    pub fn update_clock(&mut self, now: E::Instant) {
        if now > self.clock {
            self.clock = now;
        }
    }

    /// Next action for the driver
    pub fn poll_action(&mut self) -> Option<ConnectionAction> {
        self.requests.poll_action()
    }

    /// Open a new session and authenticate as `jid`.
    ///
    /// A JID without a local part requests an anonymous login.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a session is connecting or connected.
    pub fn connect<F>(
        &mut self,
        jid: impl Into<String>,
        password: Option<String>,
        callback: F,
        now: E::Instant,
    ) -> Result<(), ConnectionError>
    where
        F: FnMut(Status, Option<&str>) + 'static,
    {
        self.connect_with(jid, password, ConnectOptions::default(), callback, now)
    }

    /// [`connect`](Self::connect) with `wait`, `hold` and `route` taken from
    /// `options` instead of the configuration.
    ///
    /// # Errors
    ///
    /// `InvalidState` while a session is connecting or connected,
    /// `InvalidConfig` for zero overrides.
    pub fn connect_with<F>(
        &mut self,
        jid: impl Into<String>,
        password: Option<String>,
        options: ConnectOptions,
        callback: F,
        now: E::Instant,
    ) -> Result<(), ConnectionError>
    where
        F: FnMut(Status, Option<&str>) + 'static,
    {
        if self.connected || self.status == Status::Connecting {
            let status = self.status;
            return Err(ConnectionError::InvalidState { status, operation: "connect" });
        }
        check_overrides(&[("wait", options.wait), ("hold", options.hold)])?;
        self.update_clock(now);

        self.jid = jid.into();
        self.domain = jid::domain(&self.jid).to_string();
        self.password = password;
        self.status_callback = Some(Box::new(callback));
        self.disconnecting = false;
        self.authenticated = false;
        self.requests.reset_errors();
        if let Some(wait) = options.wait {
            self.requests.timing_mut().wait = wait;
        }
        if let Some(hold) = options.hold {
            self.hold = hold;
        }
        let route = options.route.or_else(|| self.config.route.clone());

        let rid = self.next_rid();
        let request = bosh::session_request(rid, &bosh::SessionParams {
            to: &self.domain,
            lang: &self.config.lang,
            wait: self.requests.timing().wait,
            hold: self.hold,
            route: route.as_deref(),
        });

        self.change_status(Status::Connecting, None);
        self.push_request(rid, &request, RequestKind::Connect);
        self.throttle();
        Ok(())
    }

    /// Resume a session created elsewhere (e.g. by a server-side prebind).
    ///
    /// The session is treated as authenticated and connected; status
    /// becomes `Attached`.
    ///
    /// # Errors
    ///
    /// `InvalidState` while connected, `InvalidConfig` for zero overrides.
    pub fn attach<F>(
        &mut self,
        attachment: SessionAttachment,
        callback: F,
        now: E::Instant,
    ) -> Result<(), ConnectionError>
    where
        F: FnMut(Status, Option<&str>) + 'static,
    {
        if self.connected {
            let status = self.status;
            return Err(ConnectionError::InvalidState { status, operation: "attach" });
        }
        check_overrides(&[
            ("wait", attachment.wait),
            ("hold", attachment.hold),
            ("window", attachment.window),
        ])?;
        self.update_clock(now);

        self.domain = jid::domain(&attachment.jid).to_string();
        self.jid = attachment.jid;
        self.sid = Some(attachment.sid);
        self.rid = attachment.rid;
        self.status_callback = Some(Box::new(callback));
        if let Some(wait) = attachment.wait {
            self.requests.timing_mut().wait = wait;
        }
        if let Some(hold) = attachment.hold {
            self.hold = hold;
        }
        if let Some(window) = attachment.window {
            self.requests.timing_mut().window = window;
        }

        self.connected = true;
        self.authenticated = true;
        self.change_status(Status::Attached, None);
        self.schedule_idle(self.config.idle_interval);
        Ok(())
    }

    /// Gracefully end the session.
    ///
    /// While connected, a terminate body (with unavailable presence once
    /// authenticated) is sent and the session is torn down when the server
    /// answers, or after `disconnect_timeout`. Repeated calls while a
    /// disconnect is in progress are ignored.
    pub fn disconnect(&mut self, reason: Option<&str>) {
        if self.disconnecting {
            debug!("disconnect already in progress");
            return;
        }
        self.change_status(Status::Disconnecting, reason);
        info!(reason = reason.unwrap_or("none"), "disconnecting");

        if self.connected {
            let timer = self.add_system_timed_handler(self.config.disconnect_timeout, |conn| {
                conn.on_disconnect_timeout();
                Ok(false)
            });
            self.disconnect_timer = Some(timer);
            self.send_terminate();
        } else {
            self.requests.abort_all();
            self.do_disconnect();
            self.change_status(Status::Disconnected, None);
        }
    }

    /// Queue a stanza for the next body.
    pub fn send(&mut self, stanza: Element) {
        self.pending.push(Outbound::Stanza(stanza));
        self.after_queue();
    }

    /// Queue several stanzas; they share the next body.
    pub fn send_all(&mut self, stanzas: impl IntoIterator<Item = Element>) {
        self.pending.extend(stanzas.into_iter().map(Outbound::Stanza));
        self.after_queue();
    }

    /// Send an IQ and route its reply to one of two callbacks.
    ///
    /// An `id` is generated when the stanza has none. `on_error` receives
    /// `None` if `timeout` elapses first; the reply handler is removed in
    /// that case. Returns the stanza id.
    ///
    /// # Errors
    ///
    /// `InvalidStanza` if `iq` is not an `<iq/>`.
    pub fn send_iq<R, X>(
        &mut self,
        mut iq: Element,
        on_result: R,
        on_error: X,
        timeout: Option<Duration>,
    ) -> Result<String, ConnectionError>
    where
        R: FnOnce(&mut Connection<E>, &Element) + 'static,
        X: FnOnce(&mut Connection<E>, Option<&Element>) + 'static,
    {
        if !iq.is_named("iq") {
            let found = iq.name().to_string();
            return Err(ConnectionError::InvalidStanza { expected: "iq", found });
        }
        let id = match iq.attr("id") {
            Some(id) => id.to_string(),
            None => {
                let id = self.unique_id("sendIQ");
                iq.set_attr("id", id.as_str());
                id
            },
        };

        let on_error = Rc::new(RefCell::new(Some(on_error)));
        let timer = Rc::new(RefCell::new(None::<TimedHandlerId>));

        let mut on_result = Some(on_result);
        let reply_error = Rc::clone(&on_error);
        let reply_timer = Rc::clone(&timer);
        let matcher = Matcher::new().name("iq").id(id.as_str());
        let handler = self.add_handler(matcher, move |conn, reply| {
            let kind = reply.attr("type");
            if !matches!(kind, Some("result" | "error")) {
                return Err(HandlerError::UnexpectedIqType(kind.map(str::to_owned)));
            }

            let timer = reply_timer.borrow_mut().take();
            if let Some(timer) = timer {
                conn.delete_timed_handler(timer);
            }
            if kind == Some("result") {
                if let Some(callback) = on_result.take() {
                    callback(conn, reply);
                }
            } else {
                let callback = reply_error.borrow_mut().take();
                if let Some(callback) = callback {
                    callback(conn, Some(reply));
                }
            }
            Ok(false)
        });

        if let Some(period) = timeout {
            let timeout_error = Rc::clone(&on_error);
            let id_for_log = id.clone();
            let timed = self.add_timed_handler(period, move |conn| {
                warn!(id = id_for_log, "IQ timed out");
                conn.delete_handler(handler);
                let callback = timeout_error.borrow_mut().take();
                if let Some(callback) = callback {
                    callback(conn, None);
                }
                Ok(false)
            });
            *timer.borrow_mut() = Some(timed);
        }

        self.send(iq);
        Ok(id)
    }

    /// Register a user stanza handler; it only fires once authenticated and
    /// becomes active at the next inbound body.
    pub fn add_handler<F>(&mut self, matcher: Matcher, callback: F) -> HandlerId
    where
        F: FnMut(&mut Connection<E>, &Element) -> Result<bool, HandlerError> + 'static,
    {
        self.handlers.add(matcher, false, Box::new(callback))
    }

    pub(crate) fn add_system_handler<F>(&mut self, matcher: Matcher, callback: F) -> HandlerId
    where
        F: FnMut(&mut Connection<E>, &Element) -> Result<bool, HandlerError> + 'static,
    {
        self.handlers.add(matcher, true, Box::new(callback))
    }

    /// Remove a stanza handler at the next inbound body
    pub fn delete_handler(&mut self, id: HandlerId) {
        self.handlers.remove(id);
    }

    /// Register a user timed handler firing every `period` once
    /// authenticated
    pub fn add_timed_handler<F>(&mut self, period: Duration, callback: F) -> TimedHandlerId
    where
        F: FnMut(&mut Connection<E>) -> Result<bool, HandlerError> + 'static,
    {
        self.timed.add(period, false, self.clock, Box::new(callback))
    }

    pub(crate) fn add_system_timed_handler<F>(
        &mut self,
        period: Duration,
        callback: F,
    ) -> TimedHandlerId
    where
        F: FnMut(&mut Connection<E>) -> Result<bool, HandlerError> + 'static,
    {
        self.timed.add(period, true, self.clock, Box::new(callback))
    }

    /// Remove a timed handler at the next idle tick
    pub fn delete_timed_handler(&mut self, id: TimedHandlerId) {
        self.timed.remove(id);
    }

    /// Stop batching queued stanzas into new requests
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume batching
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Run the idle tick now instead of at the next deadline
    pub fn flush(&mut self) {
        self.idle_deadline = None;
        self.on_idle();
    }

    /// Connection-unique id of the form `N:suffix` (`N` alone for an empty
    /// suffix)
    pub fn unique_id(&mut self, suffix: &str) -> String {
        self.unique_id += 1;
        if suffix.is_empty() {
            self.unique_id.to_string()
        } else {
            format!("{}:{}", self.unique_id, suffix)
        }
    }

    /// Return to the freshly constructed state so the connection can be
    /// reused. In-flight requests are aborted; plugins are kept.
    pub fn reset(&mut self) {
        self.requests.abort_all();
        self.requests.reset_errors();
        *self.requests.timing_mut() = Timing::from_config(&self.config);

        self.rid = u64::from(self.env.random_u32());
        self.unique_id = u64::from(self.env.random_u32() % 10_001);
        self.sid = None;
        self.stream_id = None;
        self.hold = self.config.hold;
        self.features = None;
        self.connected = false;
        self.authenticated = false;
        self.disconnecting = false;
        self.paused = false;
        self.do_bind = false;
        self.do_session = false;
        self.pending.clear();
        self.idle_deadline = None;
        self.handlers.clear();
        self.timed.clear();
        self.auth = None;
        self.disconnect_timer = None;
        self.status = Status::Disconnected;
        debug!("connection reset");
    }

    /// Deliver the completion of a POST.
    ///
    /// Completions of aborted or unknown requests are ignored.
    pub fn handle_response(&mut self, request: RequestId, response: HttpResponse, now: E::Instant) {
        self.update_clock(now);

        if self.requests.take_aborted(request) {
            debug!(%request, "ignoring completion of aborted request");
            return;
        }
        let Some(index) = self.requests.position(request) else {
            debug!(%request, "ignoring completion of unknown request");
            return;
        };

        let status = response.status;
        self.requests.complete(index, status);
        debug!(%request, status, "request completed");

        if self.disconnecting && status >= 400 {
            self.hit_error(status);
            return;
        }

        let (kind, sends) = match self.requests.get(index) {
            Some(completed) => (completed.kind(), completed.sends()),
            None => return,
        };
        let valid = status > 0 && status < 500;
        let exhausted = sends > self.requests.timing().max_retries;

        if valid || exhausted {
            self.requests.remove(index);
            self.throttle();
        }

        if response.is_success() {
            let secondary = self.requests.timing().secondary_timeout();
            let sibling_stale =
                self.requests.get(0).is_some_and(|first| first.age(self.clock) > secondary);
            if index == 1 || (index == 0 && sibling_stale) {
                self.restart(0);
            }

            match kind {
                RequestKind::Connect => self.connect_cb(&response.body),
                RequestKind::Data => self.data_recv(&response.body),
            }
            self.requests.reset_errors();
        } else {
            error!(%request, status, "request failed");
            if status == 0 || (400..600).contains(&status) || status >= 12_000 {
                let was_connected = self.connected;
                self.hit_error(status);
                if (400..500).contains(&status) {
                    self.change_status(Status::Disconnecting, None);
                    self.do_disconnect();
                    if !was_connected {
                        self.change_status(Status::Disconnected, None);
                    }
                }
            } else {
                warn!(%request, status, "response body dropped");
                self.change_status(Status::Error, Some(condition::UNEXPECTED_STATUS));
            }
        }

        if !(valid || exhausted) {
            self.throttle();
        } else if exhausted && !self.connected {
            self.change_status(Status::ConnFail, Some(condition::GIVING_UP));
        }
    }

    /// The driver cancelled an aborted POST, so its completion will never
    /// arrive.
    pub fn handle_cancelled(&mut self, request: RequestId) {
        if self.requests.take_aborted(request) {
            trace!(%request, "aborted request cancelled");
        }
    }

    /// Parse an inbound body; `None` for empty bodies and parse failures
    /// (which end the session).
    pub(crate) fn parse_body(&mut self, raw: &[u8]) -> Option<Element> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(err) => {
                error!(%err, "response body is not UTF-8");
                self.disconnect(Some(condition::PARSER_ERROR));
                return None;
            },
        };
        trace!(body = text, "recv");

        if text.trim().is_empty() {
            debug!("empty response body");
            return None;
        }
        match bosh::parse_response(text) {
            Ok(body) => Some(body),
            Err(err) => {
                error!(%err, "failed to parse response body");
                self.disconnect(Some(condition::PARSER_ERROR));
                None
            },
        }
    }

    /// Handle the response to the session request (or a features poll).
    fn connect_cb(&mut self, raw: &[u8]) {
        self.connected = true;
        if self.idle_deadline.is_none() {
            self.schedule_idle(self.config.idle_interval);
        }

        let Some(body) = self.parse_body(raw) else {
            return;
        };

        if let Some(reason) = bosh::terminate_condition(&body) {
            warn!(condition = reason, "session request terminated by server");
            self.change_status(Status::ConnFail, Some(reason.as_str()));
            self.do_disconnect();
            return;
        }

        if self.sid.is_none() {
            self.sid = body.attr("sid").map(str::to_owned);
        }
        if self.stream_id.is_none() {
            self.stream_id = body.attr("authid").map(str::to_owned);
        }
        self.adopt_session_attributes(&body);

        let features = body.descendants("features").first().map(|features| (*features).clone());
        let advertised = features.as_ref().map_or(MechanismFlags::empty(), advertised_mechanisms);

        let Some(features) = features.filter(|_| !advertised.is_empty()) else {
            debug!("no authentication offered yet, polling for stream features");
            self.request_features();
            return;
        };
        self.features = Some(features);

        if self.config.do_authentication {
            self.authenticate(advertised);
        }
    }

    fn adopt_session_attributes(&mut self, body: &Element) {
        if let Some(window) = session_attr(body, "requests") {
            self.requests.timing_mut().window = window;
        }
        if let Some(hold) = session_attr(body, "hold") {
            self.hold = hold;
        }
        if let Some(wait) = session_attr(body, "wait") {
            self.requests.timing_mut().wait = wait;
        }
    }

    /// Empty Connect-kind body, sent while the server has not announced
    /// any usable authentication
    fn request_features(&mut self) {
        let rid = self.next_rid();
        let body = bosh::body(rid, self.sid.as_deref());
        self.push_request(rid, &body, RequestKind::Connect);
        self.throttle();
    }

    /// Report a status transition to plugins, then to the user callback.
    pub(crate) fn change_status(&mut self, status: Status, reason: Option<&str>) {
        self.status = status;
        info!(%status, condition = reason.unwrap_or(""), "status changed");

        for (_, plugin) in &mut self.plugins {
            plugin.status_changed(status, reason);
        }
        if let Some(callback) = self.status_callback.as_mut() {
            callback(status, reason);
        }
    }

    /// Claim the next rid
    pub(crate) fn next_rid(&mut self) -> u64 {
        let rid = self.rid;
        self.rid += 1;
        rid
    }

    /// Serialize and append a body to the request window
    pub(crate) fn push_request(
        &mut self,
        rid: u64,
        body: &Element,
        kind: RequestKind,
    ) -> RequestId {
        let xml = body.to_xml();
        trace!(rid, body = xml.as_str(), "send");
        self.requests.push(rid, xml, kind)
    }

    /// Process the window; a request out of retries kills the session
    pub(crate) fn throttle(&mut self) {
        if self.requests.throttle(self.clock) == ProcessOutcome::RetriesExhausted {
            self.on_disconnect_timeout();
        }
    }

    pub(crate) fn restart(&mut self, index: usize) {
        if self.requests.restart(index, self.clock) == ProcessOutcome::RetriesExhausted {
            self.on_disconnect_timeout();
        }
    }

    fn hit_error(&mut self, status: u16) {
        if self.requests.record_error(status) {
            self.on_disconnect_timeout();
        }
    }

    /// Replace the idle deadline
    pub(crate) fn schedule_idle(&mut self, after: Duration) {
        self.idle_deadline = Some(self.clock + after);
    }

    fn after_queue(&mut self) {
        self.throttle();
        self.schedule_idle(self.config.idle_interval);
    }

    /// Queue a stream restart (after SASL success)
    pub(crate) fn send_restart(&mut self) {
        self.pending.push(Outbound::Restart);
        self.after_queue();
    }

    fn send_terminate(&mut self) {
        let rid = self.next_rid();
        let mut body = bosh::terminate(rid, self.sid.as_deref());
        if self.authenticated {
            body.push_child(stanza::presence(Some("unavailable")));
        }
        self.disconnecting = true;
        self.push_request(rid, &body, RequestKind::Data);
        self.throttle();
    }

    /// Abort everything in flight and tear the session down
    pub(crate) fn on_disconnect_timeout(&mut self) {
        info!("forcing disconnect");
        let aborted = self.requests.abort_all();
        debug!(aborted, "aborted in-flight requests");
        self.do_disconnect();
    }

    /// Final disconnect step: clear session state and every handler
    pub(crate) fn do_disconnect(&mut self) {
        if let Some(timer) = self.disconnect_timer.take() {
            self.timed.remove(timer);
        }

        self.authenticated = false;
        self.disconnecting = false;
        self.sid = None;
        self.stream_id = None;
        self.rid = u64::from(self.env.random_u32());

        if self.connected {
            self.change_status(Status::Disconnected, None);
            self.connected = false;
        }

        self.handlers.clear();
        self.timed.clear();
        self.auth = None;
        self.pending.clear();
    }
}

/// Reject zero timing overrides
fn check_overrides(overrides: &[(&str, Option<u32>)]) -> Result<(), ConnectionError> {
    match overrides.iter().find(|(_, value)| *value == Some(0)) {
        Some((name, _)) => Err(ConnectionError::InvalidConfig(format!("{name} must be positive"))),
        None => Ok(()),
    }
}

/// Positive numeric attribute of a session response; malformed values are
/// logged and ignored
fn session_attr(body: &Element, name: &'static str) -> Option<u32> {
    match bosh::numeric_attr(body, name) {
        Ok(value) => value.filter(|value| *value > 0),
        Err(err) => {
            warn!(%err, "ignoring session attribute");
            None
        },
    }
}

/// Mechanisms advertised in a `stream:features` element, including legacy
/// auth
fn advertised_mechanisms(features: &Element) -> MechanismFlags {
    let names: Vec<String> =
        features.descendants("mechanism").into_iter().map(Element::text).collect();
    let mut advertised = MechanismFlags::from_sasl_names(names.iter().map(String::as_str));

    let legacy = features.children().any(|child| {
        child.is_named("auth") && child.xmlns() == Some(parley_proto::ns::IQ_AUTH_FEATURE)
    });
    if legacy {
        advertised |= MechanismFlags::LEGACY;
    }
    advertised
}

impl<E: Environment> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("service", &self.service)
            .field("status", &self.status)
            .field("jid", &self.jid)
            .field("sid", &self.sid)
            .field("rid", &self.rid)
            .field("connected", &self.connected)
            .field("authenticated", &self.authenticated)
            .field("disconnecting", &self.disconnecting)
            .field("requests", &self.requests.len())
            .field("pending", &self.pending.len())
            .field("handlers", &self.handlers.len())
            .field("timed_handlers", &self.timed.len())
            .finish_non_exhaustive()
    }
}
