//! Shared fixtures for driving a connection by hand.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use parley_core::{
    Connection, ConnectionAction, ConnectionConfig, Environment, HttpResponse, PluginRegistry,
    SessionAttachment, Status, Transmit,
};
use parley_proto::{Element, ns};

pub const SERVICE: &str = "http://capulet.lit/http-bind";
pub const JID: &str = "juliet@capulet.lit/balcony";
pub const PASSWORD: &str = "r0m30";

// Minimal test environment
#[derive(Clone)]
pub struct TestEnv {
    start: Instant,
}

impl TestEnv {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Environment for TestEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        self.start
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // Deterministic for tests
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
}

pub type StatusLog = Rc<RefCell<Vec<(Status, Option<String>)>>>;

/// A connection plus a hand-advanced clock
pub struct Session {
    pub conn: Connection<TestEnv>,
    pub now: Instant,
    pub log: StatusLog,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        Self::with_plugins(config, &PluginRegistry::new())
    }

    pub fn with_plugins(config: ConnectionConfig, plugins: &PluginRegistry<TestEnv>) -> Self {
        let env = TestEnv::new();
        let now = env.now();
        let conn = Connection::new(SERVICE, env, config, plugins).unwrap();
        Self { conn, now, log: StatusLog::default() }
    }

    pub fn recorder(&self) -> impl FnMut(Status, Option<&str>) + 'static {
        let log = Rc::clone(&self.log);
        move |status, condition| log.borrow_mut().push((status, condition.map(str::to_owned)))
    }

    pub fn connect(&mut self, jid: &str, password: Option<&str>) -> Transmit {
        let recorder = self.recorder();
        self.conn.connect(jid, password.map(str::to_owned), recorder, self.now).unwrap();
        let mut sent = self.transmits();
        assert_eq!(sent.len(), 1, "connect sends exactly the session request");
        sent.remove(0)
    }

    /// Resume an authenticated session without going through SASL
    pub fn attach(&mut self) {
        let recorder = self.recorder();
        self.conn.attach(SessionAttachment::new(JID, "sid-1", 1000), recorder, self.now).unwrap();
    }

    pub fn actions(&mut self) -> Vec<ConnectionAction> {
        std::iter::from_fn(|| self.conn.poll_action()).collect()
    }

    pub fn transmits(&mut self) -> Vec<Transmit> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ConnectionAction::Transmit(transmit) => Some(transmit),
                ConnectionAction::Abort { .. } => None,
            })
            .collect()
    }

    pub fn respond(&mut self, transmit: &Transmit, status: u16, body: &str) {
        let response = HttpResponse::new(status, body.to_string());
        self.conn.handle_response(transmit.request, response, self.now);
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        self.conn.handle_timeout(self.now);
    }

    /// One idle interval
    pub fn tick(&mut self) -> Vec<Transmit> {
        self.advance(self.conn.config().idle_interval);
        self.transmits()
    }

    /// Tick and expect exactly one body
    pub fn tick_one(&mut self) -> Transmit {
        let mut sent = self.tick();
        assert_eq!(sent.len(), 1, "expected one body, got {sent:?}");
        sent.remove(0)
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.log.borrow().iter().map(|(status, _)| *status).collect()
    }

    pub fn last(&self) -> Option<(Status, Option<String>)> {
        self.log.borrow().last().cloned()
    }

    /// Condition of the most recent report of `status`
    pub fn last_condition(&self, status: Status) -> Option<String> {
        self.log
            .borrow()
            .iter()
            .rev()
            .find(|(seen, _)| *seen == status)
            .and_then(|(_, condition)| condition.clone())
    }

    /// Full PLAIN login with bind and session
    pub fn establish(&mut self) {
        let request = self.connect(JID, Some(PASSWORD));
        self.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));

        let auth = self.tick_one();
        self.respond(&auth, 200, &wrap(&format!("<success xmlns='{}'/>", ns::SASL)));

        let restart = self.tick_one();
        self.respond(&restart, 200, &wrap(&bind_features()));

        let bind = self.tick_one();
        self.respond(&bind, 200, &wrap(&bind_result(JID)));

        let session = self.tick_one();
        let established = wrap("<iq type='result' id='_session_auth_2' xmlns='jabber:client'/>");
        self.respond(&session, 200, &established);
        assert_eq!(self.conn.status(), Status::Connected);
    }
}

/// Parse a transmitted body
pub fn parse(transmit: &Transmit) -> Element {
    Element::parse(&transmit.body).unwrap()
}

pub fn wrap(children: &str) -> String {
    format!("<body xmlns='{}'>{children}</body>", ns::HTTPBIND)
}

pub fn mechanisms(names: &[&str]) -> String {
    let inner: String = names.iter().map(|name| format!("<mechanism>{name}</mechanism>")).collect();
    format!("<mechanisms xmlns='{}'>{inner}</mechanisms>", ns::SASL)
}

pub fn session_response(features: &str) -> String {
    format!(
        "<body xmlns='{}' sid='sid-1' authid='stream-1' wait='60' requests='2' hold='1'>\
         <stream:features xmlns:stream='{}'>{features}</stream:features></body>",
        ns::HTTPBIND,
        ns::STREAM
    )
}

pub fn bind_features() -> String {
    format!(
        "<stream:features xmlns:stream='{}'>\
         <bind xmlns='{}'/><session xmlns='{}'/></stream:features>",
        ns::STREAM,
        ns::BIND,
        ns::SESSION
    )
}

pub fn bind_result(jid: &str) -> String {
    format!(
        "<iq type='result' id='_bind_auth_2' xmlns='jabber:client'>\
         <bind xmlns='{}'><jid>{jid}</jid></bind></iq>",
        ns::BIND
    )
}
