//! In-memory BOSH connection manager and XMPP server.
//!
//! `SimServer` implements [`HttpTransport`], so a driver can hand it the
//! bodies a connection emits and get real protocol answers back without a
//! socket. It covers what a client session touches:
//!
//! - session creation, stream restarts and terminate
//! - SASL PLAIN, ANONYMOUS, SCRAM-SHA-1 and DIGEST-MD5, plus legacy
//!   `jabber:iq:auth`
//! - resource binding, session establishment, ping and message echo
//! - held empty polls, released when the server has something to say
//!
//! Faults are queued up front and consumed one per POST, in order.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use parley_core::{
    HttpResponse, HttpTransport,
    auth::attributes,
    crypto::{self, DigestInput},
};
use parley_proto::{Element, body as bosh, jid, ns, stanza};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Server behaviour knobs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Domain the server answers for
    pub domain: String,
    /// SASL mechanisms advertised, in order
    pub mechanisms: Vec<String>,
    /// Advertise `jabber:iq:auth`
    pub legacy_auth: bool,
    /// Advertise session establishment after binding
    pub offer_session: bool,
    /// Leave features out of the session response; send them on the next
    /// request instead
    pub announce_features_late: bool,
    /// Answer bind requests with a `conflict` error
    pub bind_conflict: bool,
    /// Answer unknown IQs with `service-unavailable` instead of ignoring them
    pub answer_unknown_iqs: bool,
    /// `wait` granted to clients
    pub wait: u32,
    /// SCRAM iteration count
    pub scram_iterations: u32,
    /// Delay before every answer
    pub latency: Duration,
    /// Longest time an empty poll is held
    pub hold_for: Duration,
    /// RNG seed for sids, salts and nonces
    pub seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "capulet.lit".to_string(),
            mechanisms: ["SCRAM-SHA-1", "DIGEST-MD5", "PLAIN", "ANONYMOUS"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            legacy_auth: false,
            offer_session: true,
            announce_features_late: false,
            bind_conflict: false,
            answer_unknown_iqs: false,
            wait: 60,
            scram_iterations: 4096,
            latency: Duration::from_millis(5),
            hold_for: Duration::from_secs(2),
            seed: 0,
        }
    }
}

/// Fault consumed by the next POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this HTTP status and an empty body
    Status(u16),
    /// Fail at the transport layer
    Refuse,
    /// Never answer
    Stall,
    /// Answer with a terminate body carrying this condition
    Terminate(String),
}

/// Deliberate protocol violations
#[derive(Debug, Clone, Copy, Default)]
struct Misbehavior {
    forge_scram_signature: bool,
    foreign_scram_nonce: bool,
}

/// SASL exchange in progress
#[derive(Debug, Clone)]
enum Exchange {
    Scram {
        user: String,
        client_first_bare: String,
        server_first: String,
        nonce: String,
        salt: Vec<u8>,
    },
    Digest { nonce: String, verified: Option<String> },
}

#[derive(Debug, Default)]
struct SimSession {
    /// Authenticated local part
    user: Option<String>,
    /// Full JID after binding
    bound: Option<String>,
    exchange: Option<Exchange>,
    features_owed: bool,
    outbound: Vec<Element>,
    /// Answers by rid, for retransmissions
    answers: BTreeMap<u64, String>,
}

impl SimSession {
    fn remember(&mut self, rid: u64, answer: &str) {
        self.answers.insert(rid, answer.to_string());
        while self.answers.len() > 4 {
            self.answers.pop_first();
        }
    }
}

/// Outcome of processing one body
enum Reply {
    Ready(String),
    Status(u16),
    Hold { sid: String, rid: u64 },
}

struct ServerState {
    config: ServerConfig,
    users: HashMap<String, String>,
    sessions: HashMap<String, SimSession>,
    sessions_created: u64,
    faults: VecDeque<Fault>,
    misbehavior: Misbehavior,
    received: Vec<Element>,
    attempts: Vec<u64>,
    delivered: Vec<Element>,
    iq_replies: Vec<Element>,
    rng: ChaCha20Rng,
}

/// Simulated BOSH endpoint; clones share state
#[derive(Clone)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
    wake: Arc<Notify>,
}

impl SimServer {
    /// Server without accounts
    pub fn new(config: ServerConfig) -> Self {
        let rng = ChaCha20Rng::seed_from_u64(config.seed);
        let state = ServerState {
            config,
            users: HashMap::new(),
            sessions: HashMap::new(),
            sessions_created: 0,
            faults: VecDeque::new(),
            misbehavior: Misbehavior::default(),
            received: Vec::new(),
            attempts: Vec::new(),
            delivered: Vec::new(),
            iq_replies: Vec::new(),
            rng,
        };
        Self { state: Arc::new(Mutex::new(state)), wake: Arc::new(Notify::new()) }
    }

    /// Add an account
    #[must_use]
    pub fn with_user(self, name: &str, password: &str) -> Self {
        self.lock().users.insert(name.to_string(), password.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a fault for each of the next `count` POSTs
    pub fn inject(&self, fault: Fault, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.faults.push_back(fault.clone());
        }
    }

    /// Answer the next `count` POSTs with `status`
    pub fn fail_next(&self, status: u16, count: usize) {
        self.inject(Fault::Status(status), count);
    }

    /// Sign SCRAM success with a bogus server signature
    pub fn forge_scram_signature(&self) {
        self.lock().misbehavior.forge_scram_signature = true;
    }

    /// Answer SCRAM with a nonce that does not extend the client's
    pub fn use_foreign_scram_nonce(&self) {
        self.lock().misbehavior.foreign_scram_nonce = true;
    }

    /// Deliver a stanza to every bound session with the next answer
    pub fn push(&self, stanza: Element) {
        {
            let mut state = self.lock();
            for session in state.sessions.values_mut().filter(|session| session.bound.is_some()) {
                let mut copy = stanza.clone();
                if let Some(bound) = &session.bound {
                    copy.set_attr("to", bound.as_str());
                }
                session.outbound.push(copy);
            }
        }
        self.wake.notify_one();
    }

    /// Every body received, in arrival order (retransmissions included)
    pub fn received(&self) -> Vec<Element> {
        self.lock().received.clone()
    }

    /// rid of every POST, faulted ones included
    pub fn attempted_rids(&self) -> Vec<u64> {
        self.lock().attempts.clone()
    }

    /// Every stanza carried by a received body
    pub fn received_stanzas(&self) -> Vec<Element> {
        self.lock().received.iter().flat_map(|body| body.children().cloned()).collect()
    }

    /// Messages and presences sent by clients
    pub fn delivered(&self) -> Vec<Element> {
        self.lock().delivered.clone()
    }

    /// IQ results and errors sent by clients
    pub fn iq_replies(&self) -> Vec<Element> {
        self.lock().iq_replies.clone()
    }

    /// Sessions created so far
    pub fn sessions_created(&self) -> u64 {
        self.lock().sessions_created
    }

    /// Sessions not yet terminated
    pub fn live_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    async fn hold(&self, sid: &str, rid: u64) -> String {
        let hold_for = self.lock().config.hold_for;
        if tokio::time::timeout(hold_for, self.wake.notified()).await.is_err() {
            trace!(sid, rid, "held poll expired");
        }

        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(sid) else {
            return envelope().with_attr("type", "terminate").to_xml();
        };
        let mut answer = envelope();
        for stanza in session.outbound.drain(..) {
            answer.push_child(stanza);
        }
        let answer = answer.to_xml();
        session.remember(rid, &answer);
        answer
    }
}

#[async_trait]
impl HttpTransport for SimServer {
    async fn post(
        &self,
        _url: &str,
        _headers: &[(&str, &str)],
        body: String,
    ) -> io::Result<HttpResponse> {
        let (latency, fault) = {
            let mut state = self.lock();
            let rid = Element::parse(&body).ok().and_then(|body| body.attr("rid")?.parse().ok());
            if let Some(rid) = rid {
                state.attempts.push(rid);
            }
            (state.config.latency, state.faults.pop_front())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(Fault::Status(status)) => {
                debug!(status, "injected HTTP failure");
                return Ok(HttpResponse::new(status, Bytes::new()));
            },
            Some(Fault::Refuse) => {
                debug!("injected transport failure");
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "injected refusal"));
            },
            Some(Fault::Stall) => {
                debug!("injected stall");
                return std::future::pending().await;
            },
            Some(Fault::Terminate(condition)) => {
                let answer =
                    envelope().with_attr("type", "terminate").with_attr("condition", condition);
                return Ok(HttpResponse::new(200, answer.to_xml()));
            },
            None => {},
        }

        let reply = self.lock().handle(&body);
        let answer = match reply {
            Reply::Ready(answer) => {
                // A fresh request releases the held poll
                self.wake.notify_one();
                answer
            },
            Reply::Status(status) => return Ok(HttpResponse::new(status, Bytes::new())),
            Reply::Hold { sid, rid } => self.hold(&sid, rid).await,
        };
        trace!(body = answer.as_str(), "answer");
        Ok(HttpResponse::new(200, answer))
    }
}

fn envelope() -> Element {
    Element::new("body").with_attr("xmlns", ns::HTTPBIND)
}

fn sasl(name: &str, text: Option<String>) -> Element {
    let mut element = Element::new(name).with_attr("xmlns", ns::SASL);
    if let Some(text) = text {
        element.push_text(text);
    }
    element
}

fn sasl_failure(condition: &str) -> Element {
    sasl("failure", None).with_child(Element::new(condition))
}

fn decode(payload: &str) -> Option<String> {
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

fn lookup(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(name, _)| name == key).map(|(_, value)| value.clone())
}

fn child_in<'a>(stanza: &'a Element, namespace: &str) -> Option<&'a Element> {
    stanza.children().find(|child| child.xmlns() == Some(namespace))
}

impl ServerState {
    fn random_hex(&mut self, len: usize) -> String {
        let mut bytes = vec![0u8; len];
        self.rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn password_matches(&self, user: &str, password: &str) -> bool {
        self.users.get(user).is_some_and(|known| known == password)
    }

    fn features(&self, after_auth: bool) -> Element {
        let mut features = Element::new("stream:features").with_attr("xmlns:stream", ns::STREAM);
        if after_auth {
            features.push_child(Element::new("bind").with_attr("xmlns", ns::BIND));
            if self.config.offer_session {
                features.push_child(Element::new("session").with_attr("xmlns", ns::SESSION));
            }
            return features;
        }

        if !self.config.mechanisms.is_empty() {
            let mut mechanisms = Element::new("mechanisms").with_attr("xmlns", ns::SASL);
            for name in &self.config.mechanisms {
                mechanisms.push_child(Element::new("mechanism").with_text(name.as_str()));
            }
            features.push_child(mechanisms);
        }
        if self.config.legacy_auth {
            features.push_child(Element::new("auth").with_attr("xmlns", ns::IQ_AUTH_FEATURE));
        }
        features
    }

    fn handle(&mut self, raw: &str) -> Reply {
        let body = match bosh::parse_response(raw) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "unparseable request body");
                return Reply::Status(400);
            },
        };
        self.received.push(body.clone());

        let Some(rid) = body.attr("rid").and_then(|rid| rid.parse::<u64>().ok()) else {
            warn!("request without rid");
            return Reply::Status(400);
        };
        match body.attr("sid").map(str::to_owned) {
            None => self.create_session(&body),
            Some(sid) => self.continue_session(&sid, rid, &body),
        }
    }

    fn create_session(&mut self, body: &Element) -> Reply {
        if body.attr("to") != Some(self.config.domain.as_str()) {
            warn!(to = body.attr("to").unwrap_or(""), "session request for a foreign host");
            let answer =
                envelope().with_attr("type", "terminate").with_attr("condition", "host-unknown");
            return Reply::Ready(answer.to_xml());
        }

        self.sessions_created += 1;
        let session_number = self.sessions_created;
        let sid = format!("sim-{}-{}", session_number, self.random_hex(4));
        let wait = body
            .attr("wait")
            .and_then(|wait| wait.parse::<u32>().ok())
            .map_or(self.config.wait, |wait| wait.min(self.config.wait));

        let mut answer = envelope()
            .with_attr("sid", sid.as_str())
            .with_attr("authid", sid.as_str())
            .with_attr("wait", wait.to_string())
            .with_attr("requests", "2")
            .with_attr("hold", "1")
            .with_attr("ver", bosh::BOSH_VERSION)
            .with_attr("xmlns:stream", ns::STREAM);

        let mut session = SimSession::default();
        if self.config.announce_features_late {
            session.features_owed = true;
        } else {
            answer.push_child(self.features(false));
        }
        debug!(sid, "session created");
        self.sessions.insert(sid, session);
        Reply::Ready(answer.to_xml())
    }

    fn continue_session(&mut self, sid: &str, rid: u64, body: &Element) -> Reply {
        let Some(mut session) = self.sessions.remove(sid) else {
            warn!(sid, "unknown session");
            return Reply::Status(404);
        };
        if let Some(answer) = session.answers.get(&rid) {
            debug!(sid, rid, "retransmission, repeating answer");
            let answer = answer.clone();
            self.sessions.insert(sid.to_string(), session);
            return Reply::Ready(answer);
        }

        if bosh::is_terminate(body) {
            for stanza in body.children() {
                self.route(&mut session, stanza);
            }
            debug!(sid, "session terminated by client");
            return Reply::Ready(envelope().with_attr("type", "terminate").to_xml());
        }

        let mut answer = envelope();
        if session.features_owed {
            session.features_owed = false;
            answer.push_child(self.features(false));
        } else if body.attr("xmpp:restart") == Some("true") {
            answer.push_child(self.features(true));
        }
        for stanza in body.children() {
            self.route(&mut session, stanza);
        }

        let idle = answer.children().count() == 0 && session.outbound.is_empty();
        if idle && body.children().count() == 0 && session.bound.is_some() {
            self.sessions.insert(sid.to_string(), session);
            return Reply::Hold { sid: sid.to_string(), rid };
        }

        for stanza in session.outbound.drain(..) {
            answer.push_child(stanza);
        }
        let answer = answer.to_xml();
        session.remember(rid, &answer);
        self.sessions.insert(sid.to_string(), session);
        Reply::Ready(answer)
    }

    fn route(&mut self, session: &mut SimSession, stanza: &Element) {
        trace!(stanza = stanza.name(), "route");
        match (stanza.local_name(), stanza.xmlns()) {
            ("auth", Some(ns::SASL)) => self.sasl_auth(session, stanza),
            ("response", Some(ns::SASL)) => self.sasl_response(session, stanza),
            ("abort", Some(ns::SASL)) => {
                session.exchange = None;
                session.outbound.push(sasl_failure("aborted"));
            },
            ("iq", _) => self.iq(session, stanza),
            ("message" | "presence", _) => {
                self.delivered.push(stanza.clone());
                let Some(bound) = session.bound.clone() else {
                    return;
                };
                let to_self = stanza.is_named("message")
                    && stanza.attr("to").is_some_and(|to| jid::bare(to) == jid::bare(&bound));
                if to_self {
                    let mut echo = stanza.clone();
                    echo.set_attr("from", bound.as_str());
                    session.outbound.push(echo);
                }
            },
            (name, namespace) => {
                debug!(name, namespace = namespace.unwrap_or(""), "ignoring element");
            },
        }
    }

    fn sasl_auth(&mut self, session: &mut SimSession, auth: &Element) {
        let mechanism = auth.attr("mechanism").unwrap_or_default();
        if !self.config.mechanisms.iter().any(|offered| offered == mechanism) {
            session.outbound.push(sasl_failure("invalid-mechanism"));
            return;
        }
        let payload = decode(&auth.text()).unwrap_or_default();

        match mechanism {
            "PLAIN" => {
                let mut parts = payload.split('\0');
                let (_authzid, user, password) = (parts.next(), parts.next(), parts.next());
                match (user, password) {
                    (Some(user), Some(password)) if self.password_matches(user, password) => {
                        session.user = Some(user.to_string());
                        session.outbound.push(sasl("success", None));
                    },
                    _ => session.outbound.push(sasl_failure("not-authorized")),
                }
            },
            "ANONYMOUS" => {
                session.user = Some(format!("anon-{}", self.random_hex(4)));
                session.outbound.push(sasl("success", None));
            },
            "SCRAM-SHA-1" => self.scram_first(session, &payload),
            "DIGEST-MD5" => {
                let nonce = self.random_hex(8);
                let challenge = format!(
                    "realm=\"{}\",nonce=\"{nonce}\",qop=\"auth\",charset=utf-8,algorithm=md5-sess",
                    self.config.domain
                );
                session.exchange = Some(Exchange::Digest { nonce, verified: None });
                session.outbound.push(sasl("challenge", Some(STANDARD.encode(challenge))));
            },
            other => {
                warn!(mechanism = other, "advertised mechanism without server support");
                session.outbound.push(sasl_failure("invalid-mechanism"));
            },
        }
    }

    fn scram_first(&mut self, session: &mut SimSession, payload: &str) {
        let Some(client_first_bare) = payload.strip_prefix("n,,") else {
            session.outbound.push(sasl_failure("malformed-request"));
            return;
        };
        let pairs = attributes(client_first_bare);
        let (Some(user), Some(cnonce)) = (lookup(&pairs, "n"), lookup(&pairs, "r")) else {
            session.outbound.push(sasl_failure("malformed-request"));
            return;
        };

        let prefix =
            if self.misbehavior.foreign_scram_nonce { "forged".to_string() } else { cnonce };
        let nonce = format!("{prefix}{}", self.random_hex(8));
        let mut salt = vec![0u8; 16];
        self.rng.fill_bytes(&mut salt);
        let server_first =
            format!("r={nonce},s={},i={}", STANDARD.encode(&salt), self.config.scram_iterations);

        session.outbound.push(sasl("challenge", Some(STANDARD.encode(&server_first))));
        session.exchange = Some(Exchange::Scram {
            user,
            client_first_bare: client_first_bare.to_string(),
            server_first,
            nonce,
            salt,
        });
    }

    fn sasl_response(&mut self, session: &mut SimSession, response: &Element) {
        let payload = decode(&response.text()).unwrap_or_default();
        match session.exchange.take() {
            Some(Exchange::Scram { user, client_first_bare, server_first, nonce, salt }) => {
                let outcome = self.scram_final(
                    &user,
                    &client_first_bare,
                    &server_first,
                    &nonce,
                    &salt,
                    &payload,
                );
                match outcome {
                    Some(verifier) => {
                        session.user = Some(user);
                        session.outbound.push(sasl("success", Some(STANDARD.encode(verifier))));
                    },
                    None => session.outbound.push(sasl_failure("not-authorized")),
                }
            },
            Some(Exchange::Digest { nonce, verified: None }) => {
                match self.digest_check(&nonce, &payload) {
                    Some(user) => {
                        let rspauth = format!("rspauth={}", crypto::md5_hex(payload.as_bytes()));
                        session.outbound.push(sasl("challenge", Some(STANDARD.encode(rspauth))));
                        session.exchange = Some(Exchange::Digest { nonce, verified: Some(user) });
                    },
                    None => session.outbound.push(sasl_failure("not-authorized")),
                }
            },
            Some(Exchange::Digest { verified: Some(user), .. }) => {
                session.user = Some(user);
                session.outbound.push(sasl("success", None));
            },
            None => session.outbound.push(sasl_failure("malformed-request")),
        }
    }

    /// `v=` verifier on success
    fn scram_final(
        &self,
        user: &str,
        client_first_bare: &str,
        server_first: &str,
        nonce: &str,
        salt: &[u8],
        payload: &str,
    ) -> Option<String> {
        let (without_proof, _) = payload.split_once(",p=")?;
        let pairs = attributes(payload);
        if lookup(&pairs, "r").as_deref() != Some(nonce) {
            return None;
        }
        let proof = lookup(&pairs, "p")?;
        let password = self.users.get(user)?;

        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
        let keys = crypto::scram_keys(
            password.as_bytes(),
            salt,
            self.config.scram_iterations,
            auth_message.as_bytes(),
        )
        .ok()?;
        if STANDARD.encode(keys.client_proof) != proof {
            return None;
        }

        let signature =
            if self.misbehavior.forge_scram_signature { [0u8; 20] } else { keys.server_signature };
        Some(format!("v={}", STANDARD.encode(signature)))
    }

    /// Authenticated user if the digest response checks out
    fn digest_check(&self, nonce: &str, payload: &str) -> Option<String> {
        let pairs = attributes(payload);
        let user = lookup(&pairs, "username")?;
        let realm = lookup(&pairs, "realm").unwrap_or_default();
        let cnonce = lookup(&pairs, "cnonce")?;
        let digest_uri = lookup(&pairs, "digest-uri")?;
        let response = lookup(&pairs, "response")?;
        if lookup(&pairs, "nonce").as_deref() != Some(nonce) {
            return None;
        }
        if digest_uri != format!("xmpp/{}", self.config.domain) {
            return None;
        }
        let password = self.users.get(&user)?;

        let expected = crypto::digest_md5_response(&DigestInput {
            username: &user,
            realm: &realm,
            password,
            nonce,
            cnonce: &cnonce,
            digest_uri: &digest_uri,
        });
        (expected == response).then_some(user)
    }

    fn iq(&mut self, session: &mut SimSession, iq: &Element) {
        let id = iq.attr("id").unwrap_or_default().to_string();
        let kind = iq.attr("type").unwrap_or_default();
        if matches!(kind, "result" | "error") {
            self.iq_replies.push(iq.clone());
            return;
        }

        let mut reply =
            stanza::iq("result", Some(id.as_str())).with_attr("from", self.config.domain.as_str());
        if let Some(bind) = child_in(iq, ns::BIND) {
            let Some(user) = session.user.clone() else {
                session.outbound.push(iq_error(&id, "auth", "not-authorized"));
                return;
            };
            if self.config.bind_conflict {
                session.outbound.push(iq_error(&id, "cancel", "conflict"));
                return;
            }
            let resource = bind
                .child("resource")
                .map(Element::text)
                .filter(|resource| !resource.is_empty())
                .unwrap_or_else(|| format!("sim-{}", self.random_hex(3)));
            let bound = format!("{user}@{}/{resource}", self.config.domain);
            reply.push_child(
                Element::new("bind")
                    .with_attr("xmlns", ns::BIND)
                    .with_child(Element::new("jid").with_text(bound.as_str())),
            );
            session.bound = Some(bound);
        } else if child_in(iq, ns::SESSION).is_some() {
            if session.bound.is_none() {
                session.outbound.push(iq_error(&id, "wait", "unexpected-request"));
                return;
            }
        } else if let Some(query) = child_in(iq, ns::AUTH) {
            if kind == "get" {
                reply.push_child(
                    Element::new("query")
                        .with_attr("xmlns", ns::AUTH)
                        .with_child(Element::new("username"))
                        .with_child(Element::new("password"))
                        .with_child(Element::new("resource")),
                );
            } else {
                let field = |name: &str| query.child(name).map(Element::text).unwrap_or_default();
                let (user, password, resource) =
                    (field("username"), field("password"), field("resource"));
                if !self.password_matches(&user, &password) || resource.is_empty() {
                    session.outbound.push(iq_error(&id, "auth", "not-authorized"));
                    return;
                }
                session.bound = Some(format!("{user}@{}/{resource}", self.config.domain));
                session.user = Some(user);
            }
        } else if child_in(iq, ns::PING).is_none() {
            if self.config.answer_unknown_iqs {
                session.outbound.push(iq_error(&id, "cancel", "service-unavailable"));
            } else {
                debug!(id, "leaving IQ unanswered");
            }
            return;
        }
        session.outbound.push(reply);
    }
}

fn iq_error(id: &str, kind: &str, condition: &str) -> Element {
    stanza::iq("error", Some(id)).with_child(
        Element::new("error")
            .with_attr("type", kind)
            .with_child(Element::new(condition).with_attr("xmlns", ns::STANZAS)),
    )
}
