//! Scripted session lifecycles.
//!
//! Each test plays the server by hand: it answers the bodies the connection
//! emits and advances the clock one idle interval at a time.

mod common;

use std::{any::Any, cell::RefCell, rc::Rc, time::Duration};

use common::{
    JID, PASSWORD, Session, TestEnv, bind_features, bind_result, mechanisms, parse,
    session_response, wrap,
};
use parley_core::{
    ConnectOptions, ConnectionAction, ConnectionConfig, ConnectionError, Plugin, PluginRegistry,
    Status, auth::MechanismFlags,
};
use parley_proto::{Element, ns, stanza};

#[test]
fn plain_login_reaches_connected() {
    let mut session = Session::new();
    session.establish();

    assert_eq!(
        session.statuses(),
        vec![Status::Connecting, Status::Authenticating, Status::Connected]
    );
    assert!(session.conn.is_authenticated());
    assert_eq!(session.conn.jid(), JID);
    assert_eq!(session.conn.sid(), Some("sid-1"));
    assert_eq!(session.conn.stream_id(), Some("stream-1"));
}

#[test]
fn session_request_carries_stream_parameters() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    let body = parse(&request);

    assert_eq!(body.attr("to"), Some("capulet.lit"));
    assert_eq!(body.attr("wait"), Some("60"));
    assert_eq!(body.attr("hold"), Some("1"));
    assert_eq!(body.attr("ver"), Some("1.6"));
    assert_eq!(body.attr("rid"), Some(request.rid.to_string().as_str()));
    assert_eq!(request.delay, Duration::ZERO);
}

#[test]
fn plain_credentials_and_restart_are_sent() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));

    let auth = session.tick_one();
    let body = parse(&auth);
    let element = body.child("auth").unwrap();
    assert_eq!(element.attr("mechanism"), Some("PLAIN"));
    // base64("juliet@capulet.lit\0juliet\0r0m30")
    assert_eq!(element.text(), "anVsaWV0QGNhcHVsZXQubGl0AGp1bGlldAByMG0zMA==");
    assert_eq!(auth.rid, request.rid + 1);

    session.respond(&auth, 200, &wrap(&format!("<success xmlns='{}'/>", ns::SASL)));
    let restart = parse(&session.tick_one());
    assert_eq!(restart.attr("xmpp:restart"), Some("true"));
    assert_eq!(restart.children().count(), 0);
}

#[test]
fn anonymous_login_without_node() {
    let mut session = Session::new();
    let request = session.connect("capulet.lit", None);
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN", "ANONYMOUS"])));

    let auth = parse(&session.tick_one());
    let element = auth.child("auth").unwrap();
    assert_eq!(element.attr("mechanism"), Some("ANONYMOUS"));
    assert_eq!(element.text(), "");
}

#[test]
fn nodeless_jid_without_anonymous_sends_no_stanza() {
    let mut session = Session::new();
    let request = session.connect("capulet.lit", None);
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));

    let mut sent = session.transmits();
    for _ in 0..5 {
        sent.extend(session.tick());
    }

    assert_eq!(
        session.last_condition(Status::ConnFail),
        Some("x-strophe-bad-non-anon-jid".to_string())
    );
    assert!(sent.iter().all(|transmit| parse(transmit).children().count() == 0));
    assert!(sent.iter().any(|transmit| parse(transmit).attr("type") == Some("terminate")));
}

#[test]
fn no_usable_mechanism_fails() {
    let config =
        ConnectionConfig { mechanisms: MechanismFlags::PLAIN, ..ConnectionConfig::default() };
    let mut session = Session::with_config(config);
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["SCRAM-SHA-1"])));

    assert_eq!(
        session.last_condition(Status::ConnFail),
        Some("x-strophe-no-auth-mechanism".to_string())
    );
}

#[test]
fn scram_nonce_mismatch_sends_no_response() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["SCRAM-SHA-1", "PLAIN"])));

    let auth = session.tick_one();
    assert_eq!(parse(&auth).child("auth").unwrap().attr("mechanism"), Some("SCRAM-SHA-1"));

    // r=forged,s=QSXCR+Q6sek8bf92,i=4096
    let challenge = "cj1mb3JnZWQscz1RU1hDUitRNnNlazhiZjkyLGk9NDA5Ng==";
    let challenge = format!("<challenge xmlns='{}'>{challenge}</challenge>", ns::SASL);
    session.respond(&auth, 200, &wrap(&challenge));

    assert_eq!(session.conn.status(), Status::AuthFail);
    assert!(session.tick().is_empty());
    assert!(!session.conn.is_authenticated());
}

#[test]
fn sasl_failure_reports_condition() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));

    let auth = session.tick_one();
    session.respond(
        &auth,
        200,
        &wrap(&format!("<failure xmlns='{}'><not-authorized/></failure>", ns::SASL)),
    );

    assert_eq!(session.last(), Some((Status::AuthFail, Some("not-authorized".to_string()))));
}

#[test]
fn bind_conflict_is_auth_failure() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));
    let auth = session.tick_one();
    session.respond(&auth, 200, &wrap(&format!("<success xmlns='{}'/>", ns::SASL)));
    let restart = session.tick_one();
    session.respond(&restart, 200, &wrap(&bind_features()));

    let bind = session.tick_one();
    let iq = parse(&bind);
    let resource = iq.descendants("resource");
    assert_eq!(resource.first().map(|resource| resource.text()), Some("balcony".to_string()));

    session.respond(
        &bind,
        200,
        &wrap(
            "<iq type='error' id='_bind_auth_2' xmlns='jabber:client'>\
             <error type='cancel'><conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
             </error></iq>",
        ),
    );
    assert_eq!(session.last(), Some((Status::AuthFail, Some("conflict".to_string()))));
}

#[test]
fn bind_without_session_connects_directly() {
    let mut session = Session::new();
    let request = session.connect("juliet@capulet.lit", Some(PASSWORD));
    session.respond(&request, 200, &session_response(&mechanisms(&["PLAIN"])));
    let auth = session.tick_one();
    session.respond(&auth, 200, &wrap(&format!("<success xmlns='{}'/>", ns::SASL)));
    let restart = session.tick_one();
    session.respond(
        &restart,
        200,
        &wrap(&format!(
            "<stream:features xmlns:stream='{}'><bind xmlns='{}'/></stream:features>",
            ns::STREAM,
            ns::BIND
        )),
    );

    let bind = session.tick_one();
    assert!(parse(&bind).descendants("resource").is_empty());
    session.respond(&bind, 200, &wrap(&bind_result("juliet@capulet.lit/server-chosen")));

    assert_eq!(session.conn.status(), Status::Connected);
    assert_eq!(session.conn.jid(), "juliet@capulet.lit/server-chosen");
}

#[test]
fn legacy_auth_when_only_iq_auth_is_offered() {
    let mut session = Session::new();
    let request = session.connect("juliet@capulet.lit", Some(PASSWORD));
    session.respond(
        &request,
        200,
        &session_response(&format!("<auth xmlns='{}'/>", ns::IQ_AUTH_FEATURE)),
    );

    let query = session.tick_one();
    let iq = parse(&query);
    assert_eq!(iq.child("iq").and_then(|iq| iq.attr("id")), Some("_auth_1"));
    session.respond(&query, 200, &wrap("<iq type='result' id='_auth_1' xmlns='jabber:client'/>"));

    let set = session.tick_one();
    let iq = parse(&set);
    let fields: Vec<String> = ["username", "password", "resource"]
        .iter()
        .map(|name| iq.descendants(name).first().map(|field| field.text()).unwrap_or_default())
        .collect();
    assert_eq!(fields, vec!["juliet", PASSWORD, "strophe"]);

    session.respond(&set, 200, &wrap("<iq type='result' id='_auth_2' xmlns='jabber:client'/>"));
    assert_eq!(session.conn.status(), Status::Connected);
    assert_eq!(session.conn.jid(), "juliet@capulet.lit/strophe");
}

#[test]
fn features_are_polled_until_mechanisms_arrive() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(
        &request,
        200,
        &format!("<body xmlns='{}' sid='sid-1' wait='60' requests='2' hold='1'/>", ns::HTTPBIND),
    );

    let mut sent = session.transmits();
    assert_eq!(sent.len(), 1, "features poll goes out immediately");
    let poll = sent.remove(0);
    assert_eq!(poll.rid, request.rid + 1);
    assert_eq!(parse(&poll).attr("sid"), Some("sid-1"));

    session.respond(&poll, 200, &wrap(&format!(
        "<stream:features xmlns:stream='{}'>{}</stream:features>",
        ns::STREAM,
        mechanisms(&["PLAIN"])
    )));
    assert_eq!(session.conn.status(), Status::Authenticating);
}

#[test]
fn session_response_overrides_timing() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    session.respond(
        &request,
        200,
        &format!(
            "<body xmlns='{}' sid='s' wait='30' requests='3' hold='2'>\
             <stream:features xmlns:stream='{}'>{}</stream:features></body>",
            ns::HTTPBIND,
            ns::STREAM,
            mechanisms(&["PLAIN"])
        ),
    );

    assert_eq!(session.conn.wait(), 30);
    assert_eq!(session.conn.window(), 3);
    assert_eq!(session.conn.hold(), 2);
    assert_eq!(session.conn.requests().timing().primary_timeout(), Duration::from_secs(33));
}

#[test]
fn stanzas_queued_in_one_tick_share_a_body() {
    let mut session = Session::new();
    session.establish();

    for body in ["one", "two", "three"] {
        session.conn.send(stanza::message("romeo@montague.lit", Some("chat")).with_child(
            Element::new("body").with_text(body),
        ));
    }
    let sent = session.tick_one();
    let body = parse(&sent);

    let texts: Vec<String> = body
        .children()
        .map(|message| message.child("body").map(Element::text).unwrap_or_default())
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[test]
fn authenticated_idle_session_polls() {
    let mut session = Session::new();
    session.establish();

    let poll = session.tick_one();
    assert_eq!(parse(&poll).children().count(), 0);

    // A poll in flight suppresses the next one
    assert!(session.tick().is_empty());
}

#[test]
fn paused_connection_holds_stanzas() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();
    session.respond(&poll, 200, &wrap(""));

    session.conn.pause();
    session.conn.send(stanza::presence(None));
    assert!(session.tick().is_empty());
    assert_eq!(session.conn.pending_len(), 1);

    session.conn.resume();
    let sent = session.tick_one();
    assert!(parse(&sent).child("presence").is_some());
}

#[test]
fn four_server_errors_are_tolerated() {
    let mut session = Session::new();
    session.establish();
    let mut current = session.tick_one();

    for attempt in 1..=4u32 {
        session.respond(&current, 500, "");
        let mut resent = session.transmits();
        assert_eq!(resent.len(), 1, "attempt {attempt} is resent");
        let next = resent.remove(0);
        assert_eq!(next.rid, current.rid, "a resend keeps its rid");
        assert_ne!(next.request, current.request);
        current = next;
    }

    assert_eq!(session.conn.status(), Status::Connected);
    assert_eq!(session.conn.requests().errors(), 4);
    assert_eq!(current.delay, Duration::from_secs(64));
}

#[test]
fn fifth_consecutive_error_forces_disconnect() {
    let mut session = Session::new();
    session.establish();
    let mut current = session.tick_one();

    for _ in 0..4 {
        session.respond(&current, 500, "");
        current = session.transmits().remove(0);
    }
    session.respond(&current, 500, "");

    assert_eq!(session.conn.status(), Status::Disconnected);
    assert!(!session.conn.is_connected());
    assert!(session.conn.requests().is_empty());
}

#[test]
fn success_resets_the_error_count() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(&poll, 503, "");
    let retry = session.transmits().remove(0);
    assert_eq!(session.conn.requests().errors(), 1);

    session.respond(&retry, 200, &wrap(""));
    assert_eq!(session.conn.requests().errors(), 0);
}

#[test]
fn client_error_tears_the_session_down() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(&poll, 404, "");

    let tail: Vec<Status> = session.statuses().into_iter().skip(3).collect();
    assert_eq!(tail, vec![Status::Disconnecting, Status::Disconnected]);
}

#[test]
fn primary_timeout_aborts_and_resends() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.advance(Duration::from_secs(67));
    let actions = session.actions();

    assert!(actions.contains(&ConnectionAction::Abort { request: poll.request }));
    let resend = actions.iter().find_map(|action| match action {
        ConnectionAction::Transmit(transmit) => Some(transmit.clone()),
        ConnectionAction::Abort { .. } => None,
    });
    assert_eq!(resend.map(|transmit| transmit.rid), Some(poll.rid));

    // The aborted attempt's late completion is ignored
    session.respond(&poll, 200, &wrap("<message xmlns='jabber:client'/>"));
    assert_eq!(session.conn.requests().len(), 1);
}

#[test]
fn terminate_maps_condition() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(
        &poll,
        200,
        &format!("<body xmlns='{}' type='terminate' condition='policy-violation'/>", ns::HTTPBIND),
    );

    assert_eq!(session.last_condition(Status::ConnFail), Some("policy-violation".to_string()));
    assert_eq!(session.conn.status(), Status::Disconnected);
}

#[test]
fn remote_stream_conflict_maps_to_conflict() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(
        &poll,
        200,
        &format!(
            "<body xmlns='{}' type='terminate' condition='remote-stream-error'>\
             <stream:error xmlns:stream='{}'>\
             <conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></stream:error></body>",
            ns::HTTPBIND,
            ns::STREAM
        ),
    );

    assert_eq!(session.last_condition(Status::ConnFail), Some("conflict".to_string()));
}

#[test]
fn terminate_without_condition_is_unknown() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(&poll, 200, &format!("<body xmlns='{}' type='terminate'/>", ns::HTTPBIND));

    assert_eq!(session.last_condition(Status::ConnFail), Some("unknown".to_string()));
}

#[test]
fn malformed_body_disconnects_with_parser_error() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(&poll, 200, "<body xmlns='http://jabber.org/protocol/httpbind'><message>");

    assert_eq!(
        session.last(),
        Some((Status::Disconnecting, Some("strophe-parsererror".to_string())))
    );
    let terminate = session.transmits();
    assert!(terminate.iter().any(|transmit| parse(transmit).attr("type") == Some("terminate")));
}

#[test]
fn graceful_disconnect_sends_unavailable_presence() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();
    session.respond(&poll, 200, &wrap(""));

    session.conn.disconnect(Some("bye"));
    session.conn.disconnect(None);
    let terminate = session.transmits().remove(0);
    let body = parse(&terminate);
    assert_eq!(body.attr("type"), Some("terminate"));
    assert_eq!(
        body.child("presence").and_then(|presence| presence.attr("type")),
        Some("unavailable")
    );

    session.respond(&terminate, 200, &wrap(""));
    let tail: Vec<Status> = session.statuses().into_iter().skip(3).collect();
    assert_eq!(tail, vec![Status::Disconnecting, Status::Disconnected]);
}

#[test]
fn unanswered_disconnect_times_out() {
    let mut session = Session::new();
    session.establish();

    session.conn.disconnect(None);
    let terminate = session.transmits().remove(0);

    for _ in 0..40 {
        session.tick();
    }
    assert_eq!(session.conn.status(), Status::Disconnected);

    // Late acknowledgement of the aborted terminate is ignored
    session.respond(&terminate, 200, &wrap(""));
    assert_eq!(
        session.statuses().iter().filter(|status| **status == Status::Disconnected).count(),
        1
    );
}

#[test]
fn connect_twice_is_rejected() {
    let mut session = Session::new();
    session.connect(JID, Some(PASSWORD));

    let err = session.conn.connect(JID, None, |_, _| {}, session.now).unwrap_err();
    assert!(matches!(err, ConnectionError::InvalidState { operation: "connect", .. }));
}

#[test]
fn reset_allows_a_fresh_connect() {
    let mut session = Session::new();
    session.establish();
    session.tick_one();

    session.conn.reset();
    assert_eq!(session.conn.status(), Status::Disconnected);
    assert!(session.conn.requests().is_empty());
    assert!(session.conn.poll_timeout().is_none());

    let request = session.connect(JID, Some(PASSWORD));
    assert!(parse(&request).attr("sid").is_none());
}

#[test]
fn unique_ids_increase() {
    let mut session = Session::new();
    let first = session.conn.unique_id("sendIQ");
    let second = session.conn.unique_id("");

    let (counter, suffix) = first.split_once(':').unwrap();
    assert_eq!(suffix, "sendIQ");
    assert_eq!(second.parse::<u64>().unwrap(), counter.parse::<u64>().unwrap() + 1);
}

struct Recorder {
    log: Rc<RefCell<Vec<String>>>,
}

impl Plugin for Recorder {
    fn status_changed(&mut self, status: Status, _condition: Option<&str>) {
        self.log.borrow_mut().push(format!("plugin:{status:?}"));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn plugins_hear_status_before_the_callback() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut plugins: PluginRegistry<TestEnv> = PluginRegistry::new();
    let plugin_log = Rc::clone(&log);
    plugins.register("recorder", move |_| -> Box<dyn Plugin> {
        Box::new(Recorder { log: Rc::clone(&plugin_log) })
    });

    let mut session = Session::with_plugins(ConnectionConfig::default(), &plugins);
    let callback_log = Rc::clone(&log);
    session
        .conn
        .connect(JID, Some(PASSWORD.to_string()), move |status, _| {
            callback_log.borrow_mut().push(format!("callback:{status:?}"));
        }, session.now)
        .unwrap();

    assert_eq!(*log.borrow(), vec!["plugin:Connecting", "callback:Connecting"]);
    assert!(session.conn.plugin::<Recorder>("recorder").is_some());
    assert!(session.conn.plugin::<Recorder>("missing").is_none());
}

#[test]
fn client_error_on_the_fifth_failure_reports_once() {
    let mut session = Session::new();
    session.establish();
    let mut current = session.tick_one();

    for _ in 0..4 {
        session.respond(&current, 500, "");
        current = session.transmits().remove(0);
    }
    session.respond(&current, 404, "");

    let tail: Vec<Status> = session.statuses().into_iter().skip(3).collect();
    assert_eq!(tail, vec![Status::Disconnected, Status::Disconnecting]);
    assert!(!session.conn.is_connected());
}

#[test]
fn completing_the_second_slot_restarts_the_first_after_the_secondary_timeout() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();
    session.conn.send(stanza::message(JID, Some("chat")));
    let second = session.tick_one();
    assert_eq!(second.rid, poll.rid + 1);

    session.respond(&second, 200, &wrap(""));
    assert!(session.conn.requests().get(0).is_some_and(|first| first.is_dead()));

    session.advance(Duration::from_secs(5));
    assert!(session.actions().is_empty(), "dead for less than the secondary timeout");

    session.advance(Duration::from_secs(2));
    let actions = session.actions();
    assert!(actions.contains(&ConnectionAction::Abort { request: poll.request }));
    let resent: Vec<u64> = actions
        .iter()
        .filter_map(|action| match action {
            ConnectionAction::Transmit(transmit) => Some(transmit.rid),
            ConnectionAction::Abort { .. } => None,
        })
        .collect();
    assert_eq!(resent, vec![poll.rid]);
}

#[test]
fn completing_the_first_slot_restarts_an_aged_sibling() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();
    session.conn.send(stanza::message(JID, Some("chat")));
    let second = session.tick_one();

    session.advance(Duration::from_secs(7));
    assert!(session.actions().is_empty());

    session.respond(&poll, 200, &wrap(""));
    let sibling = session.conn.requests().get(0).map(|first| (first.rid(), first.is_dead()));
    assert_eq!(sibling, Some((second.rid, true)));

    session.advance(Duration::from_secs(7));
    let actions = session.actions();
    assert!(actions.contains(&ConnectionAction::Abort { request: second.request }));
    let resend = actions.iter().find_map(|action| match action {
        ConnectionAction::Transmit(transmit) => Some(transmit.clone()),
        ConnectionAction::Abort { .. } => None,
    });
    assert_eq!(
        resend.map(|transmit| (transmit.rid, transmit.body)),
        Some((second.rid, second.body))
    );
}

#[test]
fn fresh_sibling_is_left_alone() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();
    session.conn.send(stanza::message(JID, Some("chat")));
    let second = session.tick_one();

    session.respond(&poll, 200, &wrap(""));
    assert!(session.conn.requests().get(0).is_some_and(|first| !first.is_dead()));

    session.advance(Duration::from_secs(7));
    assert!(!session.actions().contains(&ConnectionAction::Abort { request: second.request }));
}

#[test]
fn aborted_attempts_are_released() {
    let mut session = Session::new();
    session.establish();
    session.tick_one();

    for wait in [67, 67, 76] {
        session.advance(Duration::from_secs(wait));
        let aborted = session
            .actions()
            .iter()
            .filter(|action| matches!(action, ConnectionAction::Abort { .. }))
            .count();
        assert_eq!(aborted, 1);
    }
    assert_eq!(session.conn.requests().aborted_len(), 3);

    session.conn.reset();
    assert_eq!(session.conn.requests().aborted_len(), 0);
}

#[test]
fn cancelled_attempts_leave_no_marker() {
    let mut session = Session::new();
    session.establish();
    session.tick_one();

    session.advance(Duration::from_secs(67));
    for action in session.actions() {
        if let ConnectionAction::Abort { request } = action {
            session.conn.handle_cancelled(request);
        }
    }
    assert_eq!(session.conn.requests().aborted_len(), 0);
    assert_eq!(session.conn.requests().len(), 1);
}

#[test]
fn unexpected_http_status_reports_error_and_keeps_the_session() {
    let mut session = Session::new();
    session.establish();
    let poll = session.tick_one();

    session.respond(&poll, 302, "");

    assert_eq!(
        session.last(),
        Some((Status::Error, Some("x-parley-unexpected-http-status".to_string())))
    );
    assert!(session.conn.is_connected());
    assert!(session.conn.requests().is_empty());
    assert_eq!(session.conn.requests().errors(), 0);
    assert_eq!(session.tick_one().rid, poll.rid + 1);
}

#[test]
fn connect_overrides_replace_configured_timing() {
    let mut session = Session::new();
    let recorder = session.recorder();
    let options = ConnectOptions {
        wait: Some(30),
        hold: Some(2),
        route: Some("xmpp:capulet.lit:5222".to_string()),
    };
    session
        .conn
        .connect_with(JID, Some(PASSWORD.to_string()), options, recorder, session.now)
        .unwrap();

    let request = parse(&session.transmits().remove(0));
    assert_eq!(request.attr("wait"), Some("30"));
    assert_eq!(request.attr("hold"), Some("2"));
    assert_eq!(request.attr("route"), Some("xmpp:capulet.lit:5222"));
    assert_eq!(session.conn.wait(), 30);
    assert_eq!(session.conn.hold(), 2);
}

#[test]
fn zero_connect_override_is_rejected() {
    let mut session = Session::new();
    let recorder = session.recorder();
    let options = ConnectOptions { hold: Some(0), ..ConnectOptions::default() };

    let err = session.conn.connect_with(JID, None, options, recorder, session.now).unwrap_err();

    assert!(matches!(err, ConnectionError::InvalidConfig(_)));
    assert_eq!(session.conn.status(), Status::Disconnected);
    assert!(session.transmits().is_empty());
}

#[test]
fn deeply_nested_body_disconnects_with_parser_error() {
    let mut session = Session::new();
    let request = session.connect(JID, Some(PASSWORD));
    let hostile = wrap(&"<a>".repeat(200_000));

    session.respond(&request, 200, &hostile);

    assert_eq!(
        session.last_condition(Status::Disconnecting).as_deref(),
        Some("strophe-parsererror")
    );
    assert!(!session.statuses().contains(&Status::Authenticating));
}
