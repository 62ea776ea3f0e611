//! End-to-end behaviour of an established session.

mod common;

use std::{any::Any, cell::RefCell, rc::Rc, time::Duration};

use common::{JID, LIMIT, PASSWORD, driver, driver_with, login, server, verify_rid_sequence};
use parley_core::{
    Connection, ConnectionConfig, Matcher, Plugin, PluginRegistry, Status, SessionAttachment,
};
use parley_harness::{ServerConfig, SimEnv, SimServer};
use parley_proto::{Element, ns, stanza};

type Seen = Rc<RefCell<Vec<String>>>;

#[tokio::test(start_paused = true)]
async fn message_to_self_is_echoed() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;

    let seen = Seen::default();
    let sink = Rc::clone(&seen);
    let chat = Matcher::new().name("message").stanza_type("chat");
    driver.conn_mut().add_handler(chat, move |_, message| {
        sink.borrow_mut().push(message.child("body").map(Element::text).unwrap_or_default());
        Ok(true)
    });
    driver.conn_mut().send(
        stanza::message("juliet@capulet.lit", Some("chat"))
            .with_child(Element::new("body").with_text("hello")),
    );

    driver.run_until(|_| !seen.borrow().is_empty(), LIMIT).await.unwrap();
    assert_eq!(*seen.borrow(), vec!["hello"]);
    assert_eq!(server.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stanzas_sent_together_share_a_body() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;
    let before = server.received().len();

    driver.conn_mut().send_all((1..=3).map(|n| {
        stanza::message("romeo@montague.lit", Some("chat"))
            .with_child(Element::new("body").with_text(format!("line {n}")))
    }));
    driver.run_until(|_| false, Duration::from_secs(1)).await.unwrap_err();

    let carrying: Vec<usize> = server.received()[before..]
        .iter()
        .map(|body| body.children().count())
        .filter(|count| *count > 0)
        .collect();
    assert_eq!(carrying, vec![3]);
}

#[tokio::test(start_paused = true)]
async fn idle_session_keeps_polling() {
    let server =
        server(ServerConfig { hold_for: Duration::from_secs(1), ..ServerConfig::default() });
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;
    let before = server.received().len();

    driver.settle(Duration::from_secs(10)).await;

    let polls = server.received().len() - before;
    assert!((5..=12).contains(&polls), "expected roughly one poll per held second, got {polls}");
    assert!(driver.conn().requests().len() <= 1);
    verify_rid_sequence(&server, "idle polling");
}

#[tokio::test(start_paused = true)]
async fn send_iq_resolves_with_the_reply() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;

    let outcome: Rc<RefCell<Option<&'static str>>> = Rc::default();
    let on_result = Rc::clone(&outcome);
    let on_error = Rc::clone(&outcome);
    let ping = stanza::iq("get", None)
        .with_attr("to", "capulet.lit")
        .with_child(Element::new("ping").with_attr("xmlns", ns::PING));
    driver
        .conn_mut()
        .send_iq(
            ping,
            move |_, _| *on_result.borrow_mut() = Some("result"),
            move |_, _| *on_error.borrow_mut() = Some("error"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    driver.run_until(|_| outcome.borrow().is_some(), LIMIT).await.unwrap();
    assert_eq!(*outcome.borrow(), Some("result"));
}

#[tokio::test(start_paused = true)]
async fn send_iq_times_out_when_unanswered() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;

    let timed_out = Rc::new(RefCell::new(None::<Duration>));
    let flag = Rc::clone(&timed_out);
    let started = tokio::time::Instant::now();
    let query = stanza::iq("get", None)
        .with_child(Element::new("query").with_attr("xmlns", "jabber:iq:version"));
    driver
        .conn_mut()
        .send_iq(
            query,
            |_, _| panic!("server never answers version queries"),
            move |_, reply| {
                assert!(reply.is_none());
                *flag.borrow_mut() = Some(started.elapsed());
            },
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    driver.run_until(|_| timed_out.borrow().is_some(), LIMIT).await.unwrap();
    let elapsed = timed_out.borrow().unwrap_or_default();
    assert!(
        elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6),
        "fired after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_iq_errors_reach_the_error_callback() {
    let server = server(ServerConfig { answer_unknown_iqs: true, ..ServerConfig::default() });
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;

    let error: Rc<RefCell<Option<String>>> = Rc::default();
    let sink = Rc::clone(&error);
    driver
        .conn_mut()
        .send_iq(
            stanza::iq("get", None)
                .with_child(Element::new("query").with_attr("xmlns", "jabber:iq:version")),
            |_, _| {},
            move |_, reply| {
                let condition = reply.and_then(|reply| {
                    reply.descendants("service-unavailable").first().map(|c| c.name().to_string())
                });
                *sink.borrow_mut() = condition;
            },
            None,
        )
        .unwrap();

    driver.run_until(|_| error.borrow().is_some(), LIMIT).await.unwrap();
    assert_eq!(error.borrow().as_deref(), Some("service-unavailable"));
}

#[tokio::test(start_paused = true)]
async fn graceful_disconnect_ends_the_session() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;

    driver.conn_mut().disconnect(None);
    driver.wait_for(Status::Disconnected, LIMIT).await.unwrap();

    let tail: Vec<Status> = driver.statuses().into_iter().skip(3).collect();
    assert_eq!(tail, vec![Status::Disconnecting, Status::Disconnected]);
    assert_eq!(server.live_sessions(), 0);
    let presence = server.delivered().into_iter().find(|stanza| stanza.is_named("presence"));
    assert_eq!(
        presence.and_then(|presence| presence.attr("type").map(str::to_owned)).as_deref(),
        Some("unavailable")
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect() {
    let server = server(ServerConfig::default());
    let mut driver = driver(&server);
    login(&mut driver, JID, Some(PASSWORD)).await;
    driver.conn_mut().disconnect(None);
    driver.wait_for(Status::Disconnected, LIMIT).await.unwrap();

    login(&mut driver, JID, Some(PASSWORD)).await;

    assert_eq!(server.sessions_created(), 2);
    assert_eq!(server.live_sessions(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_resumes_without_authentication() {
    let server = server(ServerConfig::default());
    let mut first = driver(&server);
    login(&mut first, JID, Some(PASSWORD)).await;
    let sid = first.conn().sid().unwrap().to_string();
    let rid = first.conn().rid() + 10;
    drop(first);

    let mut second = driver(&server);
    second.attach(SessionAttachment::new(JID, sid.as_str(), rid)).unwrap();
    second.settle(Duration::from_secs(3)).await;

    assert_eq!(second.statuses(), vec![Status::Attached]);
    let polled =
        server.received().iter().any(|body| body.attr("rid") == Some(rid.to_string().as_str()));
    assert!(polled, "attached connection polls with the handed-over rid");
}

/// Answers server pings and counts status changes
struct PingPlugin {
    answered: Rc<RefCell<u32>>,
    statuses: Vec<Status>,
}

impl PingPlugin {
    fn install(conn: &mut Connection<SimEnv>) -> Box<dyn Plugin> {
        let answered = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&answered);
        conn.add_handler(Matcher::new().name("iq").stanza_type("get"), move |conn, iq| {
            let is_ping = iq
                .children()
                .any(|child| child.is_named("ping") && child.xmlns() == Some(ns::PING));
            if is_ping {
                let mut pong = stanza::iq("result", iq.attr("id"));
                if let Some(from) = iq.attr("from") {
                    pong.set_attr("to", from);
                }
                conn.send(pong);
                *counter.borrow_mut() += 1;
            }
            Ok(true)
        });
        Box::new(Self { answered, statuses: Vec::new() })
    }
}

impl Plugin for PingPlugin {
    fn status_changed(&mut self, status: Status, _condition: Option<&str>) {
        self.statuses.push(status);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[tokio::test(start_paused = true)]
async fn plugin_answers_server_pings() {
    let server = server(ServerConfig::default());
    let mut plugins = PluginRegistry::new();
    plugins.register("ping", PingPlugin::install);
    let mut driver = driver_with(&server, SimEnv::new(), ConnectionConfig::default(), &plugins);
    login(&mut driver, JID, Some(PASSWORD)).await;

    server.push(
        stanza::iq("get", Some("srv-ping-1"))
            .with_attr("from", "capulet.lit")
            .with_child(Element::new("ping").with_attr("xmlns", ns::PING)),
    );
    let replies = server.clone();
    driver.run_until(move |_| !replies.iq_replies().is_empty(), LIMIT).await.unwrap();

    let reply = &server.iq_replies()[0];
    assert_eq!(reply.attr("id"), Some("srv-ping-1"));
    assert_eq!(reply.attr("type"), Some("result"));

    let plugin = driver.conn().plugin::<PingPlugin>("ping").unwrap();
    assert_eq!(*plugin.answered.borrow(), 1);
    assert_eq!(
        plugin.statuses,
        vec![Status::Connecting, Status::Authenticating, Status::Connected]
    );
}

async fn scripted_run(seed: u64) -> Vec<String> {
    let server = SimServer::new(ServerConfig { seed, ..ServerConfig::default() })
        .with_user("juliet", PASSWORD);
    let mut driver = driver_with(
        &server,
        SimEnv::with_seed(seed),
        ConnectionConfig::default(),
        &PluginRegistry::new(),
    );
    login(&mut driver, JID, Some(PASSWORD)).await;
    driver.conn_mut().send(stanza::presence(None));
    driver.settle(Duration::from_secs(5)).await;
    driver.conn_mut().disconnect(None);
    driver.wait_for(Status::Disconnected, LIMIT).await.unwrap();
    server.received().iter().map(Element::to_xml).collect()
}

#[tokio::test(start_paused = true)]
async fn same_seed_replays_the_same_traffic() {
    let first = scripted_run(7).await;
    let second = scripted_run(7).await;
    let other = scripted_run(8).await;

    assert_eq!(first, second);
    assert_ne!(first, other);
}
