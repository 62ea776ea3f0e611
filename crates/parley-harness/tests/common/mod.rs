//! Shared setup for end-to-end tests.

#![allow(dead_code)]

use std::time::Duration;

use parley_core::{ConnectionConfig, PluginRegistry, Status};
use parley_harness::{Driver, ServerConfig, SimEnv, SimServer};
use tracing_subscriber::EnvFilter;

pub const SERVICE: &str = "http://capulet.lit/http-bind";
pub const JID: &str = "juliet@capulet.lit/balcony";
pub const PASSWORD: &str = "r0m30";

/// Virtual time budget for one phase of a test
pub const LIMIT: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn server(config: ServerConfig) -> SimServer {
    SimServer::new(config).with_user("juliet", PASSWORD)
}

pub fn offering(mechanisms: &[&str]) -> ServerConfig {
    ServerConfig {
        mechanisms: mechanisms.iter().map(|name| (*name).to_string()).collect(),
        ..ServerConfig::default()
    }
}

pub fn driver(server: &SimServer) -> Driver<SimServer> {
    driver_with(server, SimEnv::new(), ConnectionConfig::default(), &PluginRegistry::new())
}

pub fn driver_with(
    server: &SimServer,
    env: SimEnv,
    config: ConnectionConfig,
    plugins: &PluginRegistry<SimEnv>,
) -> Driver<SimServer> {
    init_tracing();
    Driver::new(SERVICE, env, config, plugins, server.clone()).unwrap()
}

/// Connect and wait for `Connected`
pub async fn login(driver: &mut Driver<SimServer>, jid: &str, password: Option<&str>) {
    driver.connect(jid, password).unwrap();
    driver.wait_for(Status::Connected, LIMIT).await.unwrap_or_else(|err| {
        panic!("login failed: {err}, statuses {:?}", driver.statuses())
    });
}

/// Oracle: no stanza ever reached the server
pub fn verify_no_stanzas(server: &SimServer, context: &str) {
    let stanzas = server.received_stanzas();
    assert!(
        stanzas.is_empty(),
        "{context}: server received {} stanzas: {stanzas:?}",
        stanzas.len()
    );
}

/// Oracle: fresh rids increase by one, retransmissions reuse theirs
pub fn verify_rid_sequence(server: &SimServer, context: &str) {
    let mut highest: Option<u64> = None;
    for body in server.received() {
        let rid: u64 = body.attr("rid").and_then(|rid| rid.parse().ok()).unwrap_or_else(|| {
            panic!("{context}: body without rid: {}", body.to_xml())
        });
        match highest {
            Some(top) if rid <= top => {},
            Some(top) => {
                assert_eq!(rid, top + 1, "{context}: rid jumped from {top} to {rid}");
                highest = Some(rid);
            },
            None => highest = Some(rid),
        }
    }
}
