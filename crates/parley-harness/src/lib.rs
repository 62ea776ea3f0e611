//! Deterministic simulation harness for the parley BOSH engine.
//!
//! This crate runs a sans-IO [`parley_core::Connection`] against an
//! in-memory BOSH server on tokio's paused clock:
//!
//! - [`SimEnv`]: virtual time and a seeded RNG
//! - [`SimServer`]: connection manager and XMPP server behind the
//!   [`parley_core::HttpTransport`] trait, with fault injection
//! - [`Driver`]: executes connection actions and feeds completions back
//!
//! Identical seeds replay identical wire traffic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod sim_env;
pub mod sim_server;

pub use driver::Driver;
pub use sim_env::SimEnv;
pub use sim_server::{Fault, ServerConfig, SimServer};
