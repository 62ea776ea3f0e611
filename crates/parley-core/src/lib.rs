//! Parley BOSH session engine
//!
//! This crate contains the pure state machine logic of a client-side BOSH
//! (XEP-0124/XEP-0206) connection: an XMPP stream emulated over a sequence
//! of HTTP request/response exchanges. It is completely decoupled from I/O,
//! enabling deterministic testing.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Protocol logic is strictly separated from transport concerns:
//!
//! ```text
//!      ┌─────────────────────────────┐
//!      │ parley-core                 │
//!      │ - Request window and retry  │
//!      │ - Idle scheduler            │
//!      │ - SASL / bind / session     │
//!      │ - Handler dispatch          │
//!      └─────────────────────────────┘
//!         ↓                       ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ parley-harness   │  │ production       │
//! │ (tokio, paused)  │  │ driver           │
//! │ - Virtual time   │  │ - HTTP client    │
//! │ - Seeded RNG     │  │ - System clock   │
//! │ - SimServer      │  │ - OS entropy     │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: Never call `tokio::spawn`, `std::time::Instant::now()`,
//!   or `rand::thread_rng()` directly
//! - Environment Trait: randomness goes through [`env::Environment`]; time is
//!   passed in by the driver
//! - Deterministic: Given the same inputs and environment state, produce the
//!   same outputs
//!
//! # Modules
//!
//! - [`connection`]: Connection state machine and public operations
//! - [`request`]: Request window, staleness and backoff
//! - [`handler`]: Stanza and timed handler registries
//! - [`auth`]: Mechanism selection and SASL payloads
//! - [`crypto`]: DIGEST-MD5 and SCRAM-SHA-1 derivations
//! - [`plugin`]: Per-connection extensions
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`transport`]: HTTP transport abstraction
//! - [`config`], [`status`], [`error`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod config;
pub mod connection;
pub mod crypto;
mod dispatch;
pub mod env;
pub mod error;
pub mod handler;
mod idle;
pub mod plugin;
pub mod request;
pub mod status;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{ConnectOptions, Connection, ConnectionAction, SessionAttachment, Transmit};
pub use env::Environment;
pub use error::{AuthError, ConnectionError, HandlerError};
pub use handler::{HandlerId, Matcher, TimedHandlerId};
pub use plugin::{Plugin, PluginRegistry};
pub use request::RequestId;
pub use status::Status;
pub use transport::{HttpResponse, HttpTransport};
