//! # Parley Protocol: Wire Format
//!
//! This crate implements the XML layer of BOSH (XEP-0124/XEP-0206): every
//! HTTP request and response carries one `<body/>` element that wraps zero or
//! more XMPP stanzas.
//!
//! ## Layout
//!
//! - [`element`]: owned element tree with parsing and serialization
//! - [`body`]: `<body/>` envelopes (session request, restart, terminate)
//! - [`stanza`]: `iq` / `message` / `presence` builders
//! - [`jid`]: `node@domain/resource` splitting
//! - [`ns`]: namespace constants
//!
//! ## Implementation Notes
//!
//! - **Owned tree**: inbound bodies are small and handlers inspect them
//!   repeatedly, so they are parsed once into [`Element`] and never
//!   re-parsed. Outbound stanzas are built the same way and serialized when
//!   a request is flushed.
//!
//! - **Deterministic output**: attribute order is insertion order and
//!   attribute values are always double-quoted, so the same body always
//!   serializes to the same bytes. Snapshot tests rely on this.
//!
//! - **Explicit Validation**: parsing returns [`ProtocolError`] for every
//!   malformed input. There are no panicking fast paths.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod body;
pub mod element;
pub mod errors;
pub mod jid;
pub mod ns;
pub mod stanza;

pub use element::{Element, Node};
pub use errors::{ProtocolError, Result};
