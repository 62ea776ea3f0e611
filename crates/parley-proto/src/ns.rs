//! XML namespace constants used on the wire.

/// BOSH `<body/>` wrapper namespace
pub const HTTPBIND: &str = "http://jabber.org/protocol/httpbind";

/// XEP-0206 `xmpp:` attribute prefix namespace
pub const BOSH: &str = "urn:xmpp:xbosh";

/// Default namespace for client stanzas
pub const CLIENT: &str = "jabber:client";

/// Legacy non-SASL authentication
pub const AUTH: &str = "jabber:iq:auth";

/// SASL negotiation
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// Stream-level elements (`stream:features`, `stream:error`)
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// Resource binding
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// Session establishment
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";

/// Stanza error conditions
pub const STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Stream feature advertising legacy authentication
pub const IQ_AUTH_FEATURE: &str = "http://jabber.org/features/iq-auth";

/// XMPP ping
pub const PING: &str = "urn:xmpp:ping";
