//! BOSH `<body/>` envelopes.
//!
//! Every HTTP request carries exactly one `<body/>` element in the
//! [`ns::HTTPBIND`] namespace. Outbound bodies always carry `rid` and, once
//! the server assigned one, `sid`. Three shapes exist besides the plain
//! stanza wrapper:
//!
//! - **Session request**: first body of a session, advertising `wait`,
//!   `hold` and the XEP-0206 version
//! - **Restart**: `xmpp:restart="true"` after SASL success, no children
//! - **Terminate**: `type="terminate"`, optionally wrapping a final stanza
//!
//! Inbound bodies are parsed with [`parse_response`], which also checks the
//! root element.

use crate::{
    element::Element,
    errors::{ProtocolError, Result},
    ns,
};

/// Content type advertised in the session request
pub const CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// BOSH protocol version advertised in the session request
pub const BOSH_VERSION: &str = "1.6";

/// XMPP version advertised in the session request
pub const XMPP_VERSION: &str = "1.0";

/// Parameters of the session-creation body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams<'a> {
    /// Target domain (`to`)
    pub to: &'a str,
    /// Stream language (`xml:lang`)
    pub lang: &'a str,
    /// Longest time in seconds the server may hold a request
    pub wait: u32,
    /// Maximum number of requests the server may hold
    pub hold: u32,
    /// Optional `xmpp:host:port` route
    pub route: Option<&'a str>,
}

/// Empty body carrying `rid` and, if known, `sid`
#[must_use]
pub fn body(rid: u64, sid: Option<&str>) -> Element {
    let mut body =
        Element::new("body").with_attr("rid", rid.to_string()).with_attr("xmlns", ns::HTTPBIND);
    if let Some(sid) = sid {
        body.set_attr("sid", sid);
    }
    body
}

/// First body of a new session
#[must_use]
pub fn session_request(rid: u64, params: &SessionParams<'_>) -> Element {
    let mut body = body(rid, None)
        .with_attr("to", params.to)
        .with_attr("xml:lang", params.lang)
        .with_attr("wait", params.wait.to_string())
        .with_attr("hold", params.hold.to_string())
        .with_attr("content", CONTENT_TYPE)
        .with_attr("ver", BOSH_VERSION)
        .with_attr("xmpp:version", XMPP_VERSION)
        .with_attr("xmlns:xmpp", ns::BOSH);
    if let Some(route) = params.route {
        body.set_attr("route", route);
    }
    body
}

/// Add the stream-restart attribute set to an outbound body
pub fn mark_restart(body: &mut Element, to: &str, lang: &str) {
    body.set_attr("to", to);
    body.set_attr("xml:lang", lang);
    body.set_attr("xmpp:restart", "true");
    body.set_attr("xmlns:xmpp", ns::BOSH);
}

/// Terminate body; the caller may append a final stanza
#[must_use]
pub fn terminate(rid: u64, sid: Option<&str>) -> Element {
    body(rid, sid).with_attr("type", "terminate")
}

/// Parse an inbound HTTP response body.
///
/// # Errors
///
/// Any [`Element::parse`] error, or `UnexpectedRoot` if the document is not
/// a `<body/>`.
pub fn parse_response(text: &str) -> Result<Element> {
    let element = Element::parse(text)?;
    if !element.is_named("body") {
        return Err(ProtocolError::UnexpectedRoot {
            expected: "body",
            found: element.name().to_string(),
        });
    }
    Ok(element)
}

/// True for a server-sent `type="terminate"` body
#[must_use]
pub fn is_terminate(body: &Element) -> bool {
    body.attr("type") == Some("terminate")
}

/// Condition reported by a terminate body.
///
/// `remote-stream-error` wrapping a `<conflict/>` is reported as `conflict`;
/// a terminate without a condition is `unknown`. Returns `None` for bodies
/// that are not terminates.
#[must_use]
pub fn terminate_condition(body: &Element) -> Option<String> {
    if !is_terminate(body) {
        return None;
    }
    let condition = match body.attr("condition") {
        Some("remote-stream-error") if body.has_descendant("conflict") => "conflict",
        Some(condition) => condition,
        None => "unknown",
    };
    Some(condition.to_string())
}

/// Read an optional numeric attribute.
///
/// # Errors
///
/// `InvalidAttribute` if the attribute is present but not a number.
pub fn numeric_attr(body: &Element, name: &'static str) -> Result<Option<u32>> {
    body.attr(name)
        .map(|raw| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| ProtocolError::InvalidAttribute { name, value: raw.to_string() })
        })
        .transpose()
}
