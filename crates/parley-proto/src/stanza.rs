//! Stanza builders.
//!
//! Thin constructors for the three top-level stanza kinds, all in the
//! [`ns::CLIENT`] namespace. Attributes are optional; pass `None` to omit.

use crate::{element::Element, ns};

/// `<iq/>` with the given type and optional id
#[must_use]
pub fn iq(kind: &str, id: Option<&str>) -> Element {
    let mut iq = Element::new("iq").with_attr("xmlns", ns::CLIENT).with_attr("type", kind);
    if let Some(id) = id {
        iq.set_attr("id", id);
    }
    iq
}

/// `<message/>` addressed to `to`, with an optional type
#[must_use]
pub fn message(to: &str, kind: Option<&str>) -> Element {
    let mut message = Element::new("message").with_attr("xmlns", ns::CLIENT).with_attr("to", to);
    if let Some(kind) = kind {
        message.set_attr("type", kind);
    }
    message
}

/// `<presence/>` with an optional type
#[must_use]
pub fn presence(kind: Option<&str>) -> Element {
    let mut presence = Element::new("presence").with_attr("xmlns", ns::CLIENT);
    if let Some(kind) = kind {
        presence.set_attr("type", kind);
    }
    presence
}
