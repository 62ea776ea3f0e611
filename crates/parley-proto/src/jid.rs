//! String-level JID helpers.
//!
//! The engine never validates JIDs; it only needs to split
//! `node@domain/resource` into its parts. Empty parts are reported as
//! absent.

/// Local part (`node` in `node@domain/resource`)
#[must_use]
pub fn node(jid: &str) -> Option<&str> {
    let bare = bare(jid);
    let (node, _) = bare.split_once('@')?;
    (!node.is_empty()).then_some(node)
}

/// Domain part
#[must_use]
pub fn domain(jid: &str) -> &str {
    let bare = bare(jid);
    match bare.split_once('@') {
        Some((_, domain)) => domain,
        None => bare,
    }
}

/// Resource part (everything after the first `/`)
#[must_use]
pub fn resource(jid: &str) -> Option<&str> {
    let (_, resource) = jid.split_once('/')?;
    (!resource.is_empty()).then_some(resource)
}

/// JID without its resource
#[must_use]
pub fn bare(jid: &str) -> &str {
    match jid.split_once('/') {
        Some((bare, _)) => bare,
        None => jid,
    }
}
