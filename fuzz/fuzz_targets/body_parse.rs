//! Arbitrary bytes through the response body parser
//!
//! Invariants:
//! - parsing never panics
//! - anything that parses serializes to XML that parses again
//! - attribute and condition lookups never panic on a parsed body

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{Element, body};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(parsed) = body::parse_response(text) else {
        let _ = Element::parse(text);
        return;
    };

    let _ = body::is_terminate(&parsed);
    let _ = body::terminate_condition(&parsed);
    let _ = body::numeric_attr(&parsed, "wait");
    let _ = body::numeric_attr(&parsed, "hold");

    let xml = parsed.to_xml();
    let reparsed = Element::parse(&xml);
    assert!(reparsed.is_ok(), "serialized body failed to reparse: {xml}");
});
