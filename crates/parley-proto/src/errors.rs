//! Error types for the Parley wire format.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Wire-level errors that can occur while parsing or validating BOSH bodies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Parsing errors
    /// The XML reader rejected the document
    #[error("malformed XML: {0}")]
    Xml(String),

    /// The document contained no element at all
    #[error("document has no root element")]
    EmptyDocument,

    /// More than one top-level element was found
    #[error("document has more than one root element")]
    MultipleRoots,

    /// The document ended before every element was closed
    #[error("unclosed element <{0}>")]
    Unclosed(String),

    /// Element or attribute content was not valid UTF-8
    #[error("invalid UTF-8 in XML content")]
    InvalidUtf8,

    // Validation errors
    /// Root element was not the expected wrapper
    #[error("unexpected root element: expected <{expected}>, got <{found}>")]
    UnexpectedRoot {
        /// Expected element name
        expected: &'static str,
        /// Element name actually found
        found: String,
    },

    /// Elements nested deeper than [`MAX_DEPTH`](crate::element::MAX_DEPTH)
    #[error("elements nested deeper than {limit} levels")]
    TooDeep {
        /// Maximum accepted depth
        limit: usize,
    },

    /// An attribute value could not be interpreted
    #[error("invalid value for attribute {name}: {value:?}")]
    InvalidAttribute {
        /// Attribute name
        name: &'static str,
        /// Offending raw value
        value: String,
    },
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for ProtocolError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

impl From<std::str::Utf8Error> for ProtocolError {
    fn from(_: std::str::Utf8Error) -> Self {
        ProtocolError::InvalidUtf8
    }
}

/// Convenient Result type alias for wire operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
