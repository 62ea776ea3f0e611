//! Error types for the Parley session engine.
//!
//! This module provides strongly-typed errors for different layers:
//! - Connection errors (API misuse, configuration, driver timeouts)
//! - Authentication errors (SASL derivations and server verification)
//! - Handler errors (faults raised by stanza and timed callbacks)
//!
//! Failures that the BOSH protocol itself reports (HTTP errors, terminate
//! bodies, SASL `<failure/>`) are not errors here: they surface as status
//! transitions through the status callback.

use std::{fmt, time::Duration};

use thiserror::Error;

use crate::status::Status;

/// Errors returned by [`Connection`](crate::connection::Connection) methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current status
    InvalidState {
        /// Status when the operation was attempted
        status: Status,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Configuration rejected by `ConnectionConfig::validate`
    InvalidConfig(String),

    /// Stanza of the wrong kind handed to an operation
    InvalidStanza {
        /// Expected element name
        expected: &'static str,
        /// Element name actually given
        found: String,
    },

    /// A driver gave up waiting for a condition
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { status, operation } => {
                write!(f, "invalid state: cannot {} while {}", operation, status)
            },
            Self::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
            Self::InvalidStanza { expected, found } => {
                write!(f, "invalid stanza: expected <{}>, got <{}>", expected, found)
            },
            Self::Timeout { elapsed } => write!(f, "timed out after {:?}", elapsed),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Errors raised while computing or verifying SASL exchanges.
///
/// These never escape the engine: the authentication state machine logs
/// them and reports `AuthFail`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Challenge or success payload was not valid base64
    #[error("invalid base64 in SASL payload")]
    InvalidBase64,

    /// Challenge lacked a required field
    #[error("challenge is missing `{0}`")]
    MissingField(&'static str),

    /// Challenge field could not be interpreted
    #[error("invalid challenge field `{field}`: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending raw value
        value: String,
    },

    /// SCRAM server nonce does not extend the client nonce
    #[error("server nonce does not start with the client nonce")]
    NonceMismatch,

    /// SCRAM server signature differs from the expected value
    #[error("server signature mismatch")]
    ServerSignatureMismatch,

    /// The selected mechanism does not take challenges
    #[error("unexpected challenge for {0}")]
    UnexpectedChallenge(&'static str),

    /// HMAC key rejected by the primitive
    #[error("invalid HMAC key length")]
    InvalidKeyLength,
}

/// Errors returned by stanza and timed handler callbacks.
///
/// The dispatcher logs these at error level and keeps the handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// An IQ reply carried a type other than `result` or `error`
    #[error("unexpected IQ type: {0:?}")]
    UnexpectedIqType(Option<String>),

    /// Authentication step failed
    #[error("authentication: {0}")]
    Auth(#[from] AuthError),

    /// Application-defined failure
    #[error("{0}")]
    Callback(String),
}
