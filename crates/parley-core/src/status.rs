//! Connection status values reported to the status callback.

use std::fmt;

/// Lifecycle status of a [`Connection`](crate::connection::Connection).
///
/// Every transition is delivered to the registered plugins and then to the
/// user's status callback, together with an optional condition string
/// (`conflict`, `x-strophe-bad-non-anon-jid`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// A response was lost to an unexpected HTTP status; the session
    /// continues
    Error = 0,
    /// Session request sent, waiting for the server
    Connecting = 1,
    /// The session could not be established or was terminated by the server
    ConnFail = 2,
    /// SASL or legacy authentication in progress
    Authenticating = 3,
    /// Authentication, binding or session establishment failed
    AuthFail = 4,
    /// Session established and authenticated
    Connected = 5,
    /// Session torn down
    Disconnected = 6,
    /// Graceful disconnect in progress
    Disconnecting = 7,
    /// Resumed an externally created session
    Attached = 8,
}

impl Status {
    /// Numeric code of the status
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// True for the states reported after a failure
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::ConnFail | Self::AuthFail)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Connecting => "connecting",
            Self::ConnFail => "connfail",
            Self::Authenticating => "authenticating",
            Self::AuthFail => "authfail",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Disconnecting => "disconnecting",
            Self::Attached => "attached",
        };
        f.write_str(name)
    }
}

/// Condition strings the engine itself reports alongside a status.
///
/// Conditions sent by the server (`terminate` conditions, SASL failure
/// element names) are passed through verbatim.
pub mod condition {
    /// A response body could not be parsed
    pub const PARSER_ERROR: &str = "strophe-parsererror";
    /// The session request exhausted its retries
    pub const GIVING_UP: &str = "giving-up";
    /// The JID has no local part and ANONYMOUS is unavailable
    pub const BAD_NON_ANON_JID: &str = "x-strophe-bad-non-anon-jid";
    /// No enabled mechanism is offered by the server
    pub const NO_AUTH_MECHANISM: &str = "x-strophe-no-auth-mechanism";
    /// Resource binding or stream termination reported a conflict
    pub const CONFLICT: &str = "conflict";
    /// A response carried an HTTP status that is neither success nor an
    /// error class; its body is lost
    pub const UNEXPECTED_STATUS: &str = "x-parley-unexpected-http-status";
}
