//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{auth::MechanismFlags, error::ConnectionError};

/// Connection configuration
///
/// `wait`, `hold` and `window` are initial values: the server's session
/// response may override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Longest time in seconds the server may hold a request open
    pub wait: u32,
    /// Number of requests the server may hold at once
    pub hold: u32,
    /// Allowed rid distance between the two in-flight requests
    pub window: u32,
    /// Sends per request before the session is declared dead
    pub max_retries: u32,
    /// Primary timeout is `floor(timeout_multiplier * wait)` seconds
    pub timeout_multiplier: f64,
    /// Secondary (dead request) timeout is
    /// `floor(secondary_timeout_multiplier * wait)` seconds
    pub secondary_timeout_multiplier: f64,
    /// Idle loop period
    pub idle_interval: Duration,
    /// How long a graceful disconnect waits for the server
    pub disconnect_timeout: Duration,
    /// Mechanisms the client may use
    pub mechanisms: MechanismFlags,
    /// Optional `route` attribute of the session request
    pub route: Option<String>,
    /// `xml:lang` of the stream
    pub lang: String,
    /// Start authentication as soon as stream features arrive
    pub do_authentication: bool,
    /// Resource used by legacy auth when the JID has none
    pub legacy_resource: String,
    /// Consecutive failed requests tolerated before a forced disconnect
    pub max_consecutive_errors: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wait: 60,
            hold: 1,
            window: 5,
            max_retries: 5,
            timeout_multiplier: 1.1,
            secondary_timeout_multiplier: 0.1,
            idle_interval: Duration::from_millis(100),
            disconnect_timeout: Duration::from_secs(3),
            mechanisms: MechanismFlags::all(),
            route: None,
            lang: "en".to_string(),
            do_authentication: true,
            legacy_resource: "strophe".to_string(),
            max_consecutive_errors: 4,
        }
    }
}

impl ConnectionConfig {
    /// Check the values the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        let invalid = |reason: &str| Err(ConnectionError::InvalidConfig(reason.to_string()));

        if self.wait == 0 {
            return invalid("wait must be positive");
        }
        if self.hold == 0 {
            return invalid("hold must be positive");
        }
        if self.window == 0 {
            return invalid("window must be positive");
        }
        if !(self.timeout_multiplier.is_finite() && self.timeout_multiplier > 0.0) {
            return invalid("timeout_multiplier must be a positive number");
        }
        if !(self.secondary_timeout_multiplier.is_finite()
            && self.secondary_timeout_multiplier >= 0.0)
        {
            return invalid("secondary_timeout_multiplier must be a non-negative number");
        }
        if self.idle_interval.is_zero() {
            return invalid("idle_interval must be positive");
        }
        if self.mechanisms.is_empty() {
            return invalid("at least one authentication mechanism must be enabled");
        }
        Ok(())
    }
}
