//! Clock and entropy supplied to the engine.
//!
//! A connection draws random bytes for three things: the initial `rid`, the
//! seed of the stanza id counter and SASL client nonces. Each of them comes
//! from its [`Environment`], so a seeded simulation replays identical wire
//! traffic.
//!
//! # The hollow shell
//!
//! Nothing in `parley-core` reads the system clock, sleeps or touches OS
//! entropy. The current time arrives as a method argument; randomness is
//! requested from the environment.
//!
//! Two implementations exist:
//!
//! 1. `SimEnv` in parley-harness: tokio's paused clock, seeded ChaCha20
//! 2. a production environment: monotonic system clock, OS entropy
//!
//! Implementations keep `now()` monotonic, make `random_bytes()` a pure
//! function of the seed under simulation and hold no global state.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Time, entropy and sleeping for one connection.
///
/// `Instant` is tokio's virtual clock (as `std::time::Instant`) under
/// simulation and the real monotonic clock in production.
///
/// Production implementations must use a cryptographically secure source
/// for `random_bytes()`: SASL nonces come from it.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point in time; ordered for deadlines, subtractable for request ages
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current time.
    ///
    /// Only used to seed a new connection's clock. Every later state
    /// transition receives `now` from the driver.
    fn now(&self) -> Self::Instant;

    /// Resolve after `duration`.
    ///
    /// Used by driver code (delayed retransmissions, idle deadlines), never
    /// by the connection itself.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` from the environment's RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random `u32`, big-endian from four RNG bytes
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// Random `u64`
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Time elapsed from `since` to `now`, zero if `since` lies in the future.
///
/// Delayed retransmissions record their send time ahead of `now`, so plain
/// subtraction is not safe for every `Instant` implementation.
pub(crate) fn elapsed<I>(now: I, since: I) -> Duration
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    if since >= now { Duration::ZERO } else { now - since }
}
