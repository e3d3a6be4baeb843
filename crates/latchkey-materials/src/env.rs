//! Environment abstraction for deterministic testing.
//!
//! Decouples cache expiry and key generation from system resources (time,
//! randomness). Production code runs on [`crate::SystemEnv`]; tests drive a
//! simulated clock and a seeded RNG so TTL and wrapping behaviour is
//! reproducible.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`; simulations use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only background drivers (the proactive cache sweep) call this.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Time elapsed since `earlier`, saturating at zero.
    fn elapsed_since(&self, earlier: Self::Instant) -> Duration {
        let now = self.now();
        if now <= earlier { Duration::ZERO } else { now - earlier }
    }
}
