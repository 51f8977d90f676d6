//! Environment abstraction for deterministic testing.
//!
//! Decouples engine polling and handle allocation from system resources
//! (time, randomness). The harness provides a virtual clock and seeded RNG;
//! production uses the real clock and OS entropy.

use std::time::Duration;

/// Abstract environment providing time, randomness and blocking sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `sleep()` advances `now()` by at least the requested duration
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, simulation uses a
    /// virtual instant that only moves when someone sleeps.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Blocks the calling thread for `duration`.
    ///
    /// Only the engine's polling loop sleeps, and only while it already holds
    /// the exclusive domain.
    fn sleep(&self, duration: Duration);

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
