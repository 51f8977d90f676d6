//! Chaotic register port for fault injection testing
//!
//! Wraps any [`RegisterPort`] and corrupts what the driver sees on the
//! configuration register. Faults are driven by a shared [`ChaosControl`]
//! handle so a test can arm them after the port has been moved into the
//! engine.
//!
//! - Spurious BUSY: each status read reports BUSY with `failure_rate`
//! - Stuck BUSY: after a given number of PROC pulses, BUSY stays set until
//!   the next STOP
//! - Wedged: completion bits never appear, so every wait times out

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use trivmux_core::{ConfigBits, Register, RegisterPort};

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator, so chaos runs are reproducible with the
/// same seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

#[derive(Default)]
struct ChaosState {
    failure_rate: f64,
    wedged: bool,
    busy_after: Option<u64>,
    stuck_busy: bool,
    procs: u64,
    injected: u64,
}

/// Shared handle for arming faults on a [`ChaoticPort`].
#[derive(Clone, Default)]
pub struct ChaosControl {
    state: Arc<Mutex<ChaosState>>,
}

impl ChaosControl {
    /// Probability of a spurious BUSY on each status read.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );
        self.state().failure_rate = failure_rate;
    }

    /// Hide `INIT_DONE` and `OUTPUT_VALID` while set.
    pub fn set_wedged(&self, wedged: bool) {
        self.state().wedged = wedged;
    }

    /// Let `words` more PROC pulses through, then hold BUSY until STOP.
    pub fn busy_after_words(&self, words: u64) {
        let mut state = self.state();
        if words == 0 {
            state.stuck_busy = true;
            state.injected += 1;
        } else {
            state.busy_after = Some(state.procs + words);
        }
    }

    /// Faults injected so far.
    pub fn injected_faults(&self) -> u64 {
        self.state().injected
    }

    fn state(&self) -> MutexGuard<'_, ChaosState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Register port wrapper that injects faults.
pub struct ChaoticPort<P> {
    inner: P,
    control: ChaosControl,
    rng: ChaoticRng,
}

impl<P: RegisterPort> ChaoticPort<P> {
    /// Wrap `inner` with no faults armed.
    pub fn new(inner: P) -> Self {
        Self::with_seed(inner, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    pub fn with_seed(inner: P, seed: u64) -> Self {
        Self { inner, control: ChaosControl::default(), rng: ChaoticRng::new(seed) }
    }

    /// Handle for arming faults after the port has been handed off.
    pub fn control(&self) -> ChaosControl {
        self.control.clone()
    }

    /// Underlying port.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: RegisterPort> RegisterPort for ChaoticPort<P> {
    fn read32(&mut self, reg: Register) -> u32 {
        let value = self.inner.read32(reg);
        if reg != Register::Config {
            return value;
        }

        let mut state = self.control.state();
        let mut bits = ConfigBits::from_bits_retain(value);
        if state.stuck_busy {
            bits.insert(ConfigBits::BUSY);
        } else if state.failure_rate > 0.0 && self.rng.should_fail(state.failure_rate) {
            bits.insert(ConfigBits::BUSY);
            state.injected += 1;
        }
        if state.wedged {
            bits.remove(ConfigBits::INIT_DONE | ConfigBits::OUTPUT_VALID);
        }
        bits.bits()
    }

    fn write32(&mut self, reg: Register, value: u32) {
        if reg == Register::Config {
            let bits = ConfigBits::from_bits_truncate(value);
            let mut state = self.control.state();
            if bits.contains(ConfigBits::STOP) {
                state.stuck_busy = false;
            } else if bits.contains(ConfigBits::PROC) {
                state.procs += 1;
                if state.busy_after.is_some_and(|limit| state.procs >= limit) {
                    state.busy_after = None;
                    state.stuck_busy = true;
                    state.injected += 1;
                }
            }
        }
        self.inner.write32(reg, value);
    }
}
