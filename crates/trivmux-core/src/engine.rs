//! Engine protocol over the register file.
//!
//! The engine holds one key/IV context. Loading a context pulses `INIT` and
//! waits for `INIT_DONE`; each data word pulses `PROC` and waits for
//! `OUTPUT_VALID`. Every wait is bounded by [`PollConfig`]: a device that
//! never completes is stopped and reported as [`EngineError::Timeout`] rather
//! than hanging the caller that holds the exclusive domain.
//!
//! `Engine` is not synchronized. Callers serialize access; in this crate that
//! is the [`SessionManager`](crate::SessionManager).

use std::time::Duration;

use crate::{
    env::Environment,
    error::{EngineError, EngineOperation},
    port::RegisterPort,
    regs::{ConfigBits, Register},
};

/// Bounds on status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Give up after this long without the awaited status bit
    pub timeout: Duration,
    /// Busy-spin this many reads before yielding with sleeps
    pub spin_limit: u32,
    /// Sleep between reads once the spin budget is spent
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            spin_limit: 64,
            interval: Duration::from_micros(10),
        }
    }
}

/// Single-context stream-cipher engine.
pub struct Engine<P, E> {
    port: P,
    env: E,
    poll: PollConfig,
}

impl<P: RegisterPort, E: Environment> Engine<P, E> {
    /// Wrap a register port.
    pub fn new(port: P, env: E, poll: PollConfig) -> Self {
        Self { port, env, poll }
    }

    /// Load key and IV words and run initialization.
    ///
    /// Does not stop a running context first; the caller decides when a stop
    /// is needed.
    ///
    /// # Errors
    ///
    /// - `EngineError::Busy` if BUSY is set before anything is written
    /// - `EngineError::Timeout` if `INIT_DONE` never appears (engine stopped)
    pub fn load_context(&mut self, key: &[u32; 3], iv: &[u32; 3]) -> Result<(), EngineError> {
        let operation = EngineOperation::LoadContext;
        self.ensure_idle(operation)?;

        for (reg, word) in [Register::KeyLo, Register::KeyMid, Register::KeyHi].into_iter().zip(key)
        {
            self.port.write32(reg, *word);
        }
        for (reg, word) in [Register::IvLo, Register::IvMid, Register::IvHi].into_iter().zip(iv) {
            self.port.write32(reg, *word);
        }

        self.port.set_bits(Register::Config, ConfigBits::INIT);
        self.wait_for(ConfigBits::INIT_DONE, operation)
    }

    /// Encrypt one 32-bit word with the loaded context.
    ///
    /// # Errors
    ///
    /// - `EngineError::Busy` if BUSY is set before the word is written
    /// - `EngineError::Timeout` if `OUTPUT_VALID` never appears (engine
    ///   stopped)
    pub fn encrypt_word(&mut self, word: u32) -> Result<u32, EngineError> {
        let operation = EngineOperation::EncryptWord;
        self.ensure_idle(operation)?;

        self.port.write32(Register::DataIn, word);
        self.port.set_bits(Register::Config, ConfigBits::PROC);
        self.wait_for(ConfigBits::OUTPUT_VALID, operation)?;

        Ok(self.port.read32(Register::DataOut))
    }

    /// Pulse STOP, discarding the loaded context.
    pub fn stop(&mut self) {
        self.port.set_bits(Register::Config, ConfigBits::STOP);
    }

    /// Poll limits in effect.
    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    /// Underlying register port.
    pub fn port(&self) -> &P {
        &self.port
    }

    fn ensure_idle(&mut self, operation: EngineOperation) -> Result<(), EngineError> {
        if self.port.test_bits(Register::Config, ConfigBits::BUSY) {
            tracing::debug!(%operation, "engine busy");
            return Err(EngineError::Busy { operation });
        }
        Ok(())
    }

    fn wait_for(&mut self, bit: ConfigBits, operation: EngineOperation) -> Result<(), EngineError> {
        let start = self.env.now();
        let mut spins = 0u32;

        loop {
            if self.port.test_bits(Register::Config, bit) {
                return Ok(());
            }

            let elapsed = self.env.now() - start;
            if elapsed >= self.poll.timeout {
                self.stop();
                tracing::warn!(%operation, ?elapsed, "engine did not complete, stopped");
                return Err(EngineError::Timeout { operation, elapsed });
            }

            if spins < self.poll.spin_limit {
                spins += 1;
                std::hint::spin_loop();
            } else {
                self.env.sleep(self.poll.interval);
            }
        }
    }
}

impl<P, E> std::fmt::Debug for Engine<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("poll", &self.poll).finish_non_exhaustive()
    }
}
