//! Register-level emulation of the stream-cipher engine.
//!
//! Behaves like the device as the driver sees it:
//!
//! - Writing `INIT` latches the key/IV registers, raises BUSY and, after
//!   `latency` status reads, raises `INIT_DONE`
//! - Writing `PROC` with a loaded context encrypts `DataIn`, clears
//!   `OUTPUT_VALID`, raises BUSY and, after `latency` status reads, publishes
//!   the word in `DataOut` with `OUTPUT_VALID`
//! - Writing `STOP` drops the context and clears all status
//! - Status bits in written values are ignored, as are triggers while BUSY
//!
//! `PROC` without a loaded context is ignored, so a driver that skips `INIT`
//! waits for an `OUTPUT_VALID` that never comes.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory device only")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use trivmux_core::{
    ConfigBits, Register, RegisterPort,
    regs::{REGISTER_COUNT, unpack_words},
};
use trivmux_crypto::Trivium;

/// Counters of what the device has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Completed context loads
    pub inits: u64,
    /// STOP pulses
    pub stops: u64,
    /// Words processed
    pub words: u64,
}

/// Emulated register file. Clones share one device.
#[derive(Clone)]
pub struct SimRegisterFile {
    device: Arc<Mutex<Device>>,
}

enum Job {
    Init,
    Word(u32),
}

struct Pending {
    job: Job,
    countdown: u32,
}

struct Device {
    regs: [u32; REGISTER_COUNT],
    status: ConfigBits,
    cipher: Option<Trivium>,
    pending: Option<Pending>,
    latency: u32,
    stats: DeviceStats,
}

impl Device {
    fn trigger(&mut self, bits: ConfigBits) {
        if bits.contains(ConfigBits::STOP) {
            self.cipher = None;
            self.pending = None;
            self.status = ConfigBits::empty();
            self.stats.stops += 1;
            return;
        }
        if self.pending.is_some() {
            return;
        }

        if bits.contains(ConfigBits::INIT) {
            let key = unpack_words([
                self.regs[Register::KeyLo.index()],
                self.regs[Register::KeyMid.index()],
                self.regs[Register::KeyHi.index()],
            ]);
            let iv = unpack_words([
                self.regs[Register::IvLo.index()],
                self.regs[Register::IvMid.index()],
                self.regs[Register::IvHi.index()],
            ]);
            self.cipher = Some(Trivium::new(&key, &iv));
            self.start(Job::Init);
        } else if bits.contains(ConfigBits::PROC) {
            let ready = self.status.contains(ConfigBits::INIT_DONE);
            if let (true, Some(cipher)) = (ready, self.cipher.as_mut()) {
                let out = cipher.encrypt_word(self.regs[Register::DataIn.index()]);
                self.start(Job::Word(out));
            }
        }
    }

    fn start(&mut self, job: Job) {
        if matches!(job, Job::Init) {
            self.status.remove(ConfigBits::INIT_DONE);
        }
        self.status.remove(ConfigBits::OUTPUT_VALID);
        self.status.insert(ConfigBits::BUSY);
        self.pending = Some(Pending { job, countdown: self.latency });
        if self.latency == 0 {
            self.tick();
        }
    }

    /// One status read worth of progress.
    fn tick(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if pending.countdown > 0 {
            pending.countdown -= 1;
            return;
        }

        match pending.job {
            Job::Init => {
                self.status.insert(ConfigBits::INIT_DONE);
                self.stats.inits += 1;
            },
            Job::Word(out) => {
                self.regs[Register::DataOut.index()] = out;
                self.status.insert(ConfigBits::OUTPUT_VALID);
                self.stats.words += 1;
            },
        }
        self.status.remove(ConfigBits::BUSY);
        self.pending = None;
    }
}

impl SimRegisterFile {
    /// Device that completes every operation on the first status read.
    pub fn new() -> Self {
        Self::with_latency(0)
    }

    /// Device that needs `latency` extra status reads per operation.
    pub fn with_latency(latency: u32) -> Self {
        Self {
            device: Arc::new(Mutex::new(Device {
                regs: [0; REGISTER_COUNT],
                status: ConfigBits::empty(),
                cipher: None,
                pending: None,
                latency,
                stats: DeviceStats::default(),
            })),
        }
    }

    /// Operation counters so far.
    pub fn stats(&self) -> DeviceStats {
        self.device().stats
    }

    /// Status bits, without advancing any pending operation.
    pub fn status(&self) -> ConfigBits {
        self.device().status
    }

    /// True if a context is loaded and initialized.
    pub fn is_loaded(&self) -> bool {
        let device = self.device();
        device.cipher.is_some() && device.status.contains(ConfigBits::INIT_DONE)
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimRegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimRegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let device = self.device();
        f.debug_struct("SimRegisterFile")
            .field("status", &device.status)
            .field("stats", &device.stats)
            .finish_non_exhaustive()
    }
}

impl RegisterPort for SimRegisterFile {
    fn read32(&mut self, reg: Register) -> u32 {
        let mut device = self.device();
        if reg == Register::Config {
            device.tick();
            return device.status.bits();
        }
        device.regs[reg.index()]
    }

    fn write32(&mut self, reg: Register, value: u32) {
        let mut device = self.device();
        match reg {
            Register::Config => device.trigger(ConfigBits::from_bits_truncate(value)),
            Register::DataOut => {},
            _ => device.regs[reg.index()] = value,
        }
    }
}
