//! Register port capability.
//!
//! The physical mapping of the register file lives outside this crate. The
//! engine only needs word reads and writes plus bit set/test on the
//! configuration register, which are provided in terms of the two primitives.

use crate::regs::{ConfigBits, Register};

/// Raw access to the engine's register file.
///
/// Methods take `&mut self`: reading the configuration register may have side
/// effects on a real device (and does on the emulator), and the port is only
/// ever driven by the holder of the exclusive domain.
pub trait RegisterPort: Send {
    /// Read a 32-bit register.
    fn read32(&mut self, reg: Register) -> u32;

    /// Write a 32-bit register.
    fn write32(&mut self, reg: Register, value: u32);

    /// Set `bits` in `reg` with a read-modify-write.
    ///
    /// Status bits read back are written unchanged; the hardware ignores
    /// writes to read-only bits.
    fn set_bits(&mut self, reg: Register, bits: ConfigBits) {
        let value = self.read32(reg);
        self.write32(reg, value | bits.bits());
    }

    /// True if all of `bits` are set in `reg`.
    fn test_bits(&mut self, reg: Register, bits: ConfigBits) -> bool {
        ConfigBits::from_bits_truncate(self.read32(reg)).contains(bits)
    }
}

impl<P: RegisterPort + ?Sized> RegisterPort for Box<P> {
    fn read32(&mut self, reg: Register) -> u32 {
        (**self).read32(reg)
    }

    fn write32(&mut self, reg: Register, value: u32) {
        (**self).write32(reg, value);
    }

    fn set_bits(&mut self, reg: Register, bits: ConfigBits) {
        (**self).set_bits(reg, bits);
    }

    fn test_bits(&mut self, reg: Register, bits: ConfigBits) -> bool {
        (**self).test_bits(reg, bits)
    }
}
