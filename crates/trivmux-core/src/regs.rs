//! Register map of the cipher engine.
//!
//! Nine 32-bit slots. Key and IV are 80 bits each and occupy three slots,
//! the highest of which only uses its low 16 bits.

use bitflags::bitflags;

/// Key length in bytes.
pub const KEY_LEN: usize = 10;

/// IV length in bytes.
pub const IV_LEN: usize = 10;

/// Width of one engine data word in bytes.
pub const WORD_LEN: usize = 4;

/// Number of slots in the register file.
pub const REGISTER_COUNT: usize = 9;

/// Register slots, indexed in 32-bit words from the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    /// Configuration (trigger pulses) and status
    Config = 0,
    /// Key bits 0..32
    KeyLo = 1,
    /// Key bits 32..64
    KeyMid = 2,
    /// Key bits 64..80
    KeyHi = 3,
    /// IV bits 0..32
    IvLo = 4,
    /// IV bits 32..64
    IvMid = 5,
    /// IV bits 64..80
    IvHi = 6,
    /// Plaintext word
    DataIn = 7,
    /// Ciphertext word
    DataOut = 8,
}

impl Register {
    /// All registers in index order.
    pub const ALL: [Self; REGISTER_COUNT] = [
        Self::Config,
        Self::KeyLo,
        Self::KeyMid,
        Self::KeyHi,
        Self::IvLo,
        Self::IvMid,
        Self::IvHi,
        Self::DataIn,
        Self::DataOut,
    ];

    /// Word offset from the base of the register file.
    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Bits of the configuration register.
    ///
    /// `INIT`, `STOP` and `PROC` are write-side pulses that clear themselves.
    /// `BUSY`, `INIT_DONE` and `OUTPUT_VALID` are read-only status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigBits: u32 {
        /// Initialize the core from the key and IV registers
        const INIT = 1 << 0;
        /// Stop the core and drop the loaded context
        const STOP = 1 << 1;
        /// Process the word in `DataIn`
        const PROC = 1 << 2;
        /// Core is currently working
        const BUSY = 1 << 8;
        /// Initialization phase has completed
        const INIT_DONE = 1 << 9;
        /// `DataOut` holds the result of the last `PROC`
        const OUTPUT_VALID = 1 << 10;
    }
}

impl ConfigBits {
    /// Write-side trigger bits.
    pub const TRIGGERS: Self = Self::INIT.union(Self::STOP).union(Self::PROC);

    /// Read-only status bits.
    pub const STATUS: Self = Self::BUSY.union(Self::INIT_DONE).union(Self::OUTPUT_VALID);
}

/// Pack 80 bits of key or IV into the three register words.
///
/// Little-endian: bytes 0..4 form the low word, 8..10 the low half of the
/// high word.
pub fn pack_words(bytes: &[u8; KEY_LEN]) -> [u32; 3] {
    let mut padded = [0u8; 12];
    padded[..KEY_LEN].copy_from_slice(bytes);

    [
        u32::from_le_bytes([padded[0], padded[1], padded[2], padded[3]]),
        u32::from_le_bytes([padded[4], padded[5], padded[6], padded[7]]),
        u32::from_le_bytes([padded[8], padded[9], padded[10], padded[11]]),
    ]
}

/// Inverse of [`pack_words`]. Bits 16..32 of the high word are ignored.
pub fn unpack_words(words: [u32; 3]) -> [u8; KEY_LEN] {
    let mut bytes = [0u8; KEY_LEN];
    bytes[0..4].copy_from_slice(&words[0].to_le_bytes());
    bytes[4..8].copy_from_slice(&words[1].to_le_bytes());
    bytes[8..10].copy_from_slice(&words[2].to_le_bytes()[..2]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_indices_match_hardware_layout() {
        for (i, reg) in Register::ALL.iter().enumerate() {
            assert_eq!(reg.index(), i);
        }
    }

    #[test]
    fn pack_places_high_bytes_in_low_half() {
        let words = pack_words(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);

        assert_eq!(words, [0x0302_0100, 0x0706_0504, 0x0000_0908]);
    }

    #[test]
    fn unpack_ignores_unused_high_bits() {
        let bytes = unpack_words([0x0302_0100, 0x0706_0504, 0xFFFF_0908]);

        assert_eq!(bytes, [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
        assert_eq!(pack_words(&bytes)[2], 0x0000_0908);
    }

    #[test]
    fn trigger_and_status_bits_are_disjoint() {
        assert!(ConfigBits::TRIGGERS.intersection(ConfigBits::STATUS).is_empty());
        assert_eq!(ConfigBits::TRIGGERS.union(ConfigBits::STATUS), ConfigBits::all());
    }
}
