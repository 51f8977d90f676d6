//! Trivium keystream generator.
//!
//! # Security Properties
//!
//! - State is zeroized on drop
//! - Determinism: same key and IV always produce the same keystream

use zeroize::Zeroize;

/// Key length in bytes (80 bits).
pub const KEY_LEN: usize = 10;

/// IV length in bytes (80 bits).
pub const IV_LEN: usize = 10;

/// Size of the internal shift register in bits.
pub const STATE_BITS: usize = 288;

/// Clocks discarded after loading key and IV (four full state cycles).
pub const WARMUP_CLOCKS: usize = 4 * STATE_BITS;

/// Offset of the IV inside the state.
const IV_OFFSET: usize = 93;

/// Start of the third register segment.
const C_OFFSET: usize = 177;

/// Trivium cipher instance.
///
/// The state is stored as one bit per byte in a ring buffer. Each clock shifts
/// the whole register by one position, which is a head-pointer decrement
/// instead of a memory move.
pub struct Trivium {
    /// One bit per entry
    state: [u8; STATE_BITS],
    /// Physical index of logical bit 0
    head: usize,
    /// Keystream bits produced since warm-up
    clocks: u64,
}

impl Trivium {
    /// Load key and IV and run the warm-up phase.
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        let mut state = [0u8; STATE_BITS];

        for i in 0..KEY_LEN * 8 {
            state[i] = (key[i / 8] >> (i % 8)) & 1;
            state[IV_OFFSET + i] = (iv[i / 8] >> (i % 8)) & 1;
        }

        state[STATE_BITS - 3] = 1;
        state[STATE_BITS - 2] = 1;
        state[STATE_BITS - 1] = 1;

        let mut cipher = Self { state, head: 0, clocks: 0 };
        for _ in 0..WARMUP_CLOCKS {
            cipher.clock();
        }
        cipher.clocks = 0;

        cipher
    }

    /// Number of keystream bits produced since warm-up.
    pub fn position_bits(&self) -> u64 {
        self.clocks
    }

    /// Produce the next keystream bit.
    pub fn next_bit(&mut self) -> u8 {
        self.clock()
    }

    /// XOR 32 keystream bits into `word`, least significant bit first.
    pub fn encrypt_word(&mut self, word: u32) -> u32 {
        let mut keystream = 0u32;
        for bit in 0..32 {
            keystream |= u32::from(self.clock()) << bit;
        }
        word ^ keystream
    }

    /// XOR the keystream into `buf` in place.
    ///
    /// Decryption is the same operation.
    pub fn apply_keystream(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            let mut keystream = 0u8;
            for bit in 0..8 {
                keystream |= self.clock() << bit;
            }
            *byte ^= keystream;
        }
    }

    /// Discard `words` 32-bit keystream words.
    pub fn skip_words(&mut self, words: u64) {
        for _ in 0..words.saturating_mul(32) {
            self.clock();
        }
    }

    fn bit(&self, i: usize) -> u8 {
        self.state[(self.head + i) % STATE_BITS]
    }

    fn set(&mut self, i: usize, value: u8) {
        self.state[(self.head + i) % STATE_BITS] = value;
    }

    fn clock(&mut self) -> u8 {
        let t1 = self.bit(65) ^ self.bit(92);
        let t2 = self.bit(161) ^ self.bit(176);
        let t3 = self.bit(242) ^ self.bit(287);

        let z = t1 ^ t2 ^ t3;

        let s1 = t1 ^ (self.bit(90) & self.bit(91)) ^ self.bit(170);
        let s2 = t2 ^ (self.bit(174) & self.bit(175)) ^ self.bit(263);
        let s3 = t3 ^ (self.bit(285) & self.bit(286)) ^ self.bit(68);

        // Shift every bit one position up; the old last bit falls off at 0
        self.head = (self.head + STATE_BITS - 1) % STATE_BITS;

        self.set(0, s3);
        self.set(IV_OFFSET, s1);
        self.set(C_OFFSET, s2);

        self.clocks = self.clocks.wrapping_add(1);
        z
    }
}

impl Drop for Trivium {
    fn drop(&mut self) {
        self.state.zeroize();
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_key_and_iv_match_reference_keystream() {
        let mut cipher = Trivium::new(&[0; KEY_LEN], &[0; IV_LEN]);
        let mut buf = [0u8; 16];
        cipher.apply_keystream(&mut buf);

        assert_eq!(hex::encode(buf), "fbe0bf265859051b517a2e4e239fc97f");
    }

    #[test]
    fn word_and_byte_processing_agree() {
        let key = *b"0123456789";
        let iv = *b"abcdefghij";

        let mut by_byte = Trivium::new(&key, &iv);
        let mut bytes = [0x5Au8; 8];
        by_byte.apply_keystream(&mut bytes);

        let mut by_word = Trivium::new(&key, &iv);
        let w0 = by_word.encrypt_word(0x5A5A_5A5A);
        let w1 = by_word.encrypt_word(0x5A5A_5A5A);

        assert_eq!(&bytes[..4], &w0.to_le_bytes());
        assert_eq!(&bytes[4..], &w1.to_le_bytes());
    }

    #[test]
    fn skip_words_advances_position() {
        let key = [7u8; KEY_LEN];
        let iv = [9u8; IV_LEN];

        let mut skipped = Trivium::new(&key, &iv);
        skipped.skip_words(3);
        assert_eq!(skipped.position_bits(), 96);

        let mut clocked = Trivium::new(&key, &iv);
        for _ in 0..3 {
            clocked.encrypt_word(0);
        }

        assert_eq!(skipped.encrypt_word(0), clocked.encrypt_word(0));
    }

    #[test]
    fn encryption_is_an_involution() {
        let key = [1u8; KEY_LEN];
        let iv = [2u8; IV_LEN];
        let plaintext = *b"attack at dawn!!";

        let mut buf = plaintext;
        Trivium::new(&key, &iv).apply_keystream(&mut buf);
        assert_ne!(buf, plaintext);

        Trivium::new(&key, &iv).apply_keystream(&mut buf);
        assert_eq!(buf, plaintext);
    }
}
