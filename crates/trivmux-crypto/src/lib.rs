//! Trivium software model.
//!
//! Bit-exact model of the stream cipher implemented by the hardware engine.
//! The register-level emulator clocks it on behalf of the simulated device,
//! and tests use it as the oracle for "what the engine would produce for
//! (key, IV, plaintext) in isolation".
//!
//! # Bit Ordering
//!
//! The 80-bit key and IV are little-endian: bit `i` of the key is bit `i % 8`
//! of byte `i / 8`. Keystream bits are applied least significant bit first,
//! so the `n`-th keystream bit lands on bit `n % 8` of byte `n / 8` of the
//! message. For 32-bit words this is identical to processing each 4-byte
//! group as a little-endian `u32`, which is how the engine consumes data.
//!
//! ```text
//! key[0..10] ──┐
//!              ├─> 288-bit state ──(1152 warm-up clocks)──> keystream z0 z1 z2 ...
//! iv[0..10] ───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod trivium;

pub use trivium::{IV_LEN, KEY_LEN, STATE_BITS, Trivium, WARMUP_CLOCKS};
