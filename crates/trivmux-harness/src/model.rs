//! Reference model of the session state machine.
//!
//! `ModelSession` implements the observable behaviour of a session directly
//! on the software cipher, with no engine, no context swaps and no shared
//! state. Any sequence of operations applied to the model and to real
//! sessions sharing one engine must produce identical outcomes.

use arbitrary::Arbitrary;
use trivmux_core::{IV_LEN, KEY_LEN, ResultCode, SessionPhase, WORD_LEN};
use trivmux_crypto::Trivium;

/// Number of concurrently open sessions operations are spread over.
pub const SESSION_SLOTS: usize = 4;

/// Operations that can be applied to a set of sessions.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Write `len` bytes derived from `seed`.
    Write {
        /// Target session (taken modulo `SESSION_SLOTS`)
        slot: u8,
        /// Payload length
        len: u8,
        /// Payload seed
        seed: u8,
    },

    /// Read `len` bytes.
    Read {
        /// Target session
        slot: u8,
        /// Bytes requested
        len: u8,
    },

    /// Close the session and open a fresh one in its slot.
    Reopen {
        /// Target session
        slot: u8,
    },
}

impl Operation {
    /// Session index this operation targets.
    pub fn slot(&self) -> usize {
        let slot = match self {
            Self::Write { slot, .. } | Self::Read { slot, .. } | Self::Reopen { slot } => *slot,
        };
        usize::from(slot) % SESSION_SLOTS
    }

    /// Payload of a `Write`, empty for other operations.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Write { len, seed, .. } => {
                (0..*len).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect()
            },
            _ => Vec::new(),
        }
    }
}

/// Observable result of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Write accepted this many bytes
    Written(usize),
    /// Read returned these bytes
    Read(Vec<u8>),
    /// Session replaced
    Reopened,
    /// Operation failed
    Failed(ResultCode),
}

/// Software-only session.
#[derive(Default)]
pub struct ModelSession {
    key: Option<[u8; KEY_LEN]>,
    cipher: Option<Trivium>,
    pending: Vec<u8>,
}

impl ModelSession {
    /// Fresh session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        match (&self.key, &self.cipher) {
            (None, _) => SessionPhase::Empty,
            (Some(_), None) => SessionPhase::HasKey,
            (Some(_), Some(_)) => SessionPhase::Ready,
        }
    }

    /// Unread ciphertext bytes.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply a write.
    ///
    /// # Errors
    ///
    /// `ResultCode::Format` if the length does not fit the phase.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ResultCode> {
        match (&self.key, self.cipher.as_mut()) {
            (None, _) => {
                self.key = Some(<[u8; KEY_LEN]>::try_from(data).map_err(|_| ResultCode::Format)?);
            },
            (Some(key), None) => {
                let iv = <[u8; IV_LEN]>::try_from(data).map_err(|_| ResultCode::Format)?;
                self.cipher = Some(Trivium::new(key, &iv));
            },
            (Some(_), Some(cipher)) => {
                if data.is_empty() || data.len() % WORD_LEN != 0 {
                    return Err(ResultCode::Format);
                }
                let mut out = data.to_vec();
                cipher.apply_keystream(&mut out);
                self.pending = out;
            },
        }
        Ok(data.len())
    }

    /// Read exactly `requested` bytes.
    ///
    /// # Errors
    ///
    /// `ResultCode::Format` if nothing is pending or too little is.
    pub fn read(&mut self, requested: usize) -> Result<Vec<u8>, ResultCode> {
        if self.pending.is_empty() || requested > self.pending.len() {
            return Err(ResultCode::Format);
        }
        Ok(self.pending.drain(..requested).collect())
    }
}

/// A fixed set of model sessions.
pub struct ModelWorld {
    sessions: Vec<ModelSession>,
}

impl ModelWorld {
    /// `SESSION_SLOTS` fresh sessions.
    pub fn new() -> Self {
        Self { sessions: (0..SESSION_SLOTS).map(|_| ModelSession::new()).collect() }
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: &Operation) -> Outcome {
        let slot = op.slot();
        match op {
            Operation::Write { .. } => match self.sessions[slot].write(&op.payload()) {
                Ok(n) => Outcome::Written(n),
                Err(code) => Outcome::Failed(code),
            },
            Operation::Read { len, .. } => match self.sessions[slot].read(usize::from(*len)) {
                Ok(bytes) => Outcome::Read(bytes),
                Err(code) => Outcome::Failed(code),
            },
            Operation::Reopen { .. } => {
                self.sessions[slot] = ModelSession::new();
                Outcome::Reopened
            },
        }
    }

    /// Session in `slot`.
    pub fn session(&self, slot: usize) -> &ModelSession {
        &self.sessions[slot % SESSION_SLOTS]
    }
}

impl Default for ModelWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_encrypts_zero_vector() {
        let mut session = ModelSession::new();
        session.write(&[0; KEY_LEN]).unwrap();
        session.write(&[0; IV_LEN]).unwrap();
        session.write(&[0; 4]).unwrap();

        assert_eq!(session.read(4).unwrap(), [0xfb, 0xe0, 0xbf, 0x26]);
        assert_eq!(session.read(1), Err(ResultCode::Format));
    }

    #[test]
    fn slots_wrap() {
        let op = Operation::Reopen { slot: 5 };

        assert_eq!(op.slot(), 1);
    }
}
