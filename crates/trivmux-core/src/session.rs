//! Per-client session state machine.
//!
//! ```text
//!  Empty ──10-byte key──> HasKey ──10-byte IV──> Ready ──n·4 bytes──> Ready
//! ```
//!
//! Writes of the wrong length are rejected without any state change and
//! without touching the engine. In `Ready`, each accepted write replaces the
//! pending ciphertext ("last result wins"); reads consume it front to back.

use std::fmt;

use zeroize::Zeroizing;

use crate::{
    env::Environment,
    error::SessionError,
    manager::{Keystream, SessionManager},
    port::RegisterPort,
    regs::{IV_LEN, KEY_LEN, WORD_LEN},
};

/// Identifier attached to a session for context ownership and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Which write a session expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Waiting for the key
    Empty,
    /// Key set, waiting for the IV
    HasKey,
    /// Key and IV set, accepting plaintext
    Ready,
}

struct Ciphertext {
    data: Zeroizing<Vec<u8>>,
    cursor: usize,
}

impl Ciphertext {
    fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

/// One client's cipher session.
pub struct Session {
    id: SessionId,
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
    iv: Option<Zeroizing<[u8; IV_LEN]>>,
    output: Option<Ciphertext>,
    position: u64,
}

impl Session {
    /// New session in the `Empty` phase.
    pub fn new(id: SessionId) -> Self {
        Self { id, key: None, iv: None, output: None, position: 0 }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        match (&self.key, &self.iv) {
            (None, _) => SessionPhase::Empty,
            (Some(_), None) => SessionPhase::HasKey,
            (Some(_), Some(_)) => SessionPhase::Ready,
        }
    }

    /// Unread ciphertext bytes.
    pub fn pending(&self) -> usize {
        self.output.as_ref().map_or(0, Ciphertext::remaining)
    }

    /// Keystream words consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Feed one write into the state machine.
    ///
    /// Returns the number of bytes accepted, which is always `data.len()`.
    ///
    /// # Errors
    ///
    /// - `SessionError::WrongLength` if `data` does not fit the phase
    /// - `SessionError::Resource` if the ciphertext buffer cannot be
    ///   allocated; pending ciphertext is kept
    /// - `SessionError::Engine` if the engine fails; any words completed
    ///   before the failure are left readable
    pub fn write<P, E>(
        &mut self,
        data: &[u8],
        manager: &SessionManager<P, E>,
    ) -> Result<usize, SessionError>
    where
        P: RegisterPort,
        E: Environment,
    {
        let phase = self.phase();
        match (&self.key, &self.iv) {
            (None, _) => {
                let key = <[u8; KEY_LEN]>::try_from(data).map_err(|_| {
                    SessionError::WrongLength { phase, expected: "10-byte key", got: data.len() }
                })?;
                self.key = Some(Zeroizing::new(key));
                tracing::debug!(session = %self.id, "key set");
            },
            (Some(_), None) => {
                let iv = <[u8; IV_LEN]>::try_from(data).map_err(|_| {
                    SessionError::WrongLength { phase, expected: "10-byte IV", got: data.len() }
                })?;
                self.iv = Some(Zeroizing::new(iv));
                tracing::debug!(session = %self.id, "iv set");
            },
            (Some(key), Some(iv)) => {
                if data.is_empty() || data.len() % WORD_LEN != 0 {
                    return Err(SessionError::WrongLength {
                        phase,
                        expected: "positive multiple of 4 bytes",
                        got: data.len(),
                    });
                }

                let mut out = Zeroizing::new(Vec::new());
                out.try_reserve_exact(data.len())
                    .map_err(|_| SessionError::Resource { bytes: data.len() })?;

                // Unread ciphertext survives every failure up to this point
                self.output = None;

                let stream = Keystream { session: self.id, key, iv, position: self.position };
                let result = manager.encrypt_buffer(&stream, data, &mut out);

                self.position += (out.len() / WORD_LEN) as u64;
                if !out.is_empty() {
                    self.output = Some(Ciphertext { data: out, cursor: 0 });
                }
                result?;

                tracing::trace!(session = %self.id, bytes = data.len(), "buffer encrypted");
            },
        }

        Ok(data.len())
    }

    /// Read exactly `requested` bytes of pending ciphertext.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoCiphertext` if nothing is pending
    /// - `SessionError::ReadPastEnd` if fewer than `requested` bytes remain
    /// - `SessionError::Resource` if the result buffer cannot be allocated
    pub fn read(&mut self, requested: usize) -> Result<Vec<u8>, SessionError> {
        self.check_read(requested)?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(requested)
            .map_err(|_| SessionError::Resource { bytes: requested })?;
        bytes.resize(requested, 0);

        self.read_into(&mut bytes)?;
        Ok(bytes)
    }

    /// Fill `buf` from the pending ciphertext. Same rules as [`Session::read`]
    /// with `requested = buf.len()`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoCiphertext` if nothing is pending
    /// - `SessionError::ReadPastEnd` if fewer than `buf.len()` bytes remain
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        self.check_read(buf.len())?;
        let Some(output) = self.output.as_mut() else {
            return Err(SessionError::NoCiphertext);
        };

        let end = output.cursor + buf.len();
        buf.copy_from_slice(&output.data[output.cursor..end]);
        output.cursor = end;

        if output.remaining() == 0 {
            self.output = None;
        }
        Ok(buf.len())
    }

    fn check_read(&self, requested: usize) -> Result<(), SessionError> {
        let remaining = self.output.as_ref().ok_or(SessionError::NoCiphertext)?.remaining();
        if requested > remaining {
            return Err(SessionError::ReadPastEnd { requested, remaining });
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("pending", &self.pending())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        engine::{Engine, PollConfig},
        regs::{ConfigBits, Register},
    };

    #[derive(Clone)]
    struct FixedClock;

    impl Environment for FixedClock {
        type Instant = Duration;

        fn now(&self) -> Duration {
            Duration::ZERO
        }

        fn sleep(&self, _duration: Duration) {}

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    /// Instant device: output = input XOR key-low XOR word counter.
    #[derive(Default)]
    struct XorDevice {
        regs: [u32; 9],
        counter: u32,
        procs: u32,
    }

    impl RegisterPort for XorDevice {
        fn read32(&mut self, reg: Register) -> u32 {
            self.regs[reg.index()]
        }

        fn write32(&mut self, reg: Register, value: u32) {
            if reg != Register::Config {
                self.regs[reg.index()] = value;
                return;
            }
            let bits = ConfigBits::from_bits_truncate(value);
            if bits.contains(ConfigBits::INIT) {
                self.counter = 0;
                self.regs[0] = ConfigBits::INIT_DONE.bits();
            } else if bits.contains(ConfigBits::PROC) {
                self.procs += 1;
                self.regs[Register::DataOut.index()] = self.regs[Register::DataIn.index()]
                    ^ self.regs[Register::KeyLo.index()]
                    ^ self.counter;
                self.counter += 1;
                self.regs[0] |= ConfigBits::OUTPUT_VALID.bits();
            }
        }
    }

    fn manager() -> SessionManager<XorDevice, FixedClock> {
        SessionManager::new(Engine::new(XorDevice::default(), FixedClock, PollConfig::default()))
    }

    fn ready(manager: &SessionManager<XorDevice, FixedClock>) -> Session {
        let mut session = Session::new(SessionId::new(7));
        session.write(&[0; KEY_LEN], manager).unwrap();
        session.write(&[0; IV_LEN], manager).unwrap();
        session
    }

    fn procs(manager: &SessionManager<XorDevice, FixedClock>) -> u32 {
        manager.with_engine(|engine| engine.port().procs)
    }

    #[test]
    fn phases_advance_in_order() {
        let manager = manager();
        let mut session = Session::new(SessionId::new(1));
        assert_eq!(session.phase(), SessionPhase::Empty);

        assert_eq!(session.write(&[1; KEY_LEN], &manager), Ok(KEY_LEN));
        assert_eq!(session.phase(), SessionPhase::HasKey);

        assert_eq!(session.write(&[2; IV_LEN], &manager), Ok(IV_LEN));
        assert_eq!(session.phase(), SessionPhase::Ready);

        assert_eq!(session.write(&[3; 8], &manager), Ok(8));
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.pending(), 8);
    }

    #[test]
    fn wrong_lengths_leave_phase_unchanged() {
        let manager = manager();
        let mut session = Session::new(SessionId::new(1));

        let err = session.write(&[0; 9], &manager).unwrap_err();
        assert!(matches!(err, SessionError::WrongLength { phase: SessionPhase::Empty, got: 9, .. }));
        assert_eq!(session.phase(), SessionPhase::Empty);

        session.write(&[0; KEY_LEN], &manager).unwrap();
        assert!(session.write(&[0; 11], &manager).is_err());
        assert_eq!(session.phase(), SessionPhase::HasKey);

        session.write(&[0; IV_LEN], &manager).unwrap();
        assert!(session.write(&[0; 6], &manager).is_err());
        assert!(session.write(&[], &manager).is_err());
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(procs(&manager), 0);
    }

    #[test]
    fn read_without_ciphertext_fails() {
        let manager = manager();
        let mut session = Session::new(SessionId::new(1));

        assert_eq!(session.read(4), Err(SessionError::NoCiphertext));

        let mut session = ready(&manager);
        assert_eq!(session.read(0), Err(SessionError::NoCiphertext));
    }

    #[test]
    fn read_past_end_keeps_cursor() {
        let manager = manager();
        let mut session = ready(&manager);
        session.write(&[0; 8], &manager).unwrap();

        assert_eq!(session.read(12), Err(SessionError::ReadPastEnd { requested: 12, remaining: 8 }));
        assert_eq!(session.pending(), 8);
    }

    #[test]
    fn full_read_frees_the_buffer() {
        let manager = manager();
        let mut session = ready(&manager);
        session.write(&[0; 8], &manager).unwrap();

        let first = session.read(4).unwrap();
        let mut second = [0u8; 4];
        session.read_into(&mut second).unwrap();

        assert_eq!(first, 0u32.to_le_bytes());
        assert_eq!(second, 1u32.to_le_bytes());
        assert_eq!(session.pending(), 0);
        assert_eq!(session.read(1), Err(SessionError::NoCiphertext));
    }

    #[test]
    fn new_plaintext_discards_unread_ciphertext() {
        let manager = manager();
        let mut session = ready(&manager);

        session.write(&[0xFF; 8], &manager).unwrap();
        session.read(4).unwrap();
        session.write(&[0; 4], &manager).unwrap();

        assert_eq!(session.pending(), 4);
        // ORACLE: counter continues from word 2, the discarded bytes are gone
        assert_eq!(session.read(4).unwrap(), 2u32.to_le_bytes());
        assert_eq!(session.position(), 3);
    }

    #[test]
    fn rejected_plaintext_keeps_unread_ciphertext() {
        let manager = manager();
        let mut session = ready(&manager);
        session.write(&[0; 8], &manager).unwrap();
        session.read(4).unwrap();

        assert!(session.write(&[0; 6], &manager).is_err());

        assert_eq!(session.pending(), 4);
        assert_eq!(session.read(4).unwrap(), 1u32.to_le_bytes());
        assert_eq!(procs(&manager), 2);
    }

    #[test]
    fn debug_does_not_print_key() {
        let manager = manager();
        let mut session = Session::new(SessionId::new(0xAB));
        session.write(&[0x42; KEY_LEN], &manager).unwrap();

        let rendered = format!("{session:?}");

        assert!(rendered.contains("HasKey"));
        assert!(!rendered.contains("66"));
    }
}
