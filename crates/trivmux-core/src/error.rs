//! Error types for the engine and session layers.
//!
//! Errors are strongly typed per layer. At the session boundary every error
//! collapses to a [`ResultCode`], the small set of outcomes a client of the
//! byte-stream interface can observe.

use std::{fmt, io, time::Duration};

use thiserror::Error;

use crate::session::SessionPhase;

/// Engine operation that was in progress when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOperation {
    /// Loading key and IV, waiting for `INIT_DONE`
    LoadContext,
    /// Processing one data word, waiting for `OUTPUT_VALID`
    EncryptWord,
}

impl fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadContext => f.write_str("load_context"),
            Self::EncryptWord => f.write_str("encrypt_word"),
        }
    }
}

/// Errors reported by the hardware engine wrapper.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine reported BUSY when it was expected to be idle
    #[error("engine busy at start of {operation}")]
    Busy {
        /// Operation that found the engine busy
        operation: EngineOperation,
    },

    /// Engine did not signal completion before the poll deadline.
    ///
    /// The engine has been stopped; any loaded context is gone.
    #[error("engine did not complete {operation} within {elapsed:?}")]
    Timeout {
        /// Operation that was waiting
        operation: EngineOperation,
        /// How long we polled
        elapsed: Duration,
    },

    /// Restoring the session's keystream would replay more words than the
    /// manager allows. The engine was not touched.
    #[error("context swap needs {required} replay words, limit is {limit}")]
    ReplayLimit {
        /// Words the session has consumed since its IV was set
        required: u64,
        /// Configured replay limit
        limit: u64,
    },
}

/// Errors that can occur during session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Write length does not fit the current phase. Session unchanged.
    #[error("invalid write in {phase:?} phase: expected {expected}, got {got} bytes")]
    WrongLength {
        /// Phase the session was in
        phase: SessionPhase,
        /// What the phase accepts
        expected: &'static str,
        /// Length that was written
        got: usize,
    },

    /// Read with no ciphertext pending
    #[error("no ciphertext pending")]
    NoCiphertext,

    /// Read asked for more than is pending
    #[error("read of {requested} bytes exceeds {remaining} pending bytes")]
    ReadPastEnd {
        /// Bytes requested
        requested: usize,
        /// Bytes left in the ciphertext buffer
        remaining: usize,
    },

    /// Buffer allocation failed
    #[error("failed to allocate {bytes} byte buffer")]
    Resource {
        /// Size of the allocation that failed
        bytes: usize,
    },

    /// Engine failed during an encrypt request
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl SessionError {
    /// Boundary result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::WrongLength { .. } | Self::NoCiphertext | Self::ReadPastEnd { .. } => {
                ResultCode::Format
            },
            Self::Resource { .. } => ResultCode::Resource,
            Self::Engine(EngineError::Busy { .. }) => ResultCode::EngineBusy,
            Self::Engine(EngineError::Timeout { .. }) => ResultCode::EngineTimeout,
            Self::Engine(EngineError::ReplayLimit { .. }) => ResultCode::ReplayLimit,
        }
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// Engine faults are transient from the caller's point of view: the
    /// exclusive domain has been released and the next request reloads the
    /// context. Format errors never succeed on retry with the same input,
    /// and neither does a session past the replay limit.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Engine(EngineError::ReplayLimit { .. }) => false,
            Self::Engine(_) | Self::Resource { .. } => true,
            Self::WrongLength { .. } | Self::NoCiphertext | Self::ReadPastEnd { .. } => false,
        }
    }
}

/// Outcome codes visible at the byte-stream boundary.
///
/// Success is not a variant; it is reported as the processed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResultCode {
    /// Write length wrong for the current phase, or nothing to read
    Format = 1,
    /// Allocation failure or session limit reached
    Resource = 2,
    /// Engine unexpectedly busy
    EngineBusy = 3,
    /// Engine did not complete in time and was stopped
    EngineTimeout = 4,
    /// Bytes could not be moved across the session boundary
    Access = 5,
    /// Session keystream too far advanced to restore; set a new IV
    ReplayLimit = 6,
}

impl ResultCode {
    /// Wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` for 0 (success) and unknown codes.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Format),
            2 => Some(Self::Resource),
            3 => Some(Self::EngineBusy),
            4 => Some(Self::EngineTimeout),
            5 => Some(Self::Access),
            6 => Some(Self::ReplayLimit),
            _ => None,
        }
    }

    /// Matching `io::ErrorKind` for host-side APIs.
    pub fn io_kind(self) -> io::ErrorKind {
        match self {
            Self::Format => io::ErrorKind::InvalidInput,
            Self::Resource => io::ErrorKind::OutOfMemory,
            Self::EngineBusy => io::ErrorKind::ResourceBusy,
            Self::EngineTimeout => io::ErrorKind::TimedOut,
            Self::Access => io::ErrorKind::InvalidData,
            Self::ReplayLimit => io::ErrorKind::Unsupported,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Format => "format error",
            Self::Resource => "resource error",
            Self::EngineBusy => "engine busy",
            Self::EngineTimeout => "engine timeout",
            Self::Access => "access error",
            Self::ReplayLimit => "replay limit exceeded",
        };
        f.write_str(name)
    }
}

/// Convert `SessionError` to `io::Error` for file-like adapters.
impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        Self::new(err.code().io_kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_are_not_transient() {
        let wrong = SessionError::WrongLength {
            phase: SessionPhase::Empty,
            expected: "10 bytes",
            got: 3,
        };
        assert_eq!(wrong.code(), ResultCode::Format);
        assert!(!wrong.is_transient());

        assert_eq!(SessionError::NoCiphertext.code(), ResultCode::Format);
        assert_eq!(
            SessionError::ReadPastEnd { requested: 8, remaining: 4 }.code(),
            ResultCode::Format
        );
    }

    #[test]
    fn engine_errors_map_to_distinct_codes() {
        let busy = SessionError::from(EngineError::Busy { operation: EngineOperation::EncryptWord });
        assert_eq!(busy.code(), ResultCode::EngineBusy);
        assert!(busy.is_transient());

        let timeout = SessionError::from(EngineError::Timeout {
            operation: EngineOperation::LoadContext,
            elapsed: Duration::from_millis(51),
        });
        assert_eq!(timeout.code(), ResultCode::EngineTimeout);

        let limit = SessionError::from(EngineError::ReplayLimit { required: 70_000, limit: 65_536 });
        assert_eq!(limit.code(), ResultCode::ReplayLimit);
        assert!(!limit.is_transient());
    }

    #[test]
    fn result_code_wire_values_round_trip() {
        for code in [
            ResultCode::Format,
            ResultCode::Resource,
            ResultCode::EngineBusy,
            ResultCode::EngineTimeout,
            ResultCode::Access,
            ResultCode::ReplayLimit,
        ] {
            assert_eq!(ResultCode::from_u8(code.as_u8()), Some(code));
        }

        assert_eq!(ResultCode::from_u8(0), None);
        assert_eq!(ResultCode::from_u8(200), None);
    }

    #[test]
    fn io_conversion_keeps_kind() {
        let err: io::Error = SessionError::NoCiphertext.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
