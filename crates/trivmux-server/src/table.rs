//! Session table: the per-connection byte-stream interface.
//!
//! Maps opaque handles to sessions. Each session has its own lock, so two
//! clients only ever wait on each other inside the manager's exclusive
//! domain, never on the table. Closing a handle drops the session, which
//! releases and zeroizes its key, IV and pending ciphertext.

#![allow(clippy::disallowed_types, reason = "Sessions are driven from blocking tasks")]

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use trivmux_core::{
    Environment, RegisterPort, ResultCode, Session, SessionError, SessionId, SessionManager,
};

/// Opaque handle for an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Raw handle value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Table limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Maximum number of concurrently open sessions
    pub max_sessions: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { max_sessions: 1024 }
    }
}

/// Errors from table operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// Handle is not open
    #[error("unknown session {0}")]
    UnknownSession(SessionHandle),

    /// Session limit reached
    #[error("session limit of {limit} reached")]
    Full {
        /// Configured limit
        limit: usize,
    },

    /// The session rejected the operation
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl TableError {
    /// Boundary result code.
    pub fn code(&self) -> ResultCode {
        match self {
            Self::UnknownSession(_) => ResultCode::Access,
            Self::Full { .. } => ResultCode::Resource,
            Self::Session(err) => err.code(),
        }
    }
}

/// Open sessions sharing one [`SessionManager`].
pub struct SessionTable<P, E> {
    manager: Arc<SessionManager<P, E>>,
    env: E,
    config: TableConfig,
    sessions: Mutex<HashMap<SessionHandle, Arc<Mutex<Session>>>>,
}

impl<P: RegisterPort, E: Environment> SessionTable<P, E> {
    /// Empty table over `manager`.
    pub fn new(manager: Arc<SessionManager<P, E>>, env: E, config: TableConfig) -> Self {
        Self { manager, env, config, sessions: Mutex::new(HashMap::new()) }
    }

    /// Open a new session in the `Empty` phase.
    ///
    /// # Errors
    ///
    /// `TableError::Full` if `max_sessions` are already open.
    pub fn open(&self) -> Result<SessionHandle, TableError> {
        let mut sessions = self.sessions();
        if sessions.len() >= self.config.max_sessions {
            tracing::warn!(limit = self.config.max_sessions, "session table full");
            return Err(TableError::Full { limit: self.config.max_sessions });
        }

        let handle = loop {
            let raw = self.env.random_u64();
            let handle = SessionHandle(raw);
            if raw != 0 && !sessions.contains_key(&handle) {
                break handle;
            }
        };

        let session = Session::new(SessionId::new(handle.0));
        sessions.insert(handle, Arc::new(Mutex::new(session)));
        tracing::info!(session = %handle, open = sessions.len(), "session opened");
        Ok(handle)
    }

    /// Write to a session. Returns the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// - `TableError::UnknownSession` if the handle is not open
    /// - `TableError::Session` for anything the session rejects
    pub fn write(&self, handle: SessionHandle, data: &[u8]) -> Result<usize, TableError> {
        let session = self.session(handle)?;
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(session.write(data, &self.manager)?)
    }

    /// Read exactly `requested` bytes of pending ciphertext.
    ///
    /// # Errors
    ///
    /// - `TableError::UnknownSession` if the handle is not open
    /// - `TableError::Session` if nothing or too little is pending
    pub fn read(&self, handle: SessionHandle, requested: usize) -> Result<Vec<u8>, TableError> {
        let session = self.session(handle)?;
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(session.read(requested)?)
    }

    /// Close a session. Returns false if the handle was not open.
    pub fn close(&self, handle: SessionHandle) -> bool {
        let removed = self.sessions().remove(&handle).is_some();
        if removed {
            tracing::info!(session = %handle, "session closed");
        }
        removed
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    /// True if no session is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared session manager.
    pub fn manager(&self) -> &Arc<SessionManager<P, E>> {
        &self.manager
    }

    fn session(&self, handle: SessionHandle) -> Result<Arc<Mutex<Session>>, TableError> {
        self.sessions().get(&handle).cloned().ok_or(TableError::UnknownSession(handle))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionHandle, Arc<Mutex<Session>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P, E> fmt::Debug for SessionTable<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTable").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use trivmux_core::{Engine, PollConfig};
    use trivmux_harness::{SimEnv, SimRegisterFile};

    use super::*;

    fn table(max_sessions: usize) -> SessionTable<SimRegisterFile, SimEnv> {
        let env = SimEnv::with_seed(11);
        let engine = Engine::new(SimRegisterFile::new(), env.clone(), PollConfig::default());
        SessionTable::new(Arc::new(SessionManager::new(engine)), env, TableConfig { max_sessions })
    }

    #[test]
    fn open_write_read_close() {
        let table = table(4);
        let handle = table.open().unwrap();

        assert_eq!(table.write(handle, &[0; 10]), Ok(10));
        assert_eq!(table.write(handle, &[0; 10]), Ok(10));
        assert_eq!(table.write(handle, &[0; 4]), Ok(4));
        assert_eq!(table.read(handle, 4).unwrap(), [0xfb, 0xe0, 0xbf, 0x26]);

        assert!(table.close(handle));
        assert!(!table.close(handle));
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_handle_is_access_error() {
        let table = table(4);
        let handle = table.open().unwrap();
        table.close(handle);

        let err = table.write(handle, &[0; 10]).unwrap_err();

        assert_eq!(err, TableError::UnknownSession(handle));
        assert_eq!(err.code(), ResultCode::Access);
    }

    #[test]
    fn limit_is_resource_error() {
        let table = table(2);
        let first = table.open().unwrap();
        table.open().unwrap();

        let err = table.open().unwrap_err();
        assert_eq!(err.code(), ResultCode::Resource);

        table.close(first);
        assert!(table.open().is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn handles_are_distinct_and_non_zero() {
        let table = table(64);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..64 {
            let handle = table.open().unwrap();
            assert_ne!(handle.as_u64(), 0);
            assert!(seen.insert(handle));
        }
    }

    #[test]
    fn session_errors_keep_their_code() {
        let table = table(1);
        let handle = table.open().unwrap();

        assert_eq!(table.read(handle, 1).unwrap_err().code(), ResultCode::Format);
        assert_eq!(table.write(handle, &[0; 3]).unwrap_err().code(), ResultCode::Format);
    }
}
