//! Session Manager: the exclusive-access domain around the engine.
//!
//! Every hardware access goes through [`SessionManager::encrypt_buffer`],
//! which holds one mutex for the whole buffer. The engine keeps a single
//! context, so the manager tracks which session's keystream is loaded and how
//! far it has advanced. A request whose keystream does not match is preceded
//! by STOP, a fresh load and a replay of the session's consumed words.
//!
//! Replay runs inside the domain, so its length is capped by a replay limit.
//! A session that has consumed more words than the limit keeps working while
//! its context stays loaded, but cannot be restored after another session
//! takes the engine; it gets [`EngineError::ReplayLimit`] and must set a new
//! IV.
//!
//! # Invariants
//!
//! - Word sequences of different requests never interleave at the engine
//! - `context` is `Some` only if the engine holds exactly that keystream at
//!   exactly that position
//! - Any engine fault clears `context`; a refused swap leaves it untouched
//! - A swap never clocks more than the replay limit in discard words

#![allow(clippy::disallowed_types, reason = "Engine access is synchronous and blocking")]

use std::sync::{Mutex, MutexGuard};

use zeroize::Zeroizing;

use crate::{
    engine::Engine,
    env::Environment,
    error::EngineError,
    port::RegisterPort,
    regs::{IV_LEN, KEY_LEN, WORD_LEN, pack_words},
    session::SessionId,
};

/// A session's keystream coordinates for one encrypt request.
#[derive(Clone, Copy)]
pub struct Keystream<'a> {
    /// Requesting session
    pub session: SessionId,
    /// Session key
    pub key: &'a [u8; KEY_LEN],
    /// Session IV
    pub iv: &'a [u8; IV_LEN],
    /// Words of keystream the session has already consumed
    pub position: u64,
}

impl std::fmt::Debug for Keystream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystream")
            .field("session", &self.session)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Default cap on discard words replayed by one context swap (256 KiB of
/// keystream).
pub const DEFAULT_REPLAY_LIMIT: u64 = 1 << 16;

/// Keystream currently loaded into the engine.
pub struct EngineContext {
    owner: SessionId,
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: Zeroizing<[u8; IV_LEN]>,
    position: u64,
}

impl EngineContext {
    fn new(stream: &Keystream<'_>) -> Self {
        Self {
            owner: stream.session,
            key: Zeroizing::new(*stream.key),
            iv: Zeroizing::new(*stream.iv),
            position: stream.position,
        }
    }

    /// Session that last used this context.
    pub fn owner(&self) -> SessionId {
        self.owner
    }

    /// Words the engine has advanced since the load.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Same key, IV and position. Sessions sharing a key and IV can share a
    /// context, which is exactly when their keystreams coincide.
    fn matches(&self, stream: &Keystream<'_>) -> bool {
        *self.key == *stream.key && *self.iv == *stream.iv && self.position == stream.position
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("owner", &self.owner)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

struct Domain<P, E> {
    engine: Engine<P, E>,
    context: Option<EngineContext>,
    swaps: u64,
}

/// Owns the engine and serializes all access to it.
pub struct SessionManager<P, E> {
    domain: Mutex<Domain<P, E>>,
    replay_limit: u64,
}

impl<P: RegisterPort, E: Environment> SessionManager<P, E> {
    /// Take ownership of the engine. No context is assumed loaded.
    pub fn new(engine: Engine<P, E>) -> Self {
        Self::with_replay_limit(engine, DEFAULT_REPLAY_LIMIT)
    }

    /// Like [`new`](Self::new), with a custom cap on replayed words per swap.
    pub fn with_replay_limit(engine: Engine<P, E>, replay_limit: u64) -> Self {
        Self {
            domain: Mutex::new(Domain { engine, context: None, swaps: 0 }),
            replay_limit,
        }
    }

    /// Most discard words a context swap may replay.
    pub fn replay_limit(&self) -> u64 {
        self.replay_limit
    }

    /// Encrypt `plaintext` on the session's keystream, appending to `output`.
    ///
    /// `plaintext` must be a whole number of words; a trailing partial word
    /// is ignored. On an engine fault `output` holds the ciphertext of the
    /// words completed before the failure, and the loaded context is
    /// forgotten.
    ///
    /// # Errors
    ///
    /// - `EngineError::Busy` if the engine reports BUSY at any step
    /// - `EngineError::Timeout` if the engine stops responding
    /// - `EngineError::ReplayLimit` if restoring the session's keystream
    ///   would exceed the replay limit; nothing is sent to the engine
    pub fn encrypt_buffer(
        &self,
        stream: &Keystream<'_>,
        plaintext: &[u8],
        output: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let mut guard = self.lock();
        let domain = &mut *guard;

        let result = Self::process(domain, self.replay_limit, stream, plaintext, output);
        if let Err(err) = &result {
            if !matches!(err, EngineError::ReplayLimit { .. }) {
                domain.context = None;
            }
            tracing::warn!(session = %stream.session, error = %err, "encrypt aborted");
        }
        result
    }

    /// Stop the engine and forget the loaded context.
    pub fn shutdown(&self) {
        let mut domain = self.lock();
        domain.engine.stop();
        domain.context = None;
        tracing::info!(swaps = domain.swaps, "engine stopped");
    }

    /// Session whose keystream is currently loaded, if any.
    pub fn context_owner(&self) -> Option<SessionId> {
        self.lock().context.as_ref().map(EngineContext::owner)
    }

    /// Number of context loads performed so far.
    pub fn context_swaps(&self) -> u64 {
        self.lock().swaps
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// The loaded context is forgotten afterwards since `f` may have driven
    /// the engine anywhere.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<P, E>) -> R) -> R {
        let mut domain = self.lock();
        domain.context = None;
        f(&mut domain.engine)
    }

    fn process(
        domain: &mut Domain<P, E>,
        replay_limit: u64,
        stream: &Keystream<'_>,
        plaintext: &[u8],
        output: &mut Vec<u8>,
    ) -> Result<(), EngineError> {
        let Domain { engine, context, swaps } = domain;

        if let Some(loaded) = context.as_mut().filter(|loaded| loaded.matches(stream)) {
            loaded.owner = stream.session;
        } else {
            if stream.position > replay_limit {
                return Err(EngineError::ReplayLimit {
                    required: stream.position,
                    limit: replay_limit,
                });
            }

            let previous = context.take().map(|loaded| loaded.owner);
            engine.stop();
            engine.load_context(&pack_words(stream.key), &pack_words(stream.iv))?;
            for _ in 0..stream.position {
                engine.encrypt_word(0)?;
            }
            *swaps += 1;
            *context = Some(EngineContext::new(stream));

            tracing::debug!(
                session = %stream.session,
                previous = ?previous,
                replayed = stream.position,
                "context swapped"
            );
        }

        for chunk in plaintext.chunks_exact(WORD_LEN) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let out = engine.encrypt_word(word)?;
            output.extend_from_slice(&out.to_le_bytes());

            if let Some(loaded) = context.as_mut() {
                loaded.position += 1;
            }
        }

        Ok(())
    }

    /// Acquire the domain. A panic in a previous holder leaves the engine in
    /// an unknown state, so it is stopped and the context dropped.
    fn lock(&self) -> MutexGuard<'_, Domain<P, E>> {
        match self.domain.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                self.domain.clear_poison();
                guard.engine.stop();
                guard.context = None;
                tracing::warn!("engine domain recovered after panic, engine stopped");
                guard
            },
        }
    }
}

impl<P, E> std::fmt::Debug for SessionManager<P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}
