//! Trivmux core.
//!
//! Multiplexes independent cipher sessions onto one stream-cipher engine that
//! holds a single key/IV context at a time. Everything in this crate is
//! synchronous and I/O free apart from the injected [`RegisterPort`], so the
//! same code runs against the register-level emulator in tests and against a
//! mapped device in production.
//!
//! # Architecture
//!
//! ```text
//!  Session ──write──> SessionManager ──(exclusive domain)──> Engine ──> RegisterPort
//!     ^                     │                                  │
//!     └──── ciphertext ─────┘                     load / encrypt_word / stop
//! ```
//!
//! - [`Session`]: per-client state machine (`Empty → HasKey → Ready`)
//! - [`SessionManager`]: owns the engine, serializes access, swaps contexts
//! - [`Engine`]: engine protocol over raw registers with bounded polling
//! - [`RegisterPort`]: read/write capability on the nine-slot register file
//! - [`Environment`]: clock and randomness, injected for determinism

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod env;
pub mod error;
pub mod manager;
pub mod port;
pub mod regs;
pub mod session;

pub use engine::{Engine, PollConfig};
pub use env::Environment;
pub use error::{EngineError, EngineOperation, ResultCode, SessionError};
pub use manager::{DEFAULT_REPLAY_LIMIT, EngineContext, Keystream, SessionManager};
pub use port::RegisterPort;
pub use regs::{ConfigBits, IV_LEN, KEY_LEN, Register, WORD_LEN};
pub use session::{Session, SessionId, SessionPhase};
