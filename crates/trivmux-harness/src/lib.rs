//! Deterministic simulation harness for trivmux.
//!
//! Everything here stands in for something physical so the core can be
//! tested without hardware and without wall-clock time:
//!
//! - [`SimEnv`]: virtual clock that only moves on `sleep`, seeded RNG
//! - [`SimRegisterFile`]: register-level emulation of the cipher engine,
//!   computing its output with the software Trivium model
//! - [`ChaoticPort`]: fault injection in front of any [`RegisterPort`]
//!   (spurious BUSY, stuck BUSY, a device that never completes)
//!
//! # Model-Based Testing
//!
//! The `model` module provides a software reference for the session state
//! machine. Operations are applied to both the model and a real
//! `Session`/`SessionManager` pair, and their results are compared.
//!
//! [`RegisterPort`]: trivmux_core::RegisterPort

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
pub mod model;
pub mod register_file;
pub mod sim_env;

pub use chaotic::{ChaosControl, ChaoticPort};
pub use model::{ModelSession, ModelWorld, Operation, Outcome, SESSION_SLOTS};
pub use register_file::{DeviceStats, SimRegisterFile};
pub use sim_env::{SimEnv, SimInstant};
