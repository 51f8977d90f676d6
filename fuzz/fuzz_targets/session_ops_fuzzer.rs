//! Fuzz target for sessions sharing one engine
//!
//! Applies arbitrary operation sequences to real sessions multiplexed onto
//! the emulated engine and to the software model, optionally with spurious
//! BUSY injected on the engine's status register.
//!
//! # Invariants
//!
//! - Sessions NEVER panic, whatever the write lengths or read sizes
//! - Without faults, every outcome equals the model's
//! - With faults, every failure is `EngineBusy` and every byte that is
//!   readable equals the model's keystream at the same position

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use trivmux_core::{Engine, PollConfig, ResultCode, Session, SessionId, SessionManager};
use trivmux_harness::{
    ChaoticPort, ModelWorld, Operation, Outcome, SESSION_SLOTS, SimEnv, SimRegisterFile,
};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    /// Seed for the chaos RNG
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-9% per status read
    failure_rate_percent: u8,
    /// Status reads per engine operation
    latency: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let failure_rate = f64::from(scenario.failure_rate_percent % 10) / 100.0;
    let port = ChaoticPort::with_seed(
        SimRegisterFile::with_latency(u32::from(scenario.latency % 8)),
        scenario.chaos_seed,
    );
    port.control().set_failure_rate(failure_rate);
    let engine = Engine::new(port, SimEnv::default(), PollConfig::default());
    let manager = SessionManager::new(engine);

    let mut model = ModelWorld::new();
    let mut sessions: Vec<Session> =
        (1..=SESSION_SLOTS as u64).map(|id| Session::new(SessionId::new(id))).collect();
    let mut next_id = SESSION_SLOTS as u64 + 1;

    for op in scenario.operations.iter().take(256) {
        let slot = op.slot();
        let actual = match op {
            Operation::Write { .. } => match sessions[slot].write(&op.payload(), &manager) {
                Ok(n) => Outcome::Written(n),
                Err(err) => Outcome::Failed(err.code()),
            },
            Operation::Read { len, .. } => match sessions[slot].read(usize::from(*len)) {
                Ok(bytes) => Outcome::Read(bytes),
                Err(err) => Outcome::Failed(err.code()),
            },
            Operation::Reopen { .. } => {
                sessions[slot] = Session::new(SessionId::new(next_id));
                next_id += 1;
                Outcome::Reopened
            },
        };

        if failure_rate == 0.0 {
            assert_eq!(actual, model.apply(op), "diverged on {op:?}");
            continue;
        }

        // Under faults the model only checks what the real session exposes.
        // A failed write leaves a prefix; the model would hold the full
        // buffer, so resynchronise the model by replacing its session.
        match &actual {
            Outcome::Failed(ResultCode::EngineBusy) => {
                assert!(matches!(op, Operation::Write { .. }));
                sessions[slot] = Session::new(SessionId::new(next_id));
                next_id += 1;
                model.apply(&Operation::Reopen { slot: slot as u8 });
            },
            Outcome::Failed(ResultCode::EngineTimeout) => panic!("timeout without a wedge"),
            _ => assert_eq!(actual, model.apply(op), "diverged on {op:?}"),
        }
    }
});
