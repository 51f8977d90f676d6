//! Model-based property tests.
//!
//! Random operation sequences are applied to real sessions sharing one
//! emulated engine and to independent software-only model sessions. Every
//! outcome must match.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld      RealWorld       Compare
//!      (software)   (shared engine)    Outcomes
//! ```

use proptest::prelude::*;
use trivmux_core::{Engine, PollConfig, Session, SessionId, SessionManager};
use trivmux_harness::{
    ModelWorld, Operation, Outcome, SESSION_SLOTS, SimEnv, SimRegisterFile,
};

/// Real sessions multiplexed onto one engine.
struct RealWorld {
    manager: SessionManager<SimRegisterFile, SimEnv>,
    sessions: Vec<Session>,
    next_id: u64,
}

impl RealWorld {
    fn new(latency: u32) -> Self {
        let engine =
            Engine::new(SimRegisterFile::with_latency(latency), SimEnv::default(), PollConfig::default());
        let sessions = (1..=SESSION_SLOTS as u64).map(|id| Session::new(SessionId::new(id))).collect();
        Self { manager: SessionManager::new(engine), sessions, next_id: SESSION_SLOTS as u64 + 1 }
    }

    fn apply(&mut self, op: &Operation) -> Outcome {
        let slot = op.slot();
        match op {
            Operation::Write { .. } => match self.sessions[slot].write(&op.payload(), &self.manager)
            {
                Ok(n) => Outcome::Written(n),
                Err(err) => Outcome::Failed(err.code()),
            },
            Operation::Read { len, .. } => match self.sessions[slot].read(usize::from(*len)) {
                Ok(bytes) => Outcome::Read(bytes),
                Err(err) => Outcome::Failed(err.code()),
            },
            Operation::Reopen { .. } => {
                self.sessions[slot] = Session::new(SessionId::new(self.next_id));
                self.next_id += 1;
                Outcome::Reopened
            },
        }
    }
}

fn operation() -> impl Strategy<Value = Operation> {
    let len = prop_oneof![Just(10u8), (1u8..=16).prop_map(|words| words * 4), any::<u8>()];
    prop_oneof![
        5 => (any::<u8>(), len, any::<u8>())
            .prop_map(|(slot, len, seed)| Operation::Write { slot, len, seed }),
        3 => (any::<u8>(), 0u8..=68).prop_map(|(slot, len)| Operation::Read { slot, len }),
        1 => any::<u8>().prop_map(|slot| Operation::Reopen { slot }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_real_sessions_match_model(
        ops in prop::collection::vec(operation(), 1..60),
        latency in 0u32..4,
    ) {
        let mut model = ModelWorld::new();
        let mut real = RealWorld::new(latency);

        for (step, op) in ops.iter().enumerate() {
            let expected = model.apply(op);
            let actual = real.apply(op);
            prop_assert_eq!(&actual, &expected, "step {} op {:?}", step, op);

            let slot = op.slot();
            prop_assert_eq!(real.sessions[slot].phase(), model.session(slot).phase());
            prop_assert_eq!(real.sessions[slot].pending(), model.session(slot).pending());
        }
    }
}

#[test]
fn interleaved_sessions_match_model() {
    let ops = [
        Operation::Write { slot: 0, len: 10, seed: 1 },
        Operation::Write { slot: 0, len: 10, seed: 2 },
        Operation::Write { slot: 1, len: 10, seed: 3 },
        Operation::Write { slot: 1, len: 10, seed: 4 },
        Operation::Write { slot: 0, len: 8, seed: 5 },
        Operation::Write { slot: 1, len: 12, seed: 6 },
        Operation::Read { slot: 0, len: 8 },
        Operation::Write { slot: 0, len: 4, seed: 7 },
        Operation::Read { slot: 1, len: 12 },
        Operation::Read { slot: 0, len: 4 },
    ];
    let mut model = ModelWorld::new();
    let mut real = RealWorld::new(1);

    for op in &ops {
        assert_eq!(real.apply(op), model.apply(op), "op {op:?}");
    }
    assert!(real.manager.context_swaps() >= 3);
}
