//! Property tests for the program optimizer.

use proptest::prelude::*;

use stackflow::core::opcode::Opcode;
use stackflow::core::optimizer::optimize;
use stackflow::core::program::Program;
use stackflow::test_support::{
    FakeConfigStore, FakeRepository, FakeSnapshot, RecordingBrowser,
};
use stackflow::vm::context::Context;
use stackflow::vm::exec::Outcome;

const BRANCHES: [&str; 3] = ["main", "a", "b"];

fn branch() -> impl Strategy<Value = &'static str> {
    prop::sample::select(BRANCHES.to_vec())
}

fn opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        branch().prop_map(|b| Opcode::Checkout { branch: b.into() }),
        branch().prop_map(|b| Opcode::PushCurrentBranch { branch: b.into() }),
        branch().prop_map(|b| Opcode::PushCurrentBranchIfLocal { branch: b.into() }),
        branch().prop_map(|b| Opcode::DeleteTrackingBranch { branch: b.into() }),
        branch().prop_map(|b| Opcode::Merge {
            branch: b.into(),
            source: "main".to_string(),
        }),
        Just(Opcode::EndOfBranchProgram),
    ]
}

fn program() -> impl Strategy<Value = Program> {
    prop::collection::vec(opcode(), 0..24).prop_map(Program::from)
}

fn repo() -> FakeRepository {
    FakeRepository::new()
        .with_branch("main", &["m1", "m2"])
        .with_remote_branch("main", &["m1"])
        .with_branch("a", &["m1", "a1"])
        .with_branch("b", &["m1", "b1"])
        .with_remote_branch("b", &["m1"])
        .checked_out("a")
}

fn run(program: &Program) -> FakeSnapshot {
    let repo = repo();
    let config = FakeConfigStore::default();
    let browser = RecordingBrowser::default();
    let ctx = Context {
        repo: &repo,
        config: &config,
        forge: None,
        browser: &browser,
    };
    for opcode in program {
        assert_eq!(opcode.run(&ctx), Outcome::Success, "{opcode}");
    }
    repo.snapshot()
}

proptest! {
    #[test]
    fn optimizing_twice_changes_nothing(program in program()) {
        let once = optimize(program);
        prop_assert_eq!(optimize(once.clone()), once);
    }

    #[test]
    fn optimized_program_is_never_longer(program in program()) {
        let len = program.len();
        prop_assert!(optimize(program).len() <= len);
    }

    /// Verifies that dropped opcodes were redundant: both programs leave the
    /// fake repository in the same state.
    #[test]
    fn optimized_program_reaches_the_same_state(program in program()) {
        let optimized = optimize(program.clone());
        prop_assert_eq!(run(&optimized), run(&program));
    }
}
