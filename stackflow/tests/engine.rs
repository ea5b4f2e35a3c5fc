//! Workflow scenarios run against the in-memory fakes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use stackflow::commands::open::prefetch;
use stackflow::core::opcode::Opcode;
use stackflow::core::program::Program;
use stackflow::io::config::{ConfigStore, StackflowConfig};
use stackflow::io::run_state::{CommandKind, RunState, RunStateStore, RunStatus};
use stackflow::plan::sync::{SyncPlanner, SyncScope};
use stackflow::test_support::{
    FakeConfigStore, FakeForge, FakeRepository, FakeSnapshot, RecordingBrowser,
};
use stackflow::vm::context::Context;
use stackflow::vm::dry_run::{
    DryRunBrowser, DryRunConfigStore, DryRunForge, DryRunLog, DryRunRepository,
};
use stackflow::vm::interpreter::{Finish, INTERRUPTED, Interpreter};

/// `main <- alpha <- beta`, with `beta` checked out and dirty and a new
/// commit `m2` on `origin/main`.
fn stack_repo() -> FakeRepository {
    FakeRepository::new()
        .with_branch("main", &["m1"])
        .with_remote_branch("main", &["m1", "m2"])
        .with_branch("alpha", &["m1", "a1"])
        .with_remote_branch("alpha", &["m1", "a1"])
        .with_branch("beta", &["m1", "a1", "b1"])
        .with_remote_branch("beta", &["m1", "a1", "b1"])
        .checked_out("beta")
        .dirty()
}

fn stack_config() -> StackflowConfig {
    let mut config = StackflowConfig::default();
    config.lineage.set_parent("alpha".into(), "main".into());
    config.lineage.set_parent("beta".into(), "alpha".into());
    config
}

struct World {
    repo: FakeRepository,
    config: FakeConfigStore,
    forge: FakeForge,
    browser: RecordingBrowser,
    store: RunStateStore,
    _temp: TempDir,
}

impl World {
    fn new(repo: FakeRepository) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        Self {
            repo,
            config: FakeConfigStore::with_lineage(&[("alpha", "main"), ("beta", "alpha")]),
            forge: FakeForge::default(),
            browser: RecordingBrowser::default(),
            store: RunStateStore::new(temp.path().join("runstate.json")),
            _temp: temp,
        }
    }

    fn ctx(&self) -> Context<'_> {
        Context {
            repo: &self.repo,
            config: &self.config,
            forge: Some(&self.forge),
            browser: &self.browser,
        }
    }

    fn interpreter(&self) -> Interpreter<'_> {
        Interpreter::new(self.ctx(), &self.store)
    }

    fn sync_state(&self, scope: SyncScope, dry_run: bool) -> RunState {
        let data = prefetch(&self.repo).expect("prefetch");
        let config = stack_config();
        let program = SyncPlanner::new(&config, &data).plan(scope).expect("plan");
        RunState::new(
            CommandKind::Sync,
            dry_run,
            data.current,
            data.branches,
            config.snapshot(),
            data.stash_size,
            program,
        )
    }

    fn start_sync(&self) -> (Finish, RunState) {
        self.interpreter()
            .start(self.sync_state(SyncScope::Current, false))
            .expect("start")
    }
}

fn local_sha(snapshot: &FakeSnapshot, branch: &str) -> Option<String> {
    snapshot
        .branches
        .find(&branch.into())
        .and_then(|info| info.local_sha.as_ref())
        .map(|sha| sha.to_string())
}

fn remote_sha(snapshot: &FakeSnapshot, branch: &str) -> Option<String> {
    snapshot
        .branches
        .find(&branch.into())
        .and_then(|info| info.remote_sha.as_ref())
        .map(|sha| sha.to_string())
}

/// End state of an uninterrupted sync of the stack.
fn synced_snapshot() -> FakeSnapshot {
    let world = World::new(stack_repo());
    let (finish, _) = world.start_sync();
    assert_eq!(finish, Finish::Completed);
    world.repo.snapshot()
}

/// Distinct mutating calls an uninterrupted sync makes, in order.
fn sync_calls() -> Vec<String> {
    let world = World::new(stack_repo());
    world.start_sync();
    let mut seen = BTreeSet::new();
    world
        .repo
        .calls()
        .into_iter()
        .filter(|call| seen.insert(call.clone()))
        .collect()
}

#[test]
fn conflict_free_sync_completes_and_clears_the_run_state() {
    let world = World::new(stack_repo());
    let (finish, state) = world.start_sync();

    assert_eq!(finish, Finish::Completed);
    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.run_program.is_empty());
    assert!(state.undo_api_program.len() >= 10, "{}", state.undo_api_program);
    assert!(state.end_branches_snapshot.is_some());
    assert!(!world.store.exists());

    let snapshot = world.repo.snapshot();
    assert_eq!(local_sha(&snapshot, "main").as_deref(), Some("m1+m2"));
    assert_eq!(local_sha(&snapshot, "alpha").as_deref(), Some("a1+m1+m2"));
    assert_eq!(local_sha(&snapshot, "beta").as_deref(), Some("a1+b1+m1+m2"));
    assert_eq!(remote_sha(&snapshot, "beta").as_deref(), Some("a1+b1+m1+m2"));
    assert_eq!(snapshot.branches.active, Some("beta".into()));
    assert!(snapshot.dirty);
    assert_eq!(snapshot.stash_size, 0);
}

#[test]
fn conflict_suspends_and_continue_finishes_after_resolution() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("merge alpha");

    let (finish, state) = world.start_sync();
    assert!(matches!(finish, Finish::Suspended { .. }), "{finish:?}");
    assert_eq!(
        state.failing_opcode(),
        Some(&Opcode::Merge {
            branch: "beta".into(),
            source: "alpha".into(),
        })
    );
    assert!(state.can_skip());

    // A later process picks the workflow up from disk.
    let persisted = world.store.load().expect("load").expect("run state");
    assert_eq!(persisted, state);

    let err = world
        .interpreter()
        .resume(persisted.clone())
        .expect_err("unresolved conflicts");
    assert!(err.to_string().contains("resolve the conflicts"));

    world.repo.resolve_conflicts();
    let (finish, _) = world.interpreter().resume(persisted).expect("resume");
    assert_eq!(finish, Finish::Completed);
    assert!(!world.store.exists());
    assert_eq!(world.repo.snapshot(), synced_snapshot());
}

/// Verifies that only inverses of the opcodes that ran are recorded, and
/// that the run program starts at the one that conflicted.
#[test]
fn conflict_on_the_third_of_five_opcodes() {
    let repo = FakeRepository::new()
        .with_branch("main", &["m1", "m2"])
        .with_branch("feature", &["m1", "f1"])
        .with_remote_branch("feature", &["m1", "f1"])
        .checked_out("main");
    let world = World::new(repo);
    let opcodes = vec![
        Opcode::Fetch,
        Opcode::Checkout {
            branch: "feature".into(),
        },
        Opcode::Merge {
            branch: "feature".into(),
            source: "main".into(),
        },
        Opcode::PushCurrentBranch {
            branch: "feature".into(),
        },
        Opcode::Checkout {
            branch: "main".into(),
        },
    ];
    let data = prefetch(&world.repo).expect("prefetch");
    let state = RunState::new(
        CommandKind::Sync,
        false,
        data.current,
        data.branches,
        stack_config().snapshot(),
        data.stash_size,
        Program::from(opcodes.clone()),
    );
    world.repo.conflict_on("merge main");

    let (finish, state) = world.interpreter().start(state).expect("start");

    assert!(matches!(finish, Finish::Suspended { .. }), "{finish:?}");
    assert_eq!(state.status, RunStatus::Suspended);
    assert_eq!(state.run_program, Program::from(opcodes[2..].to_vec()));
    assert_eq!(
        state.undo_api_program,
        Program::from(vec![Opcode::Checkout {
            branch: "main".into()
        }])
    );
    assert_eq!(world.store.load().expect("load"), Some(state));
}

#[test]
fn skip_abandons_the_conflicting_branch_and_restores_the_worktree() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("merge alpha");
    let (_, state) = world.start_sync();

    let (finish, _) = world.interpreter().skip(state).expect("skip");
    assert_eq!(finish, Finish::Completed);

    let snapshot = world.repo.snapshot();
    assert_eq!(local_sha(&snapshot, "alpha").as_deref(), Some("a1+m1+m2"));
    assert_eq!(local_sha(&snapshot, "beta").as_deref(), Some("a1+b1+m1"));
    assert!(snapshot.dirty);
    assert_eq!(snapshot.stash_size, 0);
    let calls = world.repo.calls();
    assert!(calls.contains(&"abort merge".to_string()));
    assert!(!calls.contains(&"push beta".to_string()));
}

#[test]
fn skip_is_refused_for_fatal_failures() {
    let world = World::new(stack_repo());
    world.repo.fail_on("push alpha");
    let (finish, state) = world.start_sync();
    assert!(matches!(finish, Finish::Aborted { .. }), "{finish:?}");
    assert!(!state.can_skip());
    assert!(world.interpreter().skip(state).is_err());
}

/// Verifies resumability: a failure injected at each distinct backend call
/// leaves a run program that, continued, reaches the uninterrupted end state.
#[test]
fn a_failure_at_any_step_can_be_continued_to_the_same_end_state() {
    let expected = synced_snapshot();
    let calls = sync_calls();
    assert!(calls.len() >= 8, "{calls:?}");

    for call in calls {
        let world = World::new(stack_repo());
        world.repo.fail_on(&call);
        let (finish, state) = world.start_sync();
        assert!(matches!(finish, Finish::Aborted { .. }), "{call}: {finish:?}");
        assert!(world.store.exists(), "{call}");

        let persisted = world.store.load().expect("load").expect("run state");
        assert_eq!(persisted, state, "{call}");
        let (finish, _) = world.interpreter().resume(persisted).expect("resume");
        assert_eq!(finish, Finish::Completed, "{call}");
        assert_eq!(world.repo.snapshot(), expected, "{call}");
    }
}

/// Verifies that the undo program persisted at each failure point restores
/// the branches, the stash and the lineage the workflow started from.
#[test]
fn undo_after_a_failure_at_any_step_restores_the_initial_state() {
    let initial = stack_repo().snapshot();

    for call in sync_calls() {
        let world = World::new(stack_repo());
        let initial_config = world.config.snapshot().expect("config");
        world.repo.fail_on(&call);
        let (_, state) = world.start_sync();

        let persisted = world.store.load().expect("load").expect("run state");
        assert_eq!(persisted, state);
        let (finish, _) = world.interpreter().undo(persisted).expect("undo");
        assert_eq!(finish, Finish::Completed, "{call}");
        assert!(!world.store.exists(), "{call}");
        assert_eq!(world.repo.snapshot(), initial, "{call}");
        assert_eq!(world.config.snapshot().expect("config"), initial_config, "{call}");
    }
}

#[test]
fn undo_of_a_suspended_merge_aborts_it_first() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("merge alpha");
    let (_, state) = world.start_sync();

    let (finish, _) = world.interpreter().undo(state).expect("undo");
    assert_eq!(finish, Finish::Completed);
    assert_eq!(world.repo.snapshot(), stack_repo().snapshot());
    assert!(world.repo.calls().contains(&"abort merge".to_string()));
}

/// The record is gone after success, so only the returned state can undo.
#[test]
fn completed_workflow_can_be_undone_from_memory() {
    let world = World::new(stack_repo());
    let (finish, state) = world.start_sync();
    assert_eq!(finish, Finish::Completed);

    let (finish, _) = world.interpreter().undo(state).expect("undo");
    assert_eq!(finish, Finish::Completed);
    assert_eq!(world.repo.snapshot(), stack_repo().snapshot());
}

#[test]
fn a_second_workflow_is_refused_while_one_is_stopped() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("merge alpha");
    world.start_sync();
    let calls_before = world.repo.calls();

    let err = world
        .interpreter()
        .start(world.sync_state(SyncScope::Current, false))
        .expect_err("exclusive");
    assert!(err.to_string().contains("already in progress"), "{err:#}");
    assert_eq!(world.repo.calls(), calls_before);
}

#[test]
fn dry_run_records_commands_and_changes_nothing() {
    let world = World::new(stack_repo());
    let before = world.repo.snapshot();
    let state = world.sync_state(SyncScope::Current, true);

    let log = DryRunLog::new();
    let dry_repo = DryRunRepository::new(&world.repo, &log);
    let dry_config = DryRunConfigStore::new(&world.config, &log).expect("config");
    let dry_forge = DryRunForge::new(&world.forge, &log);
    let dry_browser = DryRunBrowser::new(&log);
    let ctx = Context {
        repo: &dry_repo,
        config: &dry_config,
        forge: Some(&dry_forge),
        browser: &dry_browser,
    };
    let (finish, _) = Interpreter::new(ctx, &world.store)
        .start(state)
        .expect("dry run");

    assert_eq!(finish, Finish::Completed);
    assert!(!world.store.exists());
    assert!(world.repo.calls().is_empty());
    assert_eq!(world.repo.snapshot(), before);

    let lines = log.lines();
    assert_eq!(lines.first().map(String::as_str), Some("git fetch --prune origin"));
    assert!(lines.contains(&"git checkout main".to_string()), "{lines:?}");
    assert!(lines.contains(&"git merge --no-edit alpha".to_string()), "{lines:?}");
    assert_eq!(lines.last().map(String::as_str), Some("git stash pop"));
}

/// Verifies that a set interrupt flag stops before the first opcode and that
/// the suspended workflow resumes like any other.
#[test]
fn interrupt_suspends_at_an_opcode_boundary() {
    let world = World::new(stack_repo());
    let flag = Arc::new(AtomicBool::new(true));
    let (finish, state) = world
        .interpreter()
        .with_interrupt(Arc::clone(&flag))
        .start(world.sync_state(SyncScope::Current, false))
        .expect("start");

    assert_eq!(
        finish,
        Finish::Suspended {
            cause: INTERRUPTED.to_string()
        }
    );
    assert!(world.repo.calls().is_empty());
    assert_eq!(state.undo_api_program, Program::new());

    flag.store(false, Ordering::SeqCst);
    let persisted = world.store.load().expect("load").expect("run state");
    let (finish, _) = world
        .interpreter()
        .with_interrupt(flag)
        .resume(persisted)
        .expect("resume");
    assert_eq!(finish, Finish::Completed);
    assert_eq!(world.repo.snapshot(), synced_snapshot());
}

/// Verifies that an undo that stops part-way blocks `continue` and can be
/// run again to finish.
#[test]
fn failed_undo_keeps_the_remaining_steps_for_another_attempt() {
    let world = World::new(stack_repo());
    world.repo.fail_on("push beta");
    let (_, state) = world.start_sync();

    world.repo.fail_on("checkout beta");
    let (finish, stopped) = world.interpreter().undo(state).expect("undo");
    assert!(matches!(finish, Finish::Aborted { .. }), "{finish:?}");
    assert_eq!(stopped.status, RunStatus::Undoing);

    let persisted = world.store.load().expect("load").expect("run state");
    assert!(world.interpreter().resume(persisted.clone()).is_err());
    let (finish, _) = world.interpreter().undo(persisted).expect("undo again");
    assert_eq!(finish, Finish::Completed);
    assert_eq!(world.repo.snapshot(), stack_repo().snapshot());
}

/// Verifies that a conflicting stash pop is retried as a drop once resolved,
/// since the changes are already in the worktree.
#[test]
fn conflicting_stash_pop_is_retried_as_a_drop() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("stash pop");
    let (finish, state) = world.start_sync();

    assert!(matches!(finish, Finish::Suspended { .. }), "{finish:?}");
    assert_eq!(
        state.failing_opcode(),
        Some(&Opcode::RestoreOpenChanges { conflicted: true })
    );
    let persisted = world.store.load().expect("load").expect("run state");
    assert_eq!(persisted, state);

    world.repo.resolve_conflicts();
    let (finish, _) = world.interpreter().resume(persisted).expect("resume");
    assert_eq!(finish, Finish::Completed);
    assert_eq!(world.repo.calls().last().map(String::as_str), Some("stash drop"));
    let snapshot = world.repo.snapshot();
    assert_eq!(snapshot.stash_size, 0);
    assert!(snapshot.dirty);
}

/// Verifies that edits left in the worktree while resolving a merge do not
/// make the final restore drop the stashed changes.
#[test]
fn edits_made_while_resolving_do_not_drop_the_stash() {
    let world = World::new(stack_repo());
    world.repo.conflict_on("merge alpha");
    let (_, state) = world.start_sync();

    world.repo.resolve_conflicts();
    world.repo.make_dirty();
    let (finish, _) = world.interpreter().resume(state).expect("resume");

    assert_eq!(finish, Finish::Completed);
    let calls = world.repo.calls();
    assert_eq!(calls.last().map(String::as_str), Some("stash pop"));
    assert!(!calls.contains(&"stash drop".to_string()), "{calls:?}");
    assert_eq!(world.repo.snapshot().stash_size, 0);
}
