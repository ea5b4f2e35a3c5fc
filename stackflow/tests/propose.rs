//! Proposing a stack against the in-memory fakes.

use pretty_assertions::assert_eq;

use stackflow::commands::open::{lookup_proposals, prefetch};
use stackflow::core::branch::BranchType;
use stackflow::core::opcode::Opcode;
use stackflow::io::config::StackflowConfig;
use stackflow::io::forge::Forge;
use stackflow::io::run_state::{CommandKind, RunState, RunStateStore};
use stackflow::plan::propose::{ProposeRequest, candidates, plan_propose};
use stackflow::plan::sync::SyncScope;
use stackflow::test_support::{FakeConfigStore, FakeForge, FakeRepository, RecordingBrowser};
use stackflow::vm::context::Context;
use stackflow::vm::interpreter::{Finish, Interpreter};

const KNOWN_URL: &str = "https://forge.test/pull/2";

/// `main <- a <- b <- c <- d`, with `d` parked and `c` checked out.
fn stack() -> (FakeRepository, StackflowConfig) {
    let mut repo = FakeRepository::new()
        .with_branch("main", &["m1"])
        .with_remote_branch("main", &["m1"]);
    for (name, commits) in [
        ("a", &["m1", "a1"][..]),
        ("b", &["m1", "a1", "b1"][..]),
        ("c", &["m1", "a1", "b1", "c1"][..]),
        ("d", &["m1", "a1", "b1", "c1", "d1"][..]),
    ] {
        repo = repo.with_branch(name, commits);
    }
    let repo = repo.with_remote_branch("b", &["m1", "a1", "b1"]).checked_out("c");

    let mut config = StackflowConfig::default();
    config.lineage.set_parent("a".into(), "main".into());
    config.lineage.set_parent("b".into(), "a".into());
    config.lineage.set_parent("c".into(), "b".into());
    config.lineage.set_parent("d".into(), "c".into());
    config.branch_types.insert("d".into(), BranchType::Parked);
    (repo, config)
}

/// Verifies that a known proposal is only opened, the other feature branches
/// get new proposals against their parents, and a parked branch gets none.
#[test]
fn proposing_a_stack_opens_known_proposals_and_creates_the_rest() {
    let (repo, config) = stack();
    let forge = FakeForge::with_known(&[("b", KNOWN_URL)]);
    let data = prefetch(&repo).expect("prefetch");

    let mut branches = candidates(&config, &data, SyncScope::Stack).expect("candidates");
    let names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
    lookup_proposals(&forge, &mut branches).expect("lookup");
    assert_eq!(branches[1].existing_proposal_url.as_deref(), Some(KNOWN_URL));
    assert_eq!(branches[3].existing_proposal_url, None);

    let request = ProposeRequest {
        scope: SyncScope::Stack,
        branches: &branches,
        title: Some("Stacked change"),
        body: None,
    };
    let program = plan_propose(&config, &data, &request).expect("plan");

    let opened: Vec<&Opcode> = program
        .iter()
        .filter(|op| matches!(op, Opcode::BrowserOpen { .. }))
        .collect();
    assert_eq!(
        opened,
        vec![&Opcode::BrowserOpen {
            url: KNOWN_URL.to_string()
        }]
    );
    let created: Vec<&str> = program
        .iter()
        .filter_map(|op| match op {
            Opcode::ProposalCreate { branch, .. } => Some(branch.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(created, vec!["a", "c"]);

    let temp = tempfile::tempdir().expect("tempdir");
    let store = RunStateStore::new(temp.path().join("runstate.json"));
    let config_store = FakeConfigStore::default();
    let browser = RecordingBrowser::default();
    let ctx = Context {
        repo: &repo,
        config: &config_store,
        forge: Some(&forge as &dyn Forge),
        browser: &browser,
    };
    let state = RunState::new(
        CommandKind::Propose,
        false,
        data.current.clone(),
        data.branches.clone(),
        config.snapshot(),
        data.stash_size,
        program,
    );
    let (finish, _) = Interpreter::new(ctx, &store).start(state).expect("run");
    assert_eq!(finish, Finish::Completed);

    let proposals: Vec<(String, String)> = forge
        .created()
        .into_iter()
        .map(|data| (data.branch.to_string(), data.target.to_string()))
        .collect();
    assert_eq!(
        proposals,
        vec![
            ("a".to_string(), "main".to_string()),
            ("c".to_string(), "b".to_string()),
        ]
    );
    assert!(forge.created().iter().all(|data| data.title.as_deref() == Some("Stacked change")));
    assert_eq!(
        browser.opened(),
        vec![
            FakeForge::proposal_url(&"a".into()),
            KNOWN_URL.to_string(),
            FakeForge::proposal_url(&"c".into()),
        ]
    );

    // Every proposed branch ends up on the remote.
    let snapshot = repo.snapshot();
    for name in ["a", "b", "c"] {
        assert!(snapshot.branches.has_tracking(&name.into()), "{name}");
    }
}

#[test]
fn a_parked_branch_alone_has_nothing_to_propose() {
    let (repo, config) = stack();
    let repo = repo.checked_out("d");
    let data = prefetch(&repo).expect("prefetch");
    let branches = candidates(&config, &data, SyncScope::Current).expect("candidates");
    let request = ProposeRequest {
        scope: SyncScope::Current,
        branches: &branches,
        title: None,
        body: None,
    };
    let err = plan_propose(&config, &data, &request).expect_err("nothing to propose");
    assert!(err.to_string().contains("d is a parked branch"), "{err:#}");
}

/// Verifies that a failed lookup stops the command instead of planning a
/// proposal that may already exist.
#[test]
fn failed_proposal_lookup_fails_before_planning() {
    let (repo, config) = stack();
    let data = prefetch(&repo).expect("prefetch");
    let mut branches = candidates(&config, &data, SyncScope::Stack).expect("candidates");

    let err = lookup_proposals(&FakeForge::unreachable(), &mut branches)
        .expect_err("lookup must fail");

    let message = format!("{err:#}");
    assert!(message.contains("look up proposal for a"), "{message}");
    assert!(message.contains("503"), "{message}");
    assert!(branches.iter().all(|branch| branch.existing_proposal_url.is_none()));
}
