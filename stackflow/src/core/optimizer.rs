//! Pure program rewrites that remove opcodes without changing the end state.
//!
//! Every rule only deletes opcodes, never reorders them, and `optimize` runs
//! the rules until none of them removes anything. A program returned by
//! `optimize` is therefore a fixpoint: optimizing it again is a no-op.

use std::collections::BTreeSet;

use tracing::debug;

use crate::core::branch::BranchName;
use crate::core::opcode::Opcode;
use crate::core::program::Program;

/// Rewrite `program` into an equivalent, shorter program.
pub fn optimize(program: Program) -> Program {
    let original_len = program.len();
    let mut opcodes = program.into_vec();
    loop {
        let before = opcodes.len();
        opcodes = remove_superseded_checkouts(opcodes);
        opcodes = remove_pushes_before_remote_delete(opcodes);
        opcodes = remove_redundant_push_if_local(opcodes);
        opcodes = normalize_branch_markers(opcodes);
        if opcodes.len() == before {
            break;
        }
    }
    debug!(
        before = original_len,
        after = opcodes.len(),
        "optimized program"
    );
    Program::from(opcodes)
}

/// A checkout immediately followed by another checkout has no observable effect.
fn remove_superseded_checkouts(opcodes: Vec<Opcode>) -> Vec<Opcode> {
    let mut out = Vec::with_capacity(opcodes.len());
    let mut iter = opcodes.into_iter().peekable();
    while let Some(opcode) = iter.next() {
        let superseded = matches!(opcode, Opcode::Checkout { .. })
            && matches!(iter.peek(), Some(Opcode::Checkout { .. }));
        if !superseded {
            out.push(opcode);
        }
    }
    out
}

/// Writing a remote branch right before deleting it is moot.
fn remove_pushes_before_remote_delete(opcodes: Vec<Opcode>) -> Vec<Opcode> {
    let mut out = Vec::with_capacity(opcodes.len());
    let mut iter = opcodes.into_iter().peekable();
    while let Some(opcode) = iter.next() {
        let moot = match (opcode.pushed_branch(), iter.peek()) {
            (Some(pushed), Some(Opcode::DeleteTrackingBranch { branch })) => pushed == branch,
            _ => false,
        };
        if !moot {
            out.push(opcode);
        }
    }
    out
}

/// `PushCurrentBranchIfLocal` is a no-op once an earlier opcode has created
/// the tracking branch and nothing deleted it since.
fn remove_redundant_push_if_local(opcodes: Vec<Opcode>) -> Vec<Opcode> {
    let mut tracked: BTreeSet<BranchName> = BTreeSet::new();
    let mut out = Vec::with_capacity(opcodes.len());
    for opcode in opcodes {
        if let Opcode::PushCurrentBranchIfLocal { branch } = &opcode
            && tracked.contains(branch)
        {
            continue;
        }
        if let Some(branch) = opcode.pushed_branch() {
            tracked.insert(branch.clone());
        }
        if let Opcode::DeleteTrackingBranch { branch } = &opcode {
            tracked.remove(branch);
        }
        out.push(opcode);
    }
    out
}

/// Collapse repeated markers and drop markers with no branch segment after or before them.
fn normalize_branch_markers(opcodes: Vec<Opcode>) -> Vec<Opcode> {
    let mut out: Vec<Opcode> = Vec::with_capacity(opcodes.len());
    for opcode in opcodes {
        if opcode.is_marker() && out.last().is_none_or(Opcode::is_marker) {
            continue;
        }
        out.push(opcode);
    }
    if out.last().is_some_and(Opcode::is_marker) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn checkout(name: &str) -> Opcode {
        Opcode::Checkout {
            branch: name.into(),
        }
    }

    fn push(name: &str) -> Opcode {
        Opcode::PushCurrentBranch {
            branch: name.into(),
        }
    }

    fn push_if_local(name: &str) -> Opcode {
        Opcode::PushCurrentBranchIfLocal {
            branch: name.into(),
        }
    }

    fn delete_remote(name: &str) -> Opcode {
        Opcode::DeleteTrackingBranch {
            branch: name.into(),
        }
    }

    #[test]
    fn collapses_consecutive_checkouts() {
        let program = Program::from(vec![
            checkout("a"),
            checkout("a"),
            checkout("b"),
            push("b"),
            checkout("b"),
        ]);
        assert_eq!(
            optimize(program),
            Program::from(vec![checkout("b"), push("b"), checkout("b")])
        );
    }

    #[test]
    fn drops_push_made_moot_by_remote_delete() {
        let program = Program::from(vec![push("a"), delete_remote("a"), push("b")]);
        assert_eq!(
            optimize(program),
            Program::from(vec![delete_remote("a"), push("b")])
        );
    }

    #[test]
    fn keeps_push_followed_by_delete_of_other_branch() {
        let program = Program::from(vec![push("a"), delete_remote("b")]);
        assert_eq!(optimize(program.clone()), program);
    }

    #[test]
    fn drops_push_if_local_after_push_of_same_branch() {
        let program = Program::from(vec![
            checkout("a"),
            push("a"),
            Opcode::EndOfBranchProgram,
            push_if_local("a"),
            push_if_local("b"),
            push_if_local("b"),
        ]);
        assert_eq!(
            optimize(program),
            Program::from(vec![
                checkout("a"),
                push("a"),
                Opcode::EndOfBranchProgram,
                push_if_local("b"),
            ])
        );
    }

    #[test]
    fn keeps_push_if_local_after_remote_delete() {
        let program = Program::from(vec![
            push("a"),
            checkout("b"),
            delete_remote("a"),
            push_if_local("a"),
        ]);
        assert_eq!(optimize(program.clone()), program);
    }

    #[test]
    fn normalizes_markers() {
        let program = Program::from(vec![
            Opcode::EndOfBranchProgram,
            push("a"),
            Opcode::EndOfBranchProgram,
            Opcode::EndOfBranchProgram,
            push("b"),
            Opcode::EndOfBranchProgram,
        ]);
        assert_eq!(
            optimize(program),
            Program::from(vec![push("a"), Opcode::EndOfBranchProgram, push("b")])
        );
    }

    /// Verifies that removing one opcode can expose another rewrite, and that
    /// the optimizer keeps going until nothing changes.
    #[test]
    fn rules_cascade_to_a_fixpoint() {
        let program = Program::from(vec![
            checkout("a"),
            Opcode::EndOfBranchProgram,
            Opcode::EndOfBranchProgram,
            checkout("b"),
            checkout("b"),
            push_if_local("b"),
            push_if_local("b"),
        ]);
        let once = optimize(program);
        assert_eq!(
            once,
            Program::from(vec![
                checkout("a"),
                Opcode::EndOfBranchProgram,
                checkout("b"),
                push_if_local("b"),
            ])
        );
        assert_eq!(optimize(once.clone()), once);
    }
}
