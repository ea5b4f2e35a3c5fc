//! Ordered opcode sequences.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::branch::BranchName;
use crate::core::opcode::Opcode;

/// A sequence of opcodes produced by a planner for one command invocation.
///
/// Planners build programs with `add`; once handed to the interpreter a
/// program is only read, and progress is tracked by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program(Vec<Opcode>);

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, opcode: Opcode) {
        self.0.push(opcode);
    }

    pub fn add_all(&mut self, opcodes: impl IntoIterator<Item = Opcode>) {
        self.0.extend(opcodes);
    }

    /// Insert `other` in front of the existing opcodes, keeping its order.
    pub fn prepend_all(&mut self, other: Program) {
        let mut merged = other.0;
        merged.append(&mut self.0);
        self.0 = merged;
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Opcode> {
        self.0.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Opcode> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Opcode> {
        self.0
    }

    /// Replace the opcode at the front, if any.
    pub fn with_first(&self, opcode: Opcode) -> Program {
        let mut opcodes = self.0.clone();
        if let Some(first) = opcodes.first_mut() {
            *first = opcode;
        }
        Program(opcodes)
    }

    /// The opcodes from `position` to the end.
    pub fn tail(&self, position: usize) -> Program {
        Program(self.0.get(position..).unwrap_or_default().to_vec())
    }

    /// Drop everything up to and including the next `EndOfBranchProgram`.
    /// Without a marker the whole program is dropped.
    pub fn without_current_branch(&self) -> Program {
        match self.0.iter().position(Opcode::is_marker) {
            Some(marker) => self.tail(marker + 1),
            None => Program::new(),
        }
    }

    /// Union of every branch referenced by any opcode.
    pub fn touched_branches(&self) -> BTreeSet<BranchName> {
        self.0
            .iter()
            .flat_map(|opcode| opcode.branches())
            .cloned()
            .collect()
    }
}

impl From<Vec<Opcode>> for Program {
    fn from(opcodes: Vec<Opcode>) -> Self {
        Self(opcodes)
    }
}

impl FromIterator<Opcode> for Program {
    fn from_iter<T: IntoIterator<Item = Opcode>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Opcode;
    type IntoIter = std::slice::Iter<'a, Opcode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, opcode) in self.0.iter().enumerate() {
            writeln!(f, "{:>3}. {opcode}", index + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkout(name: &str) -> Opcode {
        Opcode::Checkout {
            branch: name.into(),
        }
    }

    #[test]
    fn prepend_keeps_inserted_order_in_front() {
        let mut program = Program::from(vec![checkout("c")]);
        program.prepend_all(Program::from(vec![checkout("a"), checkout("b")]));
        assert_eq!(
            program,
            Program::from(vec![checkout("a"), checkout("b"), checkout("c")])
        );
    }

    #[test]
    fn tail_past_end_is_empty() {
        let program = Program::from(vec![checkout("a")]);
        assert_eq!(program.tail(1), Program::new());
        assert_eq!(program.tail(5), Program::new());
    }

    #[test]
    fn with_first_replaces_only_the_head() {
        let program = Program::from(vec![checkout("a"), checkout("b")]);
        assert_eq!(
            program.with_first(checkout("c")),
            Program::from(vec![checkout("c"), checkout("b")])
        );
        assert_eq!(Program::new().with_first(checkout("c")), Program::new());
    }

    /// Skip semantics: the current segment goes, the marker with it.
    #[test]
    fn without_current_branch_drops_through_marker() {
        let program = Program::from(vec![
            Opcode::Merge {
                branch: "a".into(),
                source: "main".into(),
            },
            Opcode::PushCurrentBranch { branch: "a".into() },
            Opcode::EndOfBranchProgram,
            checkout("b"),
        ]);
        assert_eq!(
            program.without_current_branch(),
            Program::from(vec![checkout("b")])
        );
        assert!(Program::from(vec![checkout("a")]).without_current_branch().is_empty());
    }

    #[test]
    fn touched_branches_is_union_of_references() {
        let program = Program::from(vec![
            checkout("a"),
            Opcode::LineageParentSet {
                branch: "b".into(),
                parent: "main".into(),
            },
            Opcode::Fetch,
        ]);
        let touched: Vec<String> = program
            .touched_branches()
            .into_iter()
            .map(|b| b.to_string())
            .collect();
        assert_eq!(touched, vec!["a", "b", "main"]);
    }
}
