//! Branch names, commit SHAs, branch classification and lineage.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a local branch (without `refs/heads/`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the remote-tracking ref for this branch (`origin/feature`).
    pub fn tracking(&self, remote: &str) -> String {
        format!("{remote}/{}", self.0)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BranchName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BranchName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Full commit id as reported by git.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(String);

impl Sha {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sha {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role a branch plays in the workflow. Planners decide per type which
/// opcodes apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Main,
    Perennial,
    Parked,
    Prototype,
    Contribution,
    Observed,
    Feature,
}

impl BranchType {
    /// Only ordinary feature branches get proposals.
    pub fn is_proposable(self) -> bool {
        matches!(self, BranchType::Feature)
    }

    /// Branch types that receive changes from their parent during sync.
    pub fn syncs_with_parent(self) -> bool {
        matches!(
            self,
            BranchType::Feature | BranchType::Parked | BranchType::Prototype
        )
    }

    /// Branch types whose local commits get pushed during sync.
    pub fn pushes(self) -> bool {
        matches!(
            self,
            BranchType::Main
                | BranchType::Perennial
                | BranchType::Feature
                | BranchType::Parked
                | BranchType::Contribution
        )
    }

    /// Main and perennial branches form the roots of every stack.
    pub fn is_root(self) -> bool {
        matches!(self, BranchType::Main | BranchType::Perennial)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BranchType::Main => "main",
            BranchType::Perennial => "perennial",
            BranchType::Parked => "parked",
            BranchType::Prototype => "prototype",
            BranchType::Contribution => "contribution",
            BranchType::Observed => "observed",
            BranchType::Feature => "feature",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent relationships between branches (`child -> parent`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lineage(BTreeMap<BranchName, BranchName>);

impl Lineage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(&self, branch: &BranchName) -> Option<&BranchName> {
        self.0.get(branch)
    }

    pub fn set_parent(&mut self, branch: BranchName, parent: BranchName) {
        self.0.insert(branch, parent);
    }

    pub fn remove(&mut self, branch: &BranchName) -> Option<BranchName> {
        self.0.remove(branch)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// All `(child, parent)` entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&BranchName, &BranchName)> {
        self.0.iter()
    }

    /// Direct children of `parent`, sorted by name.
    pub fn children(&self, parent: &BranchName) -> Vec<BranchName> {
        self.0
            .iter()
            .filter(|(_, p)| *p == parent)
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// Ancestors of `branch`, outermost first. Stops at a cycle.
    pub fn ancestors(&self, branch: &BranchName) -> Vec<BranchName> {
        let mut seen = BTreeSet::from([branch.clone()]);
        let mut chain = Vec::new();
        let mut current = branch;
        while let Some(parent) = self.0.get(current) {
            if !seen.insert(parent.clone()) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Descendants of `branch` in parents-first order.
    pub fn descendants(&self, branch: &BranchName) -> Vec<BranchName> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::from([branch.clone()]);
        let mut frontier = vec![branch.clone()];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in &frontier {
                for child in self.children(parent) {
                    if seen.insert(child.clone()) {
                        out.push(child.clone());
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }
        out
    }

    /// Number of ancestors above `branch`.
    pub fn depth(&self, branch: &BranchName) -> usize {
        self.ancestors(branch).len()
    }

    /// First branch that participates in a parent cycle, if any.
    pub fn find_cycle(&self) -> Option<BranchName> {
        for start in self.0.keys() {
            let mut seen = BTreeSet::from([start]);
            let mut current = start;
            while let Some(parent) = self.0.get(current) {
                if parent == start {
                    return Some(start.clone());
                }
                if !seen.insert(parent) {
                    break;
                }
                current = parent;
            }
        }
        None
    }
}

impl FromIterator<(BranchName, BranchName)> for Lineage {
    fn from_iter<T: IntoIterator<Item = (BranchName, BranchName)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage(pairs: &[(&str, &str)]) -> Lineage {
        pairs
            .iter()
            .map(|(child, parent)| (BranchName::from(*child), BranchName::from(*parent)))
            .collect()
    }

    fn names(list: &[BranchName]) -> Vec<&str> {
        list.iter().map(BranchName::as_str).collect()
    }

    #[test]
    fn ancestors_are_outermost_first() {
        let lineage = lineage(&[("a", "main"), ("b", "a"), ("c", "b")]);
        assert_eq!(names(&lineage.ancestors(&"c".into())), vec!["main", "a", "b"]);
        assert!(lineage.ancestors(&"main".into()).is_empty());
    }

    #[test]
    fn descendants_are_parents_first() {
        let lineage = lineage(&[("a", "main"), ("b", "a"), ("c", "b"), ("d", "a")]);
        assert_eq!(names(&lineage.descendants(&"a".into())), vec!["b", "d", "c"]);
    }

    /// A hand-edited config can contain a cycle; walking it must still end.
    #[test]
    fn cycle_is_detected_and_ancestors_terminate() {
        let lineage = lineage(&[("a", "b"), ("b", "a")]);
        assert!(lineage.find_cycle().is_some());
        assert_eq!(names(&lineage.ancestors(&"a".into())), vec!["b"]);
    }

    #[test]
    fn acyclic_lineage_has_no_cycle() {
        let lineage = lineage(&[("a", "main"), ("b", "a")]);
        assert_eq!(lineage.find_cycle(), None);
    }

    #[test]
    fn only_feature_branches_are_proposable() {
        for kind in [
            BranchType::Main,
            BranchType::Perennial,
            BranchType::Parked,
            BranchType::Prototype,
            BranchType::Contribution,
            BranchType::Observed,
        ] {
            assert!(!kind.is_proposable(), "{kind} must not be proposable");
        }
        assert!(BranchType::Feature.is_proposable());
    }
}
