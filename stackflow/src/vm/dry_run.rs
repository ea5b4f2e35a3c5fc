//! Recording wrappers used for `--dry-run`.
//!
//! Queries pass through to the real capability; mutations are recorded as
//! "would run" lines and report success. The repository wrapper also tracks
//! the branch a checkout would have switched to so later opcodes see it.

use std::cell::{Cell, RefCell};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::core::branch::{BranchName, Sha};
use crate::core::snapshot::{BranchesSnapshot, ConfigSnapshot, StashSize};
use crate::io::backend::{RepoResult, Repository};
use crate::io::browser::Browser;
use crate::io::config::ConfigStore;
use crate::io::forge::{Forge, ForgeKind, Proposal, ProposalData};

/// Lines recorded by the dry-run wrappers, in call order.
#[derive(Debug, Default)]
pub struct DryRunLog {
    lines: Mutex<Vec<String>>,
}

impl DryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, line: String) {
        self.guard().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

pub struct DryRunRepository<'a> {
    inner: &'a dyn Repository,
    log: &'a DryRunLog,
    current: RefCell<Option<BranchName>>,
    /// Simulated stash entries pushed on top of the real stash.
    stashed: Cell<usize>,
    open_changes: Cell<Option<bool>>,
}

impl<'a> DryRunRepository<'a> {
    pub fn new(inner: &'a dyn Repository, log: &'a DryRunLog) -> Self {
        Self {
            inner,
            log,
            current: RefCell::new(None),
            stashed: Cell::new(0),
            open_changes: Cell::new(None),
        }
    }

    fn record(&self, line: String) -> RepoResult<()> {
        self.log.record(line);
        Ok(())
    }
}

impl Repository for DryRunRepository<'_> {
    fn current_branch(&self) -> RepoResult<BranchName> {
        match self.current.borrow().as_ref() {
            Some(branch) => Ok(branch.clone()),
            None => self.inner.current_branch(),
        }
    }

    fn branches_snapshot(&self) -> RepoResult<BranchesSnapshot> {
        self.inner.branches_snapshot()
    }

    fn local_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        self.inner.local_sha(branch)
    }

    fn remote_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        self.inner.remote_sha(branch)
    }

    fn stash_size(&self) -> RepoResult<StashSize> {
        Ok(StashSize(self.inner.stash_size()?.0 + self.stashed.get()))
    }

    fn has_open_changes(&self) -> RepoResult<bool> {
        match self.open_changes.get() {
            Some(open) => Ok(open),
            None => self.inner.has_open_changes(),
        }
    }

    fn has_unresolved_conflicts(&self) -> RepoResult<bool> {
        self.inner.has_unresolved_conflicts()
    }

    fn merge_in_progress(&self) -> RepoResult<bool> {
        self.inner.merge_in_progress()
    }

    fn rebase_in_progress(&self) -> RepoResult<bool> {
        self.inner.rebase_in_progress()
    }

    fn remote_name(&self) -> &str {
        self.inner.remote_name()
    }

    fn fetch(&self) -> RepoResult<()> {
        self.record(format!("git fetch --prune {}", self.remote_name()))
    }

    fn checkout(&self, branch: &BranchName) -> RepoResult<()> {
        *self.current.borrow_mut() = Some(branch.clone());
        self.record(format!("git checkout {branch}"))
    }

    fn create_branch(&self, branch: &BranchName, start: &Sha) -> RepoResult<()> {
        self.record(format!("git branch {branch} {start}"))
    }

    fn delete_local_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.record(format!("git branch -D {branch}"))
    }

    fn reset_branch(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        self.record(format!("reset {branch} to {sha}"))
    }

    fn merge(&self, source: &str) -> RepoResult<()> {
        self.record(format!("git merge --no-edit {source}"))
    }

    fn commit_merge(&self) -> RepoResult<()> {
        self.record("git commit --no-edit".to_string())
    }

    fn abort_merge(&self) -> RepoResult<()> {
        self.record("git merge --abort".to_string())
    }

    fn rebase(&self, onto: &str) -> RepoResult<()> {
        self.record(format!("git rebase {onto}"))
    }

    fn continue_rebase(&self) -> RepoResult<()> {
        self.record("git rebase --continue".to_string())
    }

    fn abort_rebase(&self) -> RepoResult<()> {
        self.record("git rebase --abort".to_string())
    }

    fn push(&self, branch: &BranchName, force_with_lease: bool) -> RepoResult<()> {
        let force = if force_with_lease {
            " --force-with-lease"
        } else {
            ""
        };
        self.record(format!(
            "git push -u{force} {} {branch}",
            self.remote_name()
        ))
    }

    fn push_sha(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        self.record(format!(
            "git push --force {} {sha}:refs/heads/{branch}",
            self.remote_name()
        ))
    }

    fn delete_remote_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.record(format!("git push {} --delete {branch}", self.remote_name()))
    }

    fn stash(&self) -> RepoResult<()> {
        self.stashed.set(self.stashed.get() + 1);
        self.open_changes.set(Some(false));
        self.record("git stash push --include-untracked".to_string())
    }

    fn stash_pop(&self) -> RepoResult<()> {
        self.stashed.set(self.stashed.get().saturating_sub(1));
        self.open_changes.set(Some(true));
        self.record("git stash pop".to_string())
    }

    fn stash_drop(&self) -> RepoResult<()> {
        self.stashed.set(self.stashed.get().saturating_sub(1));
        self.record("git stash drop".to_string())
    }
}

/// Config store that answers from a fixed snapshot and records writes.
pub struct DryRunConfigStore<'a> {
    snapshot: RefCell<ConfigSnapshot>,
    log: &'a DryRunLog,
}

impl<'a> DryRunConfigStore<'a> {
    pub fn new(inner: &dyn ConfigStore, log: &'a DryRunLog) -> Result<Self> {
        Ok(Self {
            snapshot: RefCell::new(inner.snapshot()?),
            log,
        })
    }
}

impl ConfigStore for DryRunConfigStore<'_> {
    fn snapshot(&self) -> Result<ConfigSnapshot> {
        Ok(self.snapshot.borrow().clone())
    }

    fn set_parent(&self, branch: &BranchName, parent: &BranchName) -> Result<()> {
        self.snapshot
            .borrow_mut()
            .lineage
            .set_parent(branch.clone(), parent.clone());
        self.log.record(format!("set parent of {branch} to {parent}"));
        Ok(())
    }

    fn remove_parent(&self, branch: &BranchName) -> Result<()> {
        self.snapshot.borrow_mut().lineage.remove(branch);
        self.log.record(format!("remove parent of {branch}"));
        Ok(())
    }
}

/// Forge wrapper: lookups pass through, creation is recorded.
pub struct DryRunForge<'a> {
    inner: &'a dyn Forge,
    log: &'a DryRunLog,
}

impl<'a> DryRunForge<'a> {
    pub fn new(inner: &'a dyn Forge, log: &'a DryRunLog) -> Self {
        Self { inner, log }
    }
}

impl Forge for DryRunForge<'_> {
    fn kind(&self) -> ForgeKind {
        self.inner.kind()
    }

    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>> {
        self.inner.find_proposal(branch, target)
    }

    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        self.log.record(format!(
            "create {} proposal {} -> {}",
            self.inner.kind(),
            data.branch,
            data.target
        ));
        Ok(format!("<new proposal for {}>", data.branch))
    }
}

/// Browser that only records.
pub struct DryRunBrowser<'a> {
    log: &'a DryRunLog,
}

impl<'a> DryRunBrowser<'a> {
    pub fn new(log: &'a DryRunLog) -> Self {
        Self { log }
    }
}

impl Browser for DryRunBrowser<'_> {
    fn open(&self, url: &str) -> Result<()> {
        self.log.record(format!("open {url}"));
        Ok(())
    }
}
