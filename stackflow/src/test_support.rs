//! Test-only fakes for the engine's capabilities and a real git scratch repo.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context as _, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::branch::{BranchName, Lineage, Sha};
use crate::core::snapshot::{BranchInfo, BranchesSnapshot, ConfigSnapshot, StashSize};
use crate::io::backend::{RepoError, RepoResult, Repository};
use crate::io::browser::Browser;
use crate::io::config::ConfigStore;
use crate::io::forge::{Forge, ForgeKind, Proposal, ProposalData};

type Commits = BTreeSet<String>;

fn sha_of(commits: &Commits) -> Sha {
    Sha::new(commits.iter().cloned().collect::<Vec<_>>().join("+"))
}

fn commits_of(sha: &Sha) -> Commits {
    sha.as_str()
        .split('+')
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FakeState {
    current: Option<BranchName>,
    local: BTreeMap<BranchName, Commits>,
    remote: BTreeMap<BranchName, Commits>,
    stash: Vec<()>,
    dirty: bool,
    unresolved: bool,
    merging: Option<Commits>,
    rebasing: Option<Commits>,
}

/// Observable state of a [`FakeRepository`], for comparing end states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeSnapshot {
    pub branches: BranchesSnapshot,
    pub stash_size: usize,
    pub dirty: bool,
}

/// In-memory repository.
///
/// A branch is a set of commit ids and its SHA is the sorted ids joined with
/// `+`, so merging and rebasing are set unions and are order independent.
/// Every mutation is appended to [`FakeRepository::calls`] as a short string
/// (`"checkout feature"`, `"merge origin/feature"`, ...). `conflict_on` and
/// `fail_on` arm a one-shot failure for the next call with that string.
#[derive(Debug, Default)]
pub struct FakeRepository {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
    conflicts: Mutex<BTreeSet<String>>,
    failures: Mutex<BTreeSet<String>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(self, name: &str, commits: &[&str]) -> Self {
        lock(&self.state)
            .local
            .insert(name.into(), commits.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_remote_branch(self, name: &str, commits: &[&str]) -> Self {
        lock(&self.state)
            .remote
            .insert(name.into(), commits.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn checked_out(self, name: &str) -> Self {
        lock(&self.state).current = Some(name.into());
        self
    }

    pub fn dirty(self) -> Self {
        lock(&self.state).dirty = true;
        self
    }

    /// Leave an edit in the worktree, as a user would while resolving.
    pub fn make_dirty(&self) {
        lock(&self.state).dirty = true;
    }

    /// Make the next call recorded as `call` stop with a conflict.
    pub fn conflict_on(&self, call: &str) {
        lock(&self.conflicts).insert(call.to_string());
    }

    /// Make the next call recorded as `call` fail with a network error.
    pub fn fail_on(&self, call: &str) {
        lock(&self.failures).insert(call.to_string());
    }

    /// Mark every conflict as resolved, as `git add` would.
    pub fn resolve_conflicts(&self) {
        lock(&self.state).unresolved = false;
    }

    /// Add a commit to a local branch.
    pub fn commit(&self, branch: &str, commit: &str) {
        lock(&self.state)
            .local
            .entry(branch.into())
            .or_default()
            .insert(commit.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn snapshot(&self) -> FakeSnapshot {
        let state = lock(&self.state).clone();
        FakeSnapshot {
            branches: snapshot_of(&state),
            stash_size: state.stash.len(),
            dirty: state.dirty,
        }
    }

    /// Record `call` and fire any armed trigger for it.
    fn begin(&self, call: String) -> RepoResult<Option<RepoError>> {
        lock(&self.calls).push(call.clone());
        if lock(&self.failures).remove(&call) {
            return Err(RepoError::Network {
                operation: call,
                detail: "connection refused".to_string(),
            });
        }
        if lock(&self.conflicts).remove(&call) {
            return Ok(Some(RepoError::conflict(call, "CONFLICT (content)")));
        }
        Ok(None)
    }

    fn resolve_ref(&self, state: &FakeState, reference: &str) -> RepoResult<Commits> {
        let found = match reference.strip_prefix(&format!("{}/", self.remote_name())) {
            Some(name) => state.remote.get(&BranchName::from(name)),
            None => state.local.get(&BranchName::from(reference)),
        };
        found
            .cloned()
            .ok_or_else(|| RepoError::failed(reference, "unknown revision"))
    }

    fn current_of(state: &FakeState) -> RepoResult<BranchName> {
        state
            .current
            .clone()
            .ok_or_else(|| RepoError::failed("current branch", "detached HEAD"))
    }
}

fn snapshot_of(state: &FakeState) -> BranchesSnapshot {
    let names: BTreeSet<&BranchName> = state.local.keys().chain(state.remote.keys()).collect();
    BranchesSnapshot {
        active: state.current.clone(),
        branches: names
            .into_iter()
            .map(|name| BranchInfo {
                name: name.clone(),
                local_sha: state.local.get(name).map(sha_of),
                remote_sha: state.remote.get(name).map(sha_of),
            })
            .collect(),
    }
}

impl Repository for FakeRepository {
    fn current_branch(&self) -> RepoResult<BranchName> {
        Self::current_of(&lock(&self.state))
    }

    fn branches_snapshot(&self) -> RepoResult<BranchesSnapshot> {
        Ok(snapshot_of(&lock(&self.state)))
    }

    fn local_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        Ok(lock(&self.state).local.get(branch).map(sha_of))
    }

    fn remote_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        Ok(lock(&self.state).remote.get(branch).map(sha_of))
    }

    fn stash_size(&self) -> RepoResult<StashSize> {
        Ok(StashSize(lock(&self.state).stash.len()))
    }

    fn has_open_changes(&self) -> RepoResult<bool> {
        let state = lock(&self.state);
        Ok(state.dirty || state.unresolved)
    }

    fn has_unresolved_conflicts(&self) -> RepoResult<bool> {
        Ok(lock(&self.state).unresolved)
    }

    fn merge_in_progress(&self) -> RepoResult<bool> {
        Ok(lock(&self.state).merging.is_some())
    }

    fn rebase_in_progress(&self) -> RepoResult<bool> {
        Ok(lock(&self.state).rebasing.is_some())
    }

    fn remote_name(&self) -> &str {
        "origin"
    }

    fn fetch(&self) -> RepoResult<()> {
        self.begin("fetch".to_string())?;
        Ok(())
    }

    fn checkout(&self, branch: &BranchName) -> RepoResult<()> {
        self.begin(format!("checkout {branch}"))?;
        let mut state = lock(&self.state);
        if state.unresolved {
            return Err(RepoError::failed(
                "checkout",
                "you need to resolve your current index first",
            ));
        }
        if !state.local.contains_key(branch) {
            let Some(remote) = state.remote.get(branch).cloned() else {
                return Err(RepoError::failed(
                    "checkout",
                    format!("pathspec '{branch}' did not match"),
                ));
            };
            state.local.insert(branch.clone(), remote);
        }
        state.current = Some(branch.clone());
        Ok(())
    }

    fn create_branch(&self, branch: &BranchName, start: &Sha) -> RepoResult<()> {
        self.begin(format!("create {branch} {start}"))?;
        lock(&self.state)
            .local
            .insert(branch.clone(), commits_of(start));
        Ok(())
    }

    fn delete_local_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.begin(format!("delete {branch}"))?;
        let mut state = lock(&self.state);
        if state.current.as_ref() == Some(branch) {
            return Err(RepoError::failed("delete branch", "cannot delete the checked out branch"));
        }
        state.local.remove(branch);
        Ok(())
    }

    fn reset_branch(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        self.begin(format!("reset {branch} {sha}"))?;
        lock(&self.state)
            .local
            .insert(branch.clone(), commits_of(sha));
        Ok(())
    }

    fn merge(&self, source: &str) -> RepoResult<()> {
        let trigger = self.begin(format!("merge {source}"))?;
        let mut state = lock(&self.state);
        let incoming = self.resolve_ref(&state, source)?;
        if let Some(conflict) = trigger {
            state.merging = Some(incoming);
            state.unresolved = true;
            return Err(conflict);
        }
        let current = Self::current_of(&state)?;
        state.local.entry(current).or_default().extend(incoming);
        Ok(())
    }

    fn commit_merge(&self) -> RepoResult<()> {
        self.begin("commit merge".to_string())?;
        let mut state = lock(&self.state);
        let Some(incoming) = state.merging.take() else {
            return Err(RepoError::failed("commit merge", "no merge in progress"));
        };
        let current = Self::current_of(&state)?;
        state.local.entry(current).or_default().extend(incoming);
        Ok(())
    }

    fn abort_merge(&self) -> RepoResult<()> {
        self.begin("abort merge".to_string())?;
        let mut state = lock(&self.state);
        state.merging = None;
        state.unresolved = false;
        Ok(())
    }

    fn rebase(&self, onto: &str) -> RepoResult<()> {
        let trigger = self.begin(format!("rebase {onto}"))?;
        let mut state = lock(&self.state);
        let incoming = self.resolve_ref(&state, onto)?;
        if let Some(conflict) = trigger {
            state.rebasing = Some(incoming);
            state.unresolved = true;
            return Err(conflict);
        }
        let current = Self::current_of(&state)?;
        state.local.entry(current).or_default().extend(incoming);
        Ok(())
    }

    fn continue_rebase(&self) -> RepoResult<()> {
        self.begin("continue rebase".to_string())?;
        let mut state = lock(&self.state);
        let Some(incoming) = state.rebasing.take() else {
            return Err(RepoError::failed("continue rebase", "no rebase in progress"));
        };
        let current = Self::current_of(&state)?;
        state.local.entry(current).or_default().extend(incoming);
        Ok(())
    }

    fn abort_rebase(&self) -> RepoResult<()> {
        self.begin("abort rebase".to_string())?;
        let mut state = lock(&self.state);
        state.rebasing = None;
        state.unresolved = false;
        Ok(())
    }

    fn push(&self, branch: &BranchName, force_with_lease: bool) -> RepoResult<()> {
        let call = if force_with_lease {
            format!("force-push {branch}")
        } else {
            format!("push {branch}")
        };
        self.begin(call)?;
        let mut state = lock(&self.state);
        let commits = state
            .local
            .get(branch)
            .cloned()
            .ok_or_else(|| RepoError::failed("push", format!("no local branch {branch}")))?;
        state.remote.insert(branch.clone(), commits);
        Ok(())
    }

    fn push_sha(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        self.begin(format!("push {branch} {sha}"))?;
        lock(&self.state)
            .remote
            .insert(branch.clone(), commits_of(sha));
        Ok(())
    }

    fn delete_remote_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.begin(format!("delete remote {branch}"))?;
        lock(&self.state).remote.remove(branch);
        Ok(())
    }

    fn stash(&self) -> RepoResult<()> {
        self.begin("stash".to_string())?;
        let mut state = lock(&self.state);
        state.stash.push(());
        state.dirty = false;
        Ok(())
    }

    fn stash_pop(&self) -> RepoResult<()> {
        let trigger = self.begin("stash pop".to_string())?;
        let mut state = lock(&self.state);
        if state.stash.is_empty() {
            return Err(RepoError::failed("stash pop", "no stash entries found"));
        }
        state.dirty = true;
        if let Some(conflict) = trigger {
            state.unresolved = true;
            return Err(conflict);
        }
        state.stash.pop();
        Ok(())
    }

    fn stash_drop(&self) -> RepoResult<()> {
        self.begin("stash drop".to_string())?;
        lock(&self.state).stash.pop();
        Ok(())
    }
}

/// In-memory [`ConfigStore`].
#[derive(Debug, Default)]
pub struct FakeConfigStore {
    snapshot: Mutex<ConfigSnapshot>,
}

impl FakeConfigStore {
    pub fn with_lineage(pairs: &[(&str, &str)]) -> Self {
        let lineage: Lineage = pairs
            .iter()
            .map(|(child, parent)| (BranchName::from(*child), BranchName::from(*parent)))
            .collect();
        Self {
            snapshot: Mutex::new(ConfigSnapshot {
                lineage,
                branch_types: BTreeMap::new(),
            }),
        }
    }
}

impl ConfigStore for FakeConfigStore {
    fn snapshot(&self) -> Result<ConfigSnapshot> {
        Ok(lock(&self.snapshot).clone())
    }

    fn set_parent(&self, branch: &BranchName, parent: &BranchName) -> Result<()> {
        lock(&self.snapshot)
            .lineage
            .set_parent(branch.clone(), parent.clone());
        Ok(())
    }

    fn remove_parent(&self, branch: &BranchName) -> Result<()> {
        lock(&self.snapshot).lineage.remove(branch);
        Ok(())
    }
}

/// Forge that knows a fixed set of proposals and records creations.
#[derive(Debug, Default)]
pub struct FakeForge {
    known: BTreeMap<BranchName, String>,
    created: Mutex<Vec<ProposalData>>,
    unreachable: bool,
}

impl FakeForge {
    pub fn with_known(pairs: &[(&str, &str)]) -> Self {
        Self {
            known: pairs
                .iter()
                .map(|(branch, url)| (BranchName::from(*branch), url.to_string()))
                .collect(),
            created: Mutex::new(Vec::new()),
            unreachable: false,
        }
    }

    /// A forge whose proposal lookups always fail.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn proposal_url(branch: &BranchName) -> String {
        format!("https://forge.test/compare/{branch}")
    }

    pub fn created(&self) -> Vec<ProposalData> {
        lock(&self.created).clone()
    }
}

impl Forge for FakeForge {
    fn kind(&self) -> ForgeKind {
        ForgeKind::GitHub
    }

    fn find_proposal(&self, branch: &BranchName, _target: &BranchName) -> Result<Option<Proposal>> {
        if self.unreachable {
            bail!("forge.test answered 503");
        }
        Ok(self.known.get(branch).map(|url| Proposal { url: url.clone() }))
    }

    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        lock(&self.created).push(data.clone());
        Ok(Self::proposal_url(&data.branch))
    }
}

/// Browser that remembers every URL it was asked to open.
#[derive(Debug, Default)]
pub struct RecordingBrowser {
    opened: Mutex<Vec<String>>,
}

impl RecordingBrowser {
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

impl Browser for RecordingBrowser {
    fn open(&self, url: &str) -> Result<()> {
        lock(&self.opened).push(url.to_string());
        Ok(())
    }
}

/// A real git working copy on `main` with one commit, pushed to a bare
/// `origin` next to it.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let origin = temp.path().join("origin.git");
        let root = temp.path().join("work");
        fs::create_dir_all(&root).context("create work dir")?;
        run_git(temp.path(), &["init", "--bare", "-b", "main", "origin.git"])?;
        run_git(&root, &["init", "-b", "main"])?;
        run_git(&root, &["config", "user.email", "test@example.com"])?;
        run_git(&root, &["config", "user.name", "test"])?;
        run_git(&root, &["config", "commit.gpgsign", "false"])?;
        let origin_url = origin.to_string_lossy().to_string();
        run_git(&root, &["remote", "add", "origin", &origin_url])?;
        let repo = Self { _temp: temp, root };
        repo.try_commit_file("README.md", "hi\n", "initial commit")?;
        run_git(&repo.root, &["push", "-u", "origin", "main"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git in the working copy and return stdout. Panics on failure.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.root, args).unwrap_or_else(|err| panic!("{err:#}"))
    }

    /// Write, stage and commit a file. Panics on failure.
    pub fn commit_file(&self, path: &str, contents: &str, message: &str) {
        self.try_commit_file(path, contents, message)
            .unwrap_or_else(|err| panic!("{err:#}"));
    }

    pub fn sha(&self, reference: &str) -> String {
        self.git(&["rev-parse", reference]).trim().to_string()
    }

    fn try_commit_file(&self, path: &str, contents: &str, message: &str) -> Result<()> {
        let file = self.root.join(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).context("create parent")?;
        }
        fs::write(&file, contents).with_context(|| format!("write {}", file.display()))?;
        run_git(&self.root, &["add", path])?;
        run_git(&self.root, &["commit", "-m", message])?;
        Ok(())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
