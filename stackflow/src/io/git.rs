//! Git adapter backing the [`Repository`] capability.
//!
//! Every operation is a `git` subprocess with a timeout. Failures are
//! classified from git's output into conflicts, network problems and
//! everything else, which is what the interpreter needs to decide between
//! suspending and aborting a workflow.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::branch::{BranchName, Sha};
use crate::core::snapshot::{BranchInfo, BranchesSnapshot, StashSize};
use crate::io::backend::{RepoError, RepoResult, Repository};
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

static CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^CONFLICT|Automatic merge failed|could not apply|needs merge|Resolve all conflicts manually",
    )
    .expect("conflict pattern compiles")
});

static NETWORK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)could not resolve host|could not read from remote repository|unable to access|connection (refused|timed out|reset)|authentication failed|permission denied \(publickey",
    )
    .expect("network pattern compiles")
});

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    remote: String,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            remote: DEFAULT_REMOTE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Absolute path of the `.git` directory (the repository's local config area).
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self
            .capture(&["rev-parse", "--absolute-git-dir"])
            .map_err(|err| anyhow!("not a git repository ({err})"))?;
        Ok(PathBuf::from(out.trim()))
    }

    /// URL of the configured remote, `None` when the remote does not exist.
    pub fn remote_url(&self) -> Result<Option<String>> {
        let output = self.exec(&["remote", "get-url", &self.remote])?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(output.stdout_lossy().trim().to_string()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> RepoResult<Vec<StatusEntry>> {
        let out = self.capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    fn exec(&self, args: &[&str]) -> RepoResult<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true");
        run_command_with_timeout(cmd, self.timeout)
            .with_context(|| format!("spawn git {}", args.join(" ")))
            .map_err(RepoError::from)
    }

    fn capture(&self, args: &[&str]) -> RepoResult<String> {
        let output = self.exec(args)?;
        if !output.success() {
            return Err(self.classify(args, &output));
        }
        Ok(output.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str]) -> RepoResult<()> {
        debug!(args = %args.join(" "), "git");
        self.capture(args).map(|_| ())
    }

    /// `rev-parse --verify` that maps a missing ref to `None`.
    fn resolve(&self, reference: &str) -> RepoResult<Option<Sha>> {
        let output = self.exec(&["rev-parse", "--verify", "--quiet", reference])?;
        if !output.success() {
            return Ok(None);
        }
        Ok(Some(Sha::new(output.stdout_lossy().trim())))
    }

    fn git_path_exists(&self, name: &str) -> RepoResult<bool> {
        let out = self.capture(&["rev-parse", "--git-path", name])?;
        Ok(self.workdir.join(out.trim()).exists())
    }

    fn classify(&self, args: &[&str], output: &CommandOutput) -> RepoError {
        let operation = format!("git {}", args.join(" "));
        if output.timed_out {
            return RepoError::TimedOut {
                operation,
                secs: self.timeout.as_secs(),
            };
        }
        let detail = format!("{}{}", output.stdout_lossy(), output.stderr_lossy())
            .trim()
            .to_string();
        classify_failure(operation, detail)
    }
}

fn classify_failure(operation: String, detail: String) -> RepoError {
    if CONFLICT_RE.is_match(&detail) {
        warn!(%operation, "git reported conflicts");
        return RepoError::Conflict { operation, detail };
    }
    if NETWORK_RE.is_match(&detail) {
        warn!(%operation, "git could not reach the remote");
        return RepoError::Network { operation, detail };
    }
    RepoError::Failed { operation, detail }
}

impl Repository for Git {
    #[instrument(skip_all)]
    fn current_branch(&self) -> RepoResult<BranchName> {
        let out = self.capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(RepoError::failed(
                "determine current branch",
                "detached HEAD (check out a branch first)",
            ));
        }
        debug!(branch = %name, "current branch");
        Ok(BranchName::new(name))
    }

    #[instrument(skip_all)]
    fn branches_snapshot(&self) -> RepoResult<BranchesSnapshot> {
        let remote_prefix = format!("refs/remotes/{}/", self.remote);
        let out = self.capture(&[
            "for-each-ref",
            "--format=%(refname) %(objectname)",
            "refs/heads",
            &format!("refs/remotes/{}", self.remote),
        ])?;
        let mut branches: BTreeMap<BranchName, BranchInfo> = BTreeMap::new();
        for line in out.lines() {
            let Some((refname, sha)) = line.trim().split_once(' ') else {
                continue;
            };
            if let Some(name) = refname.strip_prefix("refs/heads/") {
                entry(&mut branches, name).local_sha = Some(Sha::new(sha));
            } else if let Some(name) = refname.strip_prefix(&remote_prefix) {
                if name == "HEAD" {
                    continue;
                }
                entry(&mut branches, name).remote_sha = Some(Sha::new(sha));
            }
        }
        let active = self
            .exec(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .ok()
            .filter(CommandOutput::success)
            .map(|output| BranchName::new(output.stdout_lossy().trim()));
        debug!(count = branches.len(), active = ?active, "branches snapshot");
        Ok(BranchesSnapshot {
            active,
            branches: branches.into_values().collect(),
        })
    }

    fn local_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        self.resolve(&format!("refs/heads/{branch}"))
    }

    fn remote_sha(&self, branch: &BranchName) -> RepoResult<Option<Sha>> {
        self.resolve(&format!("refs/remotes/{}/{branch}", self.remote))
    }

    fn stash_size(&self) -> RepoResult<StashSize> {
        let out = self.capture(&["stash", "list"])?;
        Ok(StashSize(out.lines().filter(|l| !l.trim().is_empty()).count()))
    }

    fn has_open_changes(&self) -> RepoResult<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    fn has_unresolved_conflicts(&self) -> RepoResult<bool> {
        let out = self.capture(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(!out.trim().is_empty())
    }

    fn merge_in_progress(&self) -> RepoResult<bool> {
        Ok(self.resolve("MERGE_HEAD")?.is_some())
    }

    fn rebase_in_progress(&self) -> RepoResult<bool> {
        Ok(self.git_path_exists("rebase-merge")? || self.git_path_exists("rebase-apply")?)
    }

    fn remote_name(&self) -> &str {
        &self.remote
    }

    #[instrument(skip_all)]
    fn fetch(&self) -> RepoResult<()> {
        self.run_checked(&["fetch", "--prune", &self.remote])
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn checkout(&self, branch: &BranchName) -> RepoResult<()> {
        self.run_checked(&["checkout", branch.as_str()])
    }

    fn create_branch(&self, branch: &BranchName, start: &Sha) -> RepoResult<()> {
        self.run_checked(&["branch", branch.as_str(), start.as_str()])
    }

    fn delete_local_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.run_checked(&["branch", "-D", branch.as_str()])
    }

    #[instrument(skip_all, fields(branch = %branch, sha = %sha))]
    fn reset_branch(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        let current = self
            .exec(&["symbolic-ref", "--quiet", "--short", "HEAD"])?
            .stdout_lossy();
        if current.trim() == branch.as_str() {
            self.run_checked(&["reset", "--hard", sha.as_str()])
        } else {
            self.run_checked(&["branch", "--force", branch.as_str(), sha.as_str()])
        }
    }

    #[instrument(skip_all, fields(source = %source))]
    fn merge(&self, source: &str) -> RepoResult<()> {
        self.run_checked(&["merge", "--no-edit", source])
    }

    fn commit_merge(&self) -> RepoResult<()> {
        self.run_checked(&["commit", "--no-edit"])
    }

    fn abort_merge(&self) -> RepoResult<()> {
        self.run_checked(&["merge", "--abort"])
    }

    #[instrument(skip_all, fields(onto = %onto))]
    fn rebase(&self, onto: &str) -> RepoResult<()> {
        self.run_checked(&["rebase", onto])
    }

    fn continue_rebase(&self) -> RepoResult<()> {
        self.run_checked(&["rebase", "--continue"])
    }

    fn abort_rebase(&self) -> RepoResult<()> {
        self.run_checked(&["rebase", "--abort"])
    }

    #[instrument(skip_all, fields(branch = %branch, force_with_lease))]
    fn push(&self, branch: &BranchName, force_with_lease: bool) -> RepoResult<()> {
        let mut args = vec!["push", "-u"];
        if force_with_lease {
            args.push("--force-with-lease");
        }
        args.push(&self.remote);
        args.push(branch.as_str());
        self.run_checked(&args)
    }

    #[instrument(skip_all, fields(branch = %branch, sha = %sha))]
    fn push_sha(&self, branch: &BranchName, sha: &Sha) -> RepoResult<()> {
        let refspec = format!("{sha}:refs/heads/{branch}");
        self.run_checked(&["push", "--force", &self.remote, &refspec])
    }

    #[instrument(skip_all, fields(branch = %branch))]
    fn delete_remote_branch(&self, branch: &BranchName) -> RepoResult<()> {
        self.run_checked(&["push", &self.remote, "--delete", branch.as_str()])
    }

    fn stash(&self) -> RepoResult<()> {
        self.run_checked(&["stash", "push", "--include-untracked"])
    }

    fn stash_pop(&self) -> RepoResult<()> {
        self.run_checked(&["stash", "pop"])
    }

    fn stash_drop(&self) -> RepoResult<()> {
        self.run_checked(&["stash", "drop"])
    }
}

fn entry<'a>(branches: &'a mut BTreeMap<BranchName, BranchInfo>, name: &str) -> &'a mut BranchInfo {
    let name = BranchName::new(name);
    branches.entry(name.clone()).or_insert(BranchInfo {
        name,
        local_sha: None,
        remote_sha: None,
    })
}

fn parse_status_line(line: &str) -> RepoResult<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(RepoError::failed(
            "parse git status",
            format!("unexpected porcelain line: '{line}'"),
        ));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
