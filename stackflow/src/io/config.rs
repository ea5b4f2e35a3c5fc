//! Stackflow configuration stored under `<git-dir>/stackflow/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::branch::{BranchName, BranchType, Lineage};
use crate::core::snapshot::ConfigSnapshot;
use crate::io::forge::ForgeKind;

/// How feature branches pick up changes from their tracking branch and parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStrategy {
    #[default]
    Merge,
    Rebase,
}

/// Forge selection; `auto` detects the forge from the remote URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeSetting {
    #[default]
    Auto,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    Bitbucket,
    Gitea,
}

impl ForgeSetting {
    /// Explicitly configured forge kind, `None` for auto-detection.
    pub fn kind(self) -> Option<ForgeKind> {
        match self {
            ForgeSetting::Auto => None,
            ForgeSetting::GitHub => Some(ForgeKind::GitHub),
            ForgeSetting::GitLab => Some(ForgeKind::GitLab),
            ForgeSetting::Bitbucket => Some(ForgeKind::Bitbucket),
            ForgeSetting::Gitea => Some(ForgeKind::Gitea),
        }
    }
}

/// Stackflow configuration (TOML).
///
/// Edited by humans and rewritten by `set-parent` and by lineage opcodes.
/// Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackflowConfig {
    pub main_branch: BranchName,

    /// Long-lived branches that are never merged into main.
    pub perennial_branches: Vec<BranchName>,

    pub remote: String,

    pub sync_feature_strategy: SyncStrategy,

    /// Push feature branches that have no tracking branch yet.
    pub push_new_branches: bool,

    /// Skip all network operations (fetch, push, proposals).
    pub offline: bool,

    /// Timeout applied to every git subprocess.
    pub git_timeout_secs: u64,

    pub forge: ForgeSetting,

    /// Web host to use instead of the one in the remote URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forge_host: Option<String>,

    /// `child -> parent` relationships between branches.
    pub lineage: Lineage,

    /// Per-branch type overrides. Unlisted branches are features.
    pub branch_types: BTreeMap<BranchName, BranchType>,

    /// Known proposal URLs by branch.
    pub proposals: BTreeMap<BranchName, String>,
}

impl Default for StackflowConfig {
    fn default() -> Self {
        Self {
            main_branch: BranchName::from("main"),
            perennial_branches: Vec::new(),
            remote: "origin".to_string(),
            sync_feature_strategy: SyncStrategy::Merge,
            push_new_branches: false,
            offline: false,
            git_timeout_secs: 120,
            forge: ForgeSetting::Auto,
            forge_host: None,
            lineage: Lineage::new(),
            branch_types: BTreeMap::new(),
            proposals: BTreeMap::new(),
        }
    }
}

impl StackflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.main_branch.as_str().trim().is_empty() {
            return Err(anyhow!("main_branch must be non-empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must be non-empty"));
        }
        if let Some((child, _)) = self.lineage.entries().find(|(child, parent)| child == parent) {
            return Err(anyhow!("branch '{child}' cannot be its own parent"));
        }
        if let Some(branch) = self.lineage.find_cycle() {
            return Err(anyhow!("lineage contains a cycle through '{branch}'"));
        }
        Ok(())
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    /// Classify `branch`: main and perennials by name, then explicit overrides,
    /// otherwise feature.
    pub fn branch_type(&self, branch: &BranchName) -> BranchType {
        if *branch == self.main_branch {
            return BranchType::Main;
        }
        if self.perennial_branches.contains(branch) {
            return BranchType::Perennial;
        }
        self.branch_types
            .get(branch)
            .copied()
            .unwrap_or(BranchType::Feature)
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            lineage: self.lineage.clone(),
            branch_types: self.branch_types.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StackflowConfig::default()`.
pub fn load_config(path: &Path) -> Result<StackflowConfig> {
    if !path.exists() {
        let cfg = StackflowConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StackflowConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StackflowConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Read/write access to the configuration that workflows may change.
pub trait ConfigStore {
    fn snapshot(&self) -> Result<ConfigSnapshot>;
    fn set_parent(&self, branch: &BranchName, parent: &BranchName) -> Result<()>;
    fn remove_parent(&self, branch: &BranchName) -> Result<()>;
}

/// [`ConfigStore`] backed by the TOML file. Every write re-reads the file so
/// hand edits made while a workflow is suspended are kept.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<StackflowConfig> {
        load_config(&self.path)
    }

    fn update(&self, change: impl FnOnce(&mut StackflowConfig)) -> Result<()> {
        let mut cfg = self.load()?;
        change(&mut cfg);
        write_config(&self.path, &cfg)
    }
}

impl ConfigStore for FileConfigStore {
    fn snapshot(&self) -> Result<ConfigSnapshot> {
        Ok(self.load()?.snapshot())
    }

    fn set_parent(&self, branch: &BranchName, parent: &BranchName) -> Result<()> {
        debug!(branch = %branch, parent = %parent, "setting lineage parent");
        self.update(|cfg| cfg.lineage.set_parent(branch.clone(), parent.clone()))
            .with_context(|| format!("set parent of {branch} to {parent}"))
    }

    fn remove_parent(&self, branch: &BranchName) -> Result<()> {
        debug!(branch = %branch, "removing lineage parent");
        self.update(|cfg| {
            cfg.lineage.remove(branch);
        })
        .with_context(|| format!("remove parent of {branch}"))
    }
}
