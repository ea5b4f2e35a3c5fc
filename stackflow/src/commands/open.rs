//! Opening a repository and gathering read-only data for planning.

use std::path::Path;
use std::thread;

use anyhow::{Context as _, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::backend::Repository;
use crate::io::browser::Browser;
use crate::io::config::{FileConfigStore, StackflowConfig, load_config};
use crate::io::forge::{self, Forge};
use crate::io::git::Git;
use crate::io::paths::StackflowPaths;
use crate::io::run_state::RunStateStore;
use crate::plan::RepoData;
use crate::plan::propose::BranchToPropose;
use crate::vm::context::Context;

/// Everything a command needs about one repository.
pub struct OpenRepo {
    pub git: Git,
    pub paths: StackflowPaths,
    pub config: StackflowConfig,
    pub config_store: FileConfigStore,
    pub store: RunStateStore,
    pub forge: Option<Box<dyn Forge>>,
}

impl OpenRepo {
    pub fn context<'a>(&'a self, browser: &'a dyn Browser) -> Context<'a> {
        Context {
            repo: &self.git,
            config: &self.config_store,
            forge: self.forge.as_deref(),
            browser,
        }
    }
}

#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn open_repo(workdir: &Path) -> Result<OpenRepo> {
    let git_dir = Git::new(workdir)
        .git_dir()
        .with_context(|| format!("{} is not inside a git repository", workdir.display()))?;
    let paths = StackflowPaths::new(&git_dir);
    let config = load_config(&paths.config_path)?;
    let git = Git::new(workdir)
        .with_remote(config.remote.clone())
        .with_timeout(config.git_timeout());

    let forge = match git.remote_url()? {
        Some(url) => forge::detect(
            config.forge.kind(),
            config.forge_host.as_deref(),
            &url,
            config.proposals.clone(),
        ),
        None => {
            debug!(remote = %config.remote, "remote not configured");
            None
        }
    };

    debug!(git_dir = %git_dir.display(), forge = forge.is_some(), "repository opened");
    Ok(OpenRepo {
        config_store: FileConfigStore::new(&paths.config_path),
        store: RunStateStore::new(&paths.run_state_path),
        git,
        paths,
        config,
        forge,
    })
}

/// Read the branch snapshot, stash size, open changes and current branch
/// concurrently. All four are read-only queries.
#[instrument(skip_all)]
pub fn prefetch<R>(repo: &R) -> Result<RepoData>
where
    R: Repository + Sync + ?Sized,
{
    thread::scope(|scope| {
        let branches = scope.spawn(|| repo.branches_snapshot());
        let stash_size = scope.spawn(|| repo.stash_size());
        let dirty = scope.spawn(|| repo.has_open_changes());
        let current = scope.spawn(|| repo.current_branch());

        let join_failed = || anyhow!("repository query thread panicked");
        let data = RepoData {
            branches: branches.join().map_err(|_| join_failed())??,
            stash_size: stash_size.join().map_err(|_| join_failed())??,
            has_open_changes: dirty.join().map_err(|_| join_failed())??,
            current: current.join().map_err(|_| join_failed())??,
        };
        debug!(
            current = %data.current,
            branches = data.branches.branches.len(),
            stash_size = data.stash_size.0,
            dirty = data.has_open_changes,
            "repository data gathered"
        );
        Ok(data)
    })
}

/// Look up existing proposals for `branches` concurrently. Any failed
/// lookup fails the whole call, since planning without it could create a
/// duplicate proposal.
#[instrument(skip_all, fields(branches = branches.len()))]
pub fn lookup_proposals(forge: &dyn Forge, branches: &mut [BranchToPropose]) -> Result<()> {
    let found = thread::scope(|scope| -> Result<Vec<_>> {
        let lookups: Vec<_> = branches
            .iter()
            .filter(|branch| branch.branch_type.is_proposable())
            .map(|branch| {
                let name = branch.name.clone();
                let parent = branch.parent.clone();
                let handle = scope.spawn(move || forge.find_proposal(&name, &parent));
                (branch.name.clone(), handle)
            })
            .collect();
        let mut found = Vec::new();
        for (name, handle) in lookups {
            let proposal = handle
                .join()
                .map_err(|_| anyhow!("proposal lookup for {name} panicked"))?
                .with_context(|| format!("look up proposal for {name}"))?;
            if let Some(proposal) = proposal {
                debug!(branch = %name, url = %proposal.url, "found existing proposal");
                found.push((name, proposal.url));
            }
        }
        Ok(found)
    })?;
    for (name, url) in found {
        if let Some(branch) = branches.iter_mut().find(|branch| branch.name == name) {
            branch.existing_proposal_url = Some(url);
        }
    }
    Ok(())
}
