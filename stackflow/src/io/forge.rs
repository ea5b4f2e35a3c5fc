//! Forge connectors.
//!
//! Connectors use the forge's web flow: creating a proposal means building the
//! "new pull request" page URL with the branch, target, title and body filled
//! in. Known proposals come from the `proposals` table in the config.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::branch::BranchName;

static REMOTE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:https?|ssh|git)://)?(?:[^@/]+@)?(?P<host>[^/:]+)(?::\d+)?[:/](?P<org>.+)/(?P<repo>[^/]+?)(?:\.git)?/?$",
    )
    .expect("remote url pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    GitHub,
    GitLab,
    Bitbucket,
    Gitea,
}

impl ForgeKind {
    /// Guess the forge from a hostname.
    pub fn detect(host: &str) -> Option<Self> {
        let host = host.to_ascii_lowercase();
        if host.contains("github") {
            Some(ForgeKind::GitHub)
        } else if host.contains("gitlab") {
            Some(ForgeKind::GitLab)
        } else if host.contains("bitbucket") {
            Some(ForgeKind::Bitbucket)
        } else if host.contains("gitea") || host.contains("codeberg") {
            Some(ForgeKind::Gitea)
        } else {
            None
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForgeKind::GitHub => "GitHub",
            ForgeKind::GitLab => "GitLab",
            ForgeKind::Bitbucket => "Bitbucket",
            ForgeKind::Gitea => "Gitea",
        };
        f.write_str(name)
    }
}

/// Host and path of a hosted repository, parsed from a remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub host: String,
    pub org: String,
    pub repo: String,
}

/// Parse `https://host/org/repo(.git)`, `git@host:org/repo(.git)` and
/// `ssh://user@host:port/org/repo`. Local paths yield `None`.
pub fn parse_remote_url(url: &str) -> Option<RemoteUrl> {
    let caps = REMOTE_URL_RE.captures(url.trim())?;
    Some(RemoteUrl {
        host: caps.name("host")?.as_str().to_string(),
        org: caps.name("org")?.as_str().to_string(),
        repo: caps.name("repo")?.as_str().to_string(),
    })
}

/// An open proposal for a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalData {
    pub branch: BranchName,
    pub target: BranchName,
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Connection to a code-hosting forge.
pub trait Forge: Send + Sync {
    fn kind(&self) -> ForgeKind;

    /// Existing proposal merging `branch` into `target`.
    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>>;

    /// Create a proposal and return the URL the user should visit.
    fn create_proposal(&self, data: &ProposalData) -> Result<String>;
}

/// Repository coordinates and known proposals shared by every connector.
#[derive(Debug, Clone)]
pub struct ForgeRepo {
    pub host: String,
    pub org: String,
    pub repo: String,
    pub known_proposals: BTreeMap<BranchName, String>,
}

impl ForgeRepo {
    fn base_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.org, self.repo)
    }

    fn find(&self, kind: ForgeKind, branch: &BranchName, target: &BranchName) -> Option<Proposal> {
        let found = self
            .known_proposals
            .get(branch)
            .map(|url| Proposal { url: url.clone() });
        debug!(
            %kind,
            branch = %branch,
            target = %target,
            found = found.is_some(),
            "proposal lookup"
        );
        found
    }
}

fn enc(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn with_query(mut url: String, params: &[(&str, Option<&String>)]) -> String {
    let mut sep = if url.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        if let Some(value) = value {
            url.push(sep);
            url.push_str(key);
            url.push('=');
            url.push_str(&enc(value));
            sep = '&';
        }
    }
    url
}

pub struct GitHub(pub ForgeRepo);
pub struct GitLab(pub ForgeRepo);
pub struct Bitbucket(pub ForgeRepo);
pub struct Gitea(pub ForgeRepo);

impl Forge for GitHub {
    fn kind(&self) -> ForgeKind {
        ForgeKind::GitHub
    }

    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>> {
        Ok(self.0.find(self.kind(), branch, target))
    }

    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        let url = format!(
            "{}/compare/{}...{}?expand=1",
            self.0.base_url(),
            enc(data.target.as_str()),
            enc(data.branch.as_str())
        );
        Ok(with_query(
            url,
            &[("title", data.title.as_ref()), ("body", data.body.as_ref())],
        ))
    }
}

impl Forge for GitLab {
    fn kind(&self) -> ForgeKind {
        ForgeKind::GitLab
    }

    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>> {
        Ok(self.0.find(self.kind(), branch, target))
    }

    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        let url = format!(
            "{}/-/merge_requests/new?merge_request%5Bsource_branch%5D={}&merge_request%5Btarget_branch%5D={}",
            self.0.base_url(),
            enc(data.branch.as_str()),
            enc(data.target.as_str())
        );
        Ok(with_query(
            url,
            &[
                ("merge_request%5Btitle%5D", data.title.as_ref()),
                ("merge_request%5Bdescription%5D", data.body.as_ref()),
            ],
        ))
    }
}

impl Forge for Bitbucket {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Bitbucket
    }

    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>> {
        Ok(self.0.find(self.kind(), branch, target))
    }

    /// Bitbucket's page takes no title or body parameters.
    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        let dest = format!("{}/{}:{}", self.0.org, self.0.repo, data.target);
        Ok(format!(
            "{}/pull-requests/new?source={}&dest={}",
            self.0.base_url(),
            enc(data.branch.as_str()),
            enc(&dest)
        ))
    }
}

impl Forge for Gitea {
    fn kind(&self) -> ForgeKind {
        ForgeKind::Gitea
    }

    fn find_proposal(&self, branch: &BranchName, target: &BranchName) -> Result<Option<Proposal>> {
        Ok(self.0.find(self.kind(), branch, target))
    }

    fn create_proposal(&self, data: &ProposalData) -> Result<String> {
        let url = format!(
            "{}/compare/{}...{}",
            self.0.base_url(),
            enc(data.target.as_str()),
            enc(data.branch.as_str())
        );
        Ok(with_query(
            url,
            &[("title", data.title.as_ref()), ("body", data.body.as_ref())],
        ))
    }
}

/// Build the connector for `kind`.
pub fn connector(kind: ForgeKind, repo: ForgeRepo) -> Box<dyn Forge> {
    match kind {
        ForgeKind::GitHub => Box::new(GitHub(repo)),
        ForgeKind::GitLab => Box::new(GitLab(repo)),
        ForgeKind::Bitbucket => Box::new(Bitbucket(repo)),
        ForgeKind::Gitea => Box::new(Gitea(repo)),
    }
}

/// Select a connector from the configured kind, falling back to detection
/// from the remote host. `None` when the remote is not on a recognizable forge.
pub fn detect(
    configured: Option<ForgeKind>,
    host_override: Option<&str>,
    remote_url: &str,
    known_proposals: BTreeMap<BranchName, String>,
) -> Option<Box<dyn Forge>> {
    let parsed = parse_remote_url(remote_url)?;
    let host = host_override.map_or(parsed.host, str::to_string);
    let kind = configured.or_else(|| ForgeKind::detect(&host))?;
    debug!(%kind, host = %host, "forge selected");
    Some(connector(
        kind,
        ForgeRepo {
            host,
            org: parsed.org,
            repo: parsed.repo,
            known_proposals,
        },
    ))
}
