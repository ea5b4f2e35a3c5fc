//! Locations of stackflow's files inside the repository's git directory.

use std::path::{Path, PathBuf};

/// Resolved paths under `<git-dir>/stackflow/`.
#[derive(Debug, Clone)]
pub struct StackflowPaths {
    pub config_path: PathBuf,
    pub run_state_path: PathBuf,
    pub lock_path: PathBuf,
}

impl StackflowPaths {
    pub fn new(git_dir: &Path) -> Self {
        let dir = git_dir.join("stackflow");
        Self {
            config_path: dir.join("config.toml"),
            run_state_path: dir.join("runstate.json"),
            lock_path: dir.join("lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_git_dir() {
        let paths = StackflowPaths::new(Path::new("/repo/.git"));
        assert_eq!(paths.config_path, Path::new("/repo/.git/stackflow/config.toml"));
        assert_eq!(paths.run_state_path, Path::new("/repo/.git/stackflow/runstate.json"));
        assert_eq!(paths.lock_path, Path::new("/repo/.git/stackflow/lock"));
    }
}
