//! Side-effecting collaborators: git, config, forge, browser and persistence.

pub mod backend;
pub mod browser;
pub mod config;
pub mod forge;
pub mod git;
pub mod lock;
pub mod paths;
pub mod process;
pub mod run_state;
