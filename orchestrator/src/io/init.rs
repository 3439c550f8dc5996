//! `.orchestrator/` scaffolding and canonical paths.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use super::config::{OrchestratorConfig, write_config};
use super::state_store::{OrchestratorState, write_state};
use super::write_atomic;
use crate::core::types::Frame;

/// All canonical paths within `.orchestrator/` for a project root.
#[derive(Debug, Clone)]
pub struct OrchestratorPaths {
    pub root: PathBuf,
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl OrchestratorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dir = root.join(".orchestrator");
        Self {
            root,
            config_path: dir.join("config.toml"),
            state_path: dir.join("state.json"),
            gitignore_path: dir.join(".gitignore"),
            dir,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing `.orchestrator/`.
    pub force: bool,
    pub goal: String,
    pub constraints: String,
    pub verification: String,
}

/// Create `.orchestrator/` in `root` with default config and a locked frame.
///
/// The frame is only locked when a goal is given.
pub fn init_orchestrator(root: &Path, options: &InitOptions) -> Result<OrchestratorPaths> {
    let paths = OrchestratorPaths::new(root);
    if paths.dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .orchestrator already exists (use --force to overwrite)"
        ));
    }
    if paths.dir.exists() && !paths.dir.is_dir() {
        return Err(anyhow!("init: .orchestrator exists but is not a directory"));
    }

    let goal = options.goal.trim().to_string();
    let state = OrchestratorState {
        frame: Frame {
            locked: !goal.is_empty(),
            goal,
            constraints: options.constraints.trim().to_string(),
            verification: options.verification.trim().to_string(),
        },
        ..OrchestratorState::default()
    };

    write_config(&paths.config_path, &OrchestratorConfig::default())?;
    write_state(&paths.state_path, &state)?;
    write_atomic(&paths.gitignore_path, GITIGNORE)?;
    Ok(paths)
}

const GITIGNORE: &str = "*.tmp\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;
    use crate::io::state_store::load_state;

    fn options(goal: &str) -> InitOptions {
        InitOptions {
            goal: goal.to_string(),
            ..InitOptions::default()
        }
    }

    #[test]
    fn init_writes_config_and_locked_frame() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_orchestrator(temp.path(), &options("  Ship login  ")).expect("init");

        assert!(paths.gitignore_path.is_file());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            OrchestratorConfig::default()
        );
        let state = load_state(&paths.state_path).expect("state");
        assert!(state.frame.locked);
        assert_eq!(state.frame.goal, "Ship login");
        assert!(state.plan.is_none());
    }

    #[test]
    fn blank_goal_leaves_frame_unlocked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_orchestrator(temp.path(), &options(" ")).expect("init");
        let state = load_state(&paths.state_path).expect("state");
        assert!(!state.frame.locked);
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_orchestrator(temp.path(), &options("a")).expect("init");
        let err = init_orchestrator(temp.path(), &options("b")).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let forced = InitOptions {
            force: true,
            ..options("b")
        };
        let paths = init_orchestrator(temp.path(), &forced).expect("re-init");
        assert_eq!(load_state(&paths.state_path).expect("state").frame.goal, "b");
    }
}
