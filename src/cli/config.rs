//! Where the engine configuration comes from.
//!
//! Files are searched relative to the workspace (the `--workspace` directory,
//! or the current directory), then the user's home, then the system:
//!
//! 1. `<workspace>/itemflow.toml`
//! 2. `<workspace>/.itemflow/config.toml`
//! 3. `~/.itemflow/config.toml`
//! 4. `/etc/itemflow/config.toml` (unix)
//!
//! The first file found wins; without one the built-in defaults apply.

use anyhow::{Context, Result, anyhow};
use std::env as std_env;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Workspace,
    Project,
    User,
    System,
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfigScope::Workspace => "workspace",
            ConfigScope::Project => "project",
            ConfigScope::User => "user",
            ConfigScope::System => "system",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCandidate {
    pub scope: ConfigScope,
    pub path: PathBuf,
}

pub struct ConfigDiscovery {
    root: PathBuf,
    home: Option<PathBuf>,
}

impl ConfigDiscovery {
    /// Discovery rooted at the workspace, or at the current directory
    pub fn new(workspace: Option<&Path>) -> Self {
        let root = workspace
            .map(Path::to_path_buf)
            .or_else(|| std_env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let home = std_env::var_os("HOME")
            .or_else(|| std_env::var_os("USERPROFILE"))
            .map(PathBuf::from);
        Self { root, home }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Every place a configuration file may live, highest priority first
    pub fn candidates(&self) -> Vec<ConfigCandidate> {
        let mut candidates = vec![
            ConfigCandidate {
                scope: ConfigScope::Workspace,
                path: env::workspace_config_file_path(&self.root),
            },
            ConfigCandidate {
                scope: ConfigScope::Project,
                path: env::local_config_file_path(&self.root),
            },
        ];
        if let Some(home) = &self.home {
            candidates.push(ConfigCandidate {
                scope: ConfigScope::User,
                path: env::user_config_file_path(home),
            });
        }
        if cfg!(unix) {
            candidates.push(ConfigCandidate {
                scope: ConfigScope::System,
                path: env::system_config_file_path(),
            });
        }
        candidates
    }

    pub fn find(&self) -> Option<ConfigCandidate> {
        self.candidates().into_iter().find(|c| {
            let found = c.path.is_file();
            debug!("Config candidate {} ({}): {}", c.path.display(), c.scope, found);
            found
        })
    }

    /// Load an explicit file, or the first discovered one, or the defaults
    pub fn load(&self, explicit: Option<&Path>) -> Result<EngineConfig> {
        if let Some(path) = explicit {
            info!("Using configuration {}", path.display());
            return EngineConfig::from_toml_file(path);
        }
        match self.find() {
            Some(found) => {
                info!("Using {} configuration {}", found.scope, found.path.display());
                EngineConfig::from_toml_file(&found.path)
            }
            None => {
                info!("No configuration file found; using built-in defaults");
                Ok(EngineConfig::default())
            }
        }
    }

    /// Write the defaults to the user configuration file unless it exists.
    /// Returns the file path.
    pub fn write_user_defaults(&self) -> Result<PathBuf> {
        let home = self
            .home
            .as_deref()
            .ok_or_else(|| anyhow!("Could not determine the home directory"))?;
        let path = env::user_config_file_path(home);
        if path.exists() {
            debug!("User configuration {} already exists", path.display());
            return Ok(path);
        }

        let dir = env::user_config_dir_path(home);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        EngineConfig::default().to_toml_file(&path)?;
        info!("Wrote default configuration to {}", path.display());
        Ok(path)
    }

    /// Human-readable account of the search
    pub fn report(&self, explicit: Option<&Path>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workspace: {}", self.root.display());
        if let Some(path) = explicit {
            let _ = writeln!(out, "Explicit configuration: {}", path.display());
        }
        let _ = writeln!(out, "Search order:");
        for (i, candidate) in self.candidates().iter().enumerate() {
            let state = match (candidate.path.exists(), candidate.path.is_file()) {
                (true, true) => "found",
                (true, false) => "not a file",
                _ => "missing",
            };
            let _ = writeln!(
                out,
                "  {}. [{}] {} ({})",
                i + 1,
                candidate.scope,
                candidate.path.display(),
                state
            );
        }

        let active = match (explicit, self.find()) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(found)) => found.path.display().to_string(),
            (None, None) => "built-in defaults".to_string(),
        };
        let _ = writeln!(out, "Active: {}", active);
        out
    }
}
