//! Data structures for launching chain links.
//!
//! This module defines the command built for a single link (`LaunchCommand`),
//! the lifecycle status of a chain run (`RunStatus`), and the report handed
//! back to the caller once a run stops (`ChainRun`).

use std::path::Path;

use serde::Serialize;

use crate::chains::Link;
use crate::shells::ShellOptions;

/// A fully resolved invocation for one link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    /// The shell executable.
    pub program: String,
    /// Arguments after the executable: optional pre flag, script, optional post flag.
    pub args: Vec<String>,
    /// Working directory: the script's containing directory, when it has one.
    pub cwd: Option<String>,
}

impl LaunchCommand {
    /// Builds `[shell, pre?, script, post?]`, leaving out empty flags.
    pub fn for_link(link: &Link, options: &ShellOptions) -> Self {
        let mut args = Vec::with_capacity(3);
        if !options.pre_script.is_empty() {
            args.push(options.pre_script.clone());
        }
        args.push(link.script.clone());
        if !options.post_script.is_empty() {
            args.push(options.post_script.clone());
        }
        let cwd = Path::new(&link.script)
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.to_string_lossy().to_string());
        Self {
            program: link.shell.clone(),
            args,
            cwd,
        }
    }

    /// Full argv, executable first.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Shell-quoted rendering for logs and reports.
    pub fn display(&self) -> String {
        shell_words::join(self.argv())
    }
}

/// A link that was launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Launched {
    /// Position of the link in the chain.
    pub index: usize,
    /// Process ID, when the platform reported one.
    pub pid: Option<u32>,
    pub command: LaunchCommand,
}

/// Where a chain run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing was selected; no run took place.
    NoSelection,
    /// The chain has no links; nothing to do.
    Empty,
    /// Every link was launched.
    Success,
    /// A link's script does not exist. Later links were not launched.
    ScriptMissing { index: usize, script: String },
    /// Spawning a link failed. Later links were not launched.
    SpawnFailed {
        index: usize,
        script: String,
        error: String,
    },
    /// The chain or a link's shell options could not be loaded.
    Aborted { error: String },
}

impl RunStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ScriptMissing { .. } | Self::SpawnFailed { .. } | Self::Aborted { .. }
        )
    }
}

/// Outcome of running one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainRun {
    pub chain: Option<String>,
    pub status: RunStatus,
    /// Links launched before the run stopped. They keep running regardless.
    pub launched: Vec<Launched>,
    /// The exit policy asks the host to terminate now, without reporting.
    pub exit_host: bool,
}

impl ChainRun {
    /// Human-readable report line.
    pub fn message(&self) -> String {
        let chain = self.chain.as_deref().unwrap_or("");
        match &self.status {
            RunStatus::NoSelection => "No chain selected to execute.".to_string(),
            RunStatus::Empty => format!("Chain '{}' has no links to execute.", chain),
            RunStatus::Success => format!("Chain '{}' executed successfully.", chain),
            RunStatus::ScriptMissing { script, .. } => format!("Script not found: {}", script),
            RunStatus::SpawnFailed { script, error, .. } => {
                format!("Error executing '{}': {}", script, error)
            }
            RunStatus::Aborted { error } => {
                format!("Failed to execute chain '{}': {}", chain, error)
            }
        }
    }
}
