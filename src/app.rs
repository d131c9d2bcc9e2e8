//! Application context.
//!
//! `AppContext` owns one handle to each store under the data root and is
//! passed explicitly to every command handler. It also carries the flows
//! that span stores: first-run setup, editing a chain by name, running a
//! chain under the current exit policy, and the startup consistency check.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::chains::{ChainEditor, ChainStore, Link};
use crate::error::{invalid, io_error, Result};
use crate::paths::{display_path, normalize_path, Layout};
use crate::process::ChainRun;
use crate::runner::{ChainRunner, Launcher};
use crate::settings::{ExitPolicy, FileDisplay, SettingsStore};
use crate::shells::ShellRegistry;
use crate::validate::{validate_state, ValidationReport};

#[derive(Debug, Clone)]
pub struct AppContext {
    pub layout: Layout,
    pub settings: SettingsStore,
    pub chains: ChainStore,
    pub shells: ShellRegistry,
}

impl AppContext {
    pub fn new(root: impl Into<PathBuf>, probe_timeout: Duration) -> Self {
        let layout = Layout::new(root);
        let chains = ChainStore::new(layout.clone());
        Self {
            settings: SettingsStore::new(layout.clone()),
            shells: ShellRegistry::new(layout.clone(), chains.clone(), probe_timeout),
            chains,
            layout,
        }
    }

    /// Creates any missing directory or store file. Existing files are left
    /// alone. Returns the paths that were created.
    pub fn setup(&self) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for dir in [
            self.layout.shells_dir(),
            self.layout.chains_dir(),
            self.layout.settings_dir(),
        ] {
            if !dir.is_dir() {
                fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
                created.push(dir);
            }
        }
        for file in [
            self.layout.shells_file(),
            self.layout.identities_file(),
            self.layout.shell_options_file(),
        ] {
            if !file.exists() {
                fs::write(&file, "").map_err(|e| io_error(&file, e))?;
                created.push(file);
            }
        }
        if self.settings.ensure::<FileDisplay>()? {
            created.push(self.settings.path_of::<FileDisplay>());
        }
        if self.settings.ensure::<ExitPolicy>()? {
            created.push(self.settings.path_of::<ExitPolicy>());
        }
        for path in &created {
            tracing::debug!(path = %path.display(), "created");
        }
        Ok(created)
    }

    pub fn validate(&self) -> Result<ValidationReport> {
        validate_state(&self.layout)
    }

    /// Best-effort startup validation: problems become one aggregated
    /// warning and never stop the caller.
    pub fn startup_check(&self) -> Option<ValidationReport> {
        match self.validate() {
            Ok(report) if report.is_clean() => Some(report),
            Ok(report) => {
                tracing::warn!(
                    issues = report.issues.len(),
                    "application state is inconsistent, some features may not work as intended: {}",
                    report.summary()
                );
                Some(report)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to validate application state");
                None
            }
        }
    }

    /// Renders a stored path per the file-display setting.
    pub fn display(&self, path: &str) -> String {
        display_path(path, self.settings.get::<FileDisplay>())
    }

    /// Runs the first selected chain under the stored exit policy.
    pub fn run_chain<L: Launcher>(&self, selection: &[String], launcher: &mut L) -> ChainRun {
        let policy = self.settings.get::<ExitPolicy>();
        ChainRunner::new(&self.chains, &self.shells, policy).run(selection, launcher)
    }

    /// Creates an empty chain; an existing chain of that name is an error.
    pub fn create_chain(&self, name: &str) -> Result<String> {
        let name = crate::chains::validate_chain_name(name)?;
        if self.chains.exists(&name) {
            return Err(invalid(format!("chain '{name}' already exists")));
        }
        ChainEditor::new(name.as_str()).save(&self.chains)?;
        Ok(name)
    }

    /// Saves the links of `from` under the new name `to`; `from` is kept.
    pub fn copy_chain(&self, from: &str, to: &str) -> Result<String> {
        let mut editor = self.open_editor(from)?;
        editor.rename(to)?;
        if self.chains.exists(editor.name()) {
            return Err(invalid(format!("chain '{}' already exists", editor.name())));
        }
        editor.save(&self.chains)?;
        Ok(editor.name().to_string())
    }

    /// Appends a link, creating the chain when it does not exist yet.
    /// Returns the new link's index.
    pub fn add_link(&self, chain: &str, shell: &str, script: &str) -> Result<usize> {
        let mut editor = self.editor_or_new(chain)?;
        let (shell, script) = self.resolve_link(shell, script)?;
        editor.add_link(&shell, &script)?;
        editor.save(&self.chains)?;
        Ok(editor.links().len() - 1)
    }

    pub fn set_link(&self, chain: &str, index: usize, shell: &str, script: &str) -> Result<()> {
        let mut editor = self.open_editor(chain)?;
        let (shell, script) = self.resolve_link(shell, script)?;
        editor.overwrite_link(index, &shell, &script)?;
        editor.save(&self.chains)
    }

    pub fn delete_link(&self, chain: &str, index: usize) -> Result<Link> {
        let mut editor = self.open_editor(chain)?;
        let removed = editor.delete_link(index)?;
        editor.save(&self.chains)?;
        Ok(removed)
    }

    fn open_editor(&self, chain: &str) -> Result<ChainEditor> {
        let name = crate::chains::validate_chain_name(chain)?;
        if !self.chains.exists(&name) {
            return Err(invalid(format!("chain '{name}' does not exist")));
        }
        ChainEditor::open(&self.chains, &name)
    }

    fn editor_or_new(&self, chain: &str) -> Result<ChainEditor> {
        let name = crate::chains::validate_chain_name(chain)?;
        if self.chains.exists(&name) {
            ChainEditor::open(&self.chains, &name)
        } else {
            Ok(ChainEditor::new(name))
        }
    }

    fn resolve_link(&self, shell: &str, script: &str) -> Result<(String, String)> {
        let shell = self.shells.resolve(shell)?;
        let script = normalize_path(script)?;
        if !std::path::Path::new(&script).is_file() {
            return Err(invalid(format!("script not found: {script}")));
        }
        Ok((shell, script))
    }
}
