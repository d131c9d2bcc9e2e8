//! Shell registry.
//!
//! Three row-aligned stores describe the registered shells:
//!
//! - `shells.csv`: one normalized executable path per row.
//! - `identities.csv`: `<path>,<identity>`.
//! - `shell_options.csv`: `<path>,<pre flag>,<script marker>,<post flag>`.
//!
//! Chains refer to shells by path only, so removing a shell also drops every
//! link that uses it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::chains::ChainStore;
use crate::detect::detect_shell;
use crate::error::{invalid, io_error, Result, StoreError};
use crate::paths::{normalize_path, Layout};
use crate::rows::{append_row, check_field, read_rows, render_rows, Row, RowPolicy};
use crate::txn::Transaction;

/// Placeholder stored in the options row where the script path goes.
pub const SCRIPT_MARKER: &str = "{script}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRow {
    pub path: String,
}

impl Row for ShellRow {
    const ARITY: usize = 1;

    fn from_fields(fields: Vec<String>) -> Self {
        Self {
            path: fields.into_iter().next().unwrap_or_default(),
        }
    }

    fn fields(&self) -> Vec<&str> {
        vec![self.path.as_str()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRow {
    pub path: String,
    pub identity: String,
}

impl Row for IdentityRow {
    const ARITY: usize = 2;

    fn from_fields(fields: Vec<String>) -> Self {
        let mut fields = fields.into_iter();
        Self {
            path: fields.next().unwrap_or_default(),
            identity: fields.next().unwrap_or_default(),
        }
    }

    fn fields(&self) -> Vec<&str> {
        vec![self.path.as_str(), self.identity.as_str()]
    }
}

/// Invocation template for one shell. The executable and script positions are
/// fixed; only the flags around the script are editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellOptions {
    pub exec: String,
    pub pre_script: String,
    pub marker: String,
    pub post_script: String,
}

impl ShellOptions {
    pub fn with_flags(path: &str, pre_script: &str, post_script: &str) -> Self {
        Self {
            exec: path.to_string(),
            pre_script: pre_script.to_string(),
            marker: SCRIPT_MARKER.to_string(),
            post_script: post_script.to_string(),
        }
    }
}

impl Row for ShellOptions {
    const ARITY: usize = 4;

    fn from_fields(fields: Vec<String>) -> Self {
        let mut fields = fields.into_iter();
        Self {
            exec: fields.next().unwrap_or_default(),
            pre_script: fields.next().unwrap_or_default(),
            marker: fields.next().unwrap_or_default(),
            post_script: fields.next().unwrap_or_default(),
        }
    }

    fn fields(&self) -> Vec<&str> {
        vec![
            self.exec.as_str(),
            self.pre_script.as_str(),
            self.marker.as_str(),
            self.post_script.as_str(),
        ]
    }
}

/// A registered shell with its identity and options joined in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellEntry {
    pub index: usize,
    pub path: String,
    pub identity: String,
    pub options: ShellOptions,
}

/// Summary of a cascading removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub shells: Vec<String>,
    pub links_dropped: usize,
}

/// Flags seeded for a newly added shell, keyed by its identity.
pub fn default_flags(identity: &str) -> (&'static str, &'static str) {
    match identity {
        "Command Prompt" => ("/c", ""),
        "PowerShell" | "Windows PowerShell" => ("-File", ""),
        _ => ("", ""),
    }
}

#[derive(Debug, Clone)]
pub struct ShellRegistry {
    layout: Layout,
    chains: ChainStore,
    probe_timeout: Duration,
}

impl ShellRegistry {
    pub fn new(layout: Layout, chains: ChainStore, probe_timeout: Duration) -> Self {
        Self {
            layout,
            chains,
            probe_timeout,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    fn shells_file(&self) -> PathBuf {
        self.layout.shells_file()
    }

    fn identities_file(&self) -> PathBuf {
        self.layout.identities_file()
    }

    fn options_file(&self) -> PathBuf {
        self.layout.shell_options_file()
    }

    pub fn paths(&self) -> Result<Vec<String>> {
        Ok(read_rows::<ShellRow>(&self.shells_file(), RowPolicy::Strict)?
            .into_iter()
            .map(|row| row.path)
            .collect())
    }

    pub fn identities(&self) -> Result<Vec<IdentityRow>> {
        read_rows(&self.identities_file(), RowPolicy::Strict)
    }

    pub fn all_options(&self) -> Result<Vec<ShellOptions>> {
        read_rows(&self.options_file(), RowPolicy::Strict)
    }

    /// Every registered shell, with identity and options looked up by path.
    pub fn list(&self) -> Result<Vec<ShellEntry>> {
        let identities = self.identities()?;
        let options = self.all_options()?;
        Ok(self
            .paths()?
            .into_iter()
            .enumerate()
            .map(|(index, path)| {
                let identity = identities
                    .iter()
                    .find(|row| row.path == path)
                    .map(|row| row.identity.clone())
                    .unwrap_or_default();
                let options = options
                    .iter()
                    .find(|row| row.exec == path)
                    .cloned()
                    .unwrap_or_else(|| ShellOptions::with_flags(&path, "", ""));
                ShellEntry {
                    index,
                    path,
                    identity,
                    options,
                }
            })
            .collect())
    }

    pub fn entry(&self, index: usize) -> Result<ShellEntry> {
        self.list()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| invalid(format!("shell {index} does not exist")))
    }

    /// Resolves a user-supplied shell reference (path or list index) to a
    /// registered, normalized path.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        let paths = self.paths()?;
        if let Ok(index) = reference.trim().parse::<usize>() {
            return paths
                .get(index)
                .cloned()
                .ok_or_else(|| invalid(format!("shell {index} does not exist")));
        }
        let path = normalize_path(reference)?;
        if paths.contains(&path) {
            Ok(path)
        } else {
            Err(invalid(format!("shell {path} is not registered")))
        }
    }

    /// Registers the executable at `raw_path`, detecting its identity.
    ///
    /// The three stores are appended one after another. A failure part way
    /// leaves them misaligned; the error says so and nothing is repaired.
    pub async fn add_shell(&self, raw_path: &str) -> Result<ShellEntry> {
        let path = normalize_path(raw_path)?;
        check_field("shell path", &path)?;
        if !Path::new(&path).is_file() {
            return Err(invalid(format!("shell program not found: {path}")));
        }
        let existing = self.paths()?;
        if existing.contains(&path) {
            return Err(invalid(format!("shell {path} is already registered")));
        }

        let identity = detect_shell(&path, self.probe_timeout).await;
        let (pre, post) = default_flags(&identity);
        let options = ShellOptions::with_flags(&path, pre, post);

        let shells_file = self.shells_file();
        append_row(&shells_file, &ShellRow { path: path.clone() })
            .map_err(|e| io_error(&shells_file, e))?;

        let identities_file = self.identities_file();
        let identity_row = IdentityRow {
            path: path.clone(),
            identity: identity.clone(),
        };
        append_row(&identities_file, &identity_row).map_err(|source| {
            StoreError::PartialAppend {
                written: vec![shells_file.display().to_string()],
                failed: identities_file.clone(),
                source,
            }
        })?;

        let options_file = self.options_file();
        append_row(&options_file, &options).map_err(|source| StoreError::PartialAppend {
            written: vec![
                shells_file.display().to_string(),
                identities_file.display().to_string(),
            ],
            failed: options_file.clone(),
            source,
        })?;

        tracing::info!(%path, %identity, "shell added");
        Ok(ShellEntry {
            index: existing.len(),
            path,
            identity,
            options,
        })
    }

    /// Removes the shells at `indices` and every chain link that uses them.
    /// All touched files are committed together.
    pub fn remove_shells(&self, indices: &[usize]) -> Result<Removal> {
        if indices.is_empty() {
            return Err(invalid("No shell selected to remove."));
        }
        let paths = self.paths()?;
        if let Some(bad) = indices.iter().find(|&&idx| idx >= paths.len()) {
            return Err(invalid(format!("shell {bad} does not exist")));
        }
        let selected: HashSet<usize> = indices.iter().copied().collect();
        let removed: HashSet<String> = selected.iter().map(|&idx| paths[idx].clone()).collect();

        let kept_shells: Vec<ShellRow> = paths
            .iter()
            .enumerate()
            .filter(|(idx, _)| !selected.contains(idx))
            .map(|(_, path)| ShellRow { path: path.clone() })
            .collect();
        let kept_identities: Vec<IdentityRow> = self
            .identities()?
            .into_iter()
            .filter(|row| !removed.contains(&row.path))
            .collect();
        let kept_options: Vec<ShellOptions> = self
            .all_options()?
            .into_iter()
            .filter(|row| !removed.contains(&row.exec))
            .collect();

        let mut txn = Transaction::new();
        txn.write(self.shells_file(), render_rows(&kept_shells));
        txn.write(self.identities_file(), render_rows(&kept_identities));
        txn.write(self.options_file(), render_rows(&kept_options));
        let links_dropped = self.chains.stage_without_shells(&mut txn, &removed)?;
        txn.commit()?;

        let mut shells: Vec<String> = removed.into_iter().collect();
        shells.sort();
        tracing::info!(?shells, links_dropped, "shells removed");
        Ok(Removal {
            shells,
            links_dropped,
        })
    }

    /// Replaces the identity label of the shell at `index`.
    pub fn set_identity(&self, index: usize, identity: &str) -> Result<()> {
        check_field("identity", identity)?;
        let path = self.path_at(index)?;
        let mut rows = self.identities()?;
        match rows.iter_mut().find(|row| row.path == path) {
            Some(row) => row.identity = identity.to_string(),
            None => {
                return Err(StoreError::ShellNotFound { path });
            }
        }
        let mut txn = Transaction::new();
        txn.write(self.identities_file(), render_rows(&rows));
        txn.commit()?;
        tracing::debug!(%path, identity, "identity updated");
        Ok(())
    }

    /// Replaces the pre/post script flags of the shell at `index`.
    pub fn set_options(&self, index: usize, pre_script: &str, post_script: &str) -> Result<()> {
        check_field("pre-script flag", pre_script)?;
        check_field("post-script flag", post_script)?;
        let path = self.path_at(index)?;
        let mut rows = self.all_options()?;
        match rows.iter_mut().find(|row| row.exec == path) {
            Some(row) => {
                row.pre_script = pre_script.to_string();
                row.post_script = post_script.trim_end().to_string();
            }
            None => return Err(StoreError::ShellNotFound { path }),
        }
        let mut txn = Transaction::new();
        txn.write(self.options_file(), render_rows(&rows));
        txn.commit()?;
        tracing::debug!(%path, pre_script, post_script, "options updated");
        Ok(())
    }

    /// Re-runs detection for the shell at `index` and stores the result.
    pub async fn redetect(&self, index: usize) -> Result<String> {
        let path = self.path_at(index)?;
        let identity = detect_shell(&path, self.probe_timeout).await;
        self.set_identity(index, &identity)?;
        Ok(identity)
    }

    /// Looks up the invocation options for `path`; a missing shell is an error.
    pub fn get_shell_options(&self, path: &str) -> Result<ShellOptions> {
        read_rows::<ShellOptions>(&self.options_file(), RowPolicy::Skip)?
            .into_iter()
            .find(|row| row.exec == path)
            .ok_or_else(|| StoreError::ShellNotFound {
                path: path.to_string(),
            })
    }

    fn path_at(&self, index: usize) -> Result<String> {
        self.paths()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| invalid(format!("shell {index} does not exist")))
    }
}
