//! Chain store and the chain editor's working copy.
//!
//! A chain is a file `Chains/<name>.csv` holding one `shell,script` row per
//! link in execution order. Saving always rewrites the whole file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{invalid, io_error, Result, StoreError};
use crate::paths::{Layout, CHAIN_EXTENSION};
use crate::rows::{check_field, read_rows, render_rows, Row, RowPolicy, DELIMITER};
use crate::txn::Transaction;

/// One step of a chain: run `script` with the interpreter at `shell`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub shell: String,
    pub script: String,
}

impl Link {
    pub fn new(shell: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
        }
    }
}

impl Row for Link {
    const ARITY: usize = 2;

    fn from_fields(fields: Vec<String>) -> Self {
        let mut fields = fields.into_iter();
        Self {
            shell: fields.next().unwrap_or_default(),
            script: fields.next().unwrap_or_default(),
        }
    }

    fn fields(&self) -> Vec<&str> {
        vec![self.shell.as_str(), self.script.as_str()]
    }
}

/// Trims and checks a chain name so it maps to exactly one file.
pub fn validate_chain_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("Please enter a chain name."));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(invalid(format!("chain name `{name}` must not contain path separators")));
    }
    check_field("chain name", name)?;
    Ok(name.to_string())
}

#[derive(Debug, Clone)]
pub struct ChainStore {
    layout: Layout,
}

impl ChainStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Names of all chains, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.layout.chains_dir();
        let entries = fs::read_dir(&dir).map_err(|e| io_error(&dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHAIN_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Maps a chain name to its file; names that would leave `Chains/` are
    /// rejected.
    fn file_of(&self, name: &str) -> Result<(String, PathBuf)> {
        let name = validate_chain_name(name)?;
        let path = self.layout.chain_file(&name);
        Ok((name, path))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file_of(name)
            .map(|(_, path)| path.is_file())
            .unwrap_or(false)
    }

    /// Loads the links of `name`; rows without exactly two fields are skipped.
    pub fn load(&self, name: &str) -> Result<Vec<Link>> {
        let (_, path) = self.file_of(name)?;
        read_rows(&path, RowPolicy::Skip)
    }

    /// Overwrites the chain file with `links` in order.
    pub fn save(&self, name: &str, links: &[Link]) -> Result<()> {
        let (name, path) = self.file_of(name)?;
        let mut txn = Transaction::new();
        txn.write(path, render_rows(links));
        txn.commit()?;
        tracing::debug!(chain = %name, links = links.len(), "chain saved");
        Ok(())
    }

    pub fn delete_chain(&self, name: &str) -> Result<()> {
        let (name, path) = self.file_of(name)?;
        if !path.is_file() {
            return Err(invalid(format!("chain '{name}' does not exist")));
        }
        let mut txn = Transaction::new();
        txn.remove(path);
        txn.commit()?;
        tracing::debug!(chain = %name, "chain deleted");
        Ok(())
    }

    /// Deletes each chain independently; failures do not stop the batch.
    pub fn delete_chains(&self, names: &[String]) -> Vec<(String, StoreError)> {
        names
            .iter()
            .filter_map(|name| {
                self.delete_chain(name)
                    .err()
                    .map(|err| (name.clone(), err))
            })
            .collect()
    }

    /// Stages rewrites of every chain that references one of `shells`,
    /// dropping those links. Returns the number of links dropped.
    pub fn stage_without_shells(
        &self,
        txn: &mut Transaction,
        shells: &HashSet<String>,
    ) -> Result<usize> {
        let mut dropped = 0;
        for name in self.list()? {
            let links = self.load(&name)?;
            let kept: Vec<Link> = links
                .iter()
                .filter(|link| !shells.contains(&link.shell))
                .cloned()
                .collect();
            if kept.len() != links.len() {
                dropped += links.len() - kept.len();
                txn.write(self.layout.chain_file(&name), render_rows(&kept));
            }
        }
        Ok(dropped)
    }
}

/// In-memory working copy of one chain. Nothing is persisted until
/// [`ChainEditor::save`]; dropping the editor discards the edits.
#[derive(Debug, Clone, Default)]
pub struct ChainEditor {
    name: String,
    links: Vec<Link>,
}

impl ChainEditor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
        }
    }

    pub fn open(store: &ChainStore, name: &str) -> Result<Self> {
        let links = store.load(name)?;
        Ok(Self {
            name: validate_chain_name(name)?,
            links,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points the working copy at another chain name. The next
    /// [`ChainEditor::save`] writes a new file and leaves the old one alone.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        self.name = validate_chain_name(name)?;
        Ok(())
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn add_link(&mut self, shell: &str, script: &str) -> Result<()> {
        let link = checked_link(shell, script)?;
        self.links.push(link);
        Ok(())
    }

    pub fn delete_link(&mut self, index: usize) -> Result<Link> {
        self.check_index(index)?;
        Ok(self.links.remove(index))
    }

    pub fn overwrite_link(&mut self, index: usize, shell: &str, script: &str) -> Result<()> {
        self.check_index(index)?;
        self.links[index] = checked_link(shell, script)?;
        Ok(())
    }

    pub fn save(&self, store: &ChainStore) -> Result<()> {
        store.save(&self.name, &self.links)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.links.len() {
            return Err(invalid(format!(
                "link {index} does not exist (chain has {} links)",
                self.links.len()
            )));
        }
        Ok(())
    }
}

fn checked_link(shell: &str, script: &str) -> Result<Link> {
    if shell.trim().is_empty() || script.trim().is_empty() {
        return Err(invalid("Please select a shell and script."));
    }
    check_field("shell", shell)?;
    check_field("script", script)?;
    if script.contains(DELIMITER) {
        return Err(invalid(format!(
            "script path must not contain `{DELIMITER}`: {script}"
        )));
    }
    Ok(Link::new(shell, script))
}

/// True when the file at `path` exists and is a regular file.
pub fn script_exists(path: &str) -> bool {
    Path::new(path).is_file()
}
