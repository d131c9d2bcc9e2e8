//! Cross-store consistency checks.
//!
//! Read-only. Every problem found is collected into a [`ValidationReport`]
//! rather than failing fast, so one pass surfaces everything at once.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{io_error, Result};
use crate::paths::{normalize_path, Layout, CHAIN_EXTENSION};
use crate::rows::{read_rows, split_fields, RowPolicy, DELIMITER};
use crate::settings::{validate_settings_file, ExitPolicy, FileDisplay, SettingOption};
use crate::shells::{IdentityRow, ShellOptions, ShellRow, SCRIPT_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Chains,
    Settings,
    Shells,
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Area::Chains => "chains",
            Area::Settings => "settings",
            Area::Shells => "shells",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub area: Area,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, area: Area, message: impl Into<String>) {
        self.issues.push(Issue {
            area,
            message: message.into(),
        });
    }

    pub fn count(&self, area: Area) -> usize {
        self.issues.iter().filter(|issue| issue.area == area).count()
    }

    /// Single-line summary suitable for one aggregated warning.
    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("[{}] {}", issue.area, issue.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The three shell stores, loaded once for lookups.
struct ShellStores {
    shells: Vec<ShellRow>,
    identities: Vec<IdentityRow>,
    options: Vec<ShellOptions>,
}

/// Checks the Chains, Settings and Shells directories below `layout`.
pub fn validate_state(layout: &Layout) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let stores = check_shells(layout, &mut report);
    check_settings(layout, &mut report);
    check_chains(layout, stores.as_ref(), &mut report)?;
    Ok(report)
}

fn check_shells(layout: &Layout, report: &mut ValidationReport) -> Option<ShellStores> {
    let shells = load_strict::<ShellRow>(&layout.shells_file(), report)?;
    let identities = load_strict::<IdentityRow>(&layout.identities_file(), report)?;
    let options = load_strict::<ShellOptions>(&layout.shell_options_file(), report)?;

    if shells.len() != identities.len() || shells.len() != options.len() {
        report.push(
            Area::Shells,
            format!(
                "store lengths differ: {} shells, {} identities, {} option rows",
                shells.len(),
                identities.len(),
                options.len()
            ),
        );
    }
    for (idx, shell) in shells.iter().enumerate() {
        match identities.get(idx) {
            Some(row) if row.path == shell.path => {}
            Some(row) => report.push(
                Area::Shells,
                format!("identity row {idx} is for {} but shell row is {}", row.path, shell.path),
            ),
            None => {}
        }
        match options.get(idx) {
            Some(row) if row.exec != shell.path => report.push(
                Area::Shells,
                format!("options row {idx} is for {} but shell row is {}", row.exec, shell.path),
            ),
            Some(row) if row.marker != SCRIPT_MARKER => report.push(
                Area::Shells,
                format!("options row {idx} has script marker `{}`, expected `{SCRIPT_MARKER}`", row.marker),
            ),
            _ => {}
        }
    }
    Some(ShellStores {
        shells,
        identities,
        options,
    })
}

fn load_strict<R: crate::rows::Row>(path: &Path, report: &mut ValidationReport) -> Option<Vec<R>> {
    match read_rows(path, RowPolicy::Strict) {
        Ok(rows) => Some(rows),
        Err(err) => {
            report.push(Area::Shells, err.to_string());
            None
        }
    }
}

fn check_settings(layout: &Layout, report: &mut ValidationReport) {
    for (file, options) in [
        (FileDisplay::FILE_NAME, FileDisplay::OPTIONS),
        (ExitPolicy::FILE_NAME, ExitPolicy::OPTIONS),
    ] {
        if let Err(err) = validate_settings_file(&layout.setting_file(file), options) {
            report.push(Area::Settings, err.to_string());
        }
    }
}

fn check_chains(
    layout: &Layout,
    stores: Option<&ShellStores>,
    report: &mut ValidationReport,
) -> Result<()> {
    let dir = layout.chains_dir();
    if !dir.is_dir() {
        report.push(Area::Chains, format!("chains directory {} does not exist", dir.display()));
        return Ok(());
    }
    let mut files: Vec<_> = fs::read_dir(&dir)
        .map_err(|e| io_error(&dir, e))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(CHAIN_EXTENSION)
        })
        .collect();
    files.sort();

    for path in files {
        let chain = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                report.push(Area::Chains, format!("chain '{chain}': {err}"));
                continue;
            }
        };
        for (idx, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let row = idx + 1;
            let fields = match split_fields(line) {
                Ok(fields) if fields.len() == 2 => fields,
                Ok(_) | Err(_) => {
                    report.push(Area::Chains, format!("chain '{chain}' row {row}: expected `shell,script`"));
                    continue;
                }
            };
            for problem in shell_problems(&fields[0], stores) {
                report.push(Area::Chains, format!("chain '{chain}' row {row}: {problem}"));
            }
            for problem in script_problems(&fields[1]) {
                report.push(Area::Chains, format!("chain '{chain}' row {row}: {problem}"));
            }
        }
    }
    Ok(())
}

fn path_problems(kind: &str, path: &str) -> Vec<String> {
    let mut problems = Vec::new();
    match normalize_path(path) {
        Ok(normalized) if normalized == path => {}
        Ok(normalized) => problems.push(format!("{kind} {path} is not normalized (expected {normalized})")),
        Err(err) => problems.push(format!("{kind} {path}: {err}")),
    }
    if !Path::new(path).exists() {
        problems.push(format!("{kind} {path} does not exist"));
    }
    problems
}

fn shell_problems(shell: &str, stores: Option<&ShellStores>) -> Vec<String> {
    let mut problems = path_problems("shell", shell);
    if let Some(stores) = stores {
        let counts = [
            ("shells", stores.shells.iter().filter(|r| r.path == shell).count()),
            ("identities", stores.identities.iter().filter(|r| r.path == shell).count()),
            ("shell options", stores.options.iter().filter(|r| r.exec == shell).count()),
        ];
        for (store, count) in counts {
            if count != 1 {
                problems.push(format!("shell {shell} has {count} entries in {store}, expected 1"));
            }
        }
    }
    problems
}

fn script_problems(script: &str) -> Vec<String> {
    let mut problems = path_problems("script", script);
    if script.contains(DELIMITER) {
        problems.push(format!("script {script} contains `{DELIMITER}`"));
    }
    problems
}
