//! Path handling: the data-root layout, normalization and display.

use std::path::{Component, Path, PathBuf};

use crate::error::{invalid, Result};
use crate::settings::FileDisplay;

pub const SHELLS_DIR: &str = "Shells";
pub const CHAINS_DIR: &str = "Chains";
pub const SETTINGS_DIR: &str = "Settings";

pub const SHELLS_FILE: &str = "shells.csv";
pub const IDENTITIES_FILE: &str = "identities.csv";
pub const SHELL_OPTIONS_FILE: &str = "shell_options.csv";

pub const CHAIN_EXTENSION: &str = "csv";

/// Locations of every store below a data root.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn shells_dir(&self) -> PathBuf {
        self.root.join(SHELLS_DIR)
    }

    pub fn chains_dir(&self) -> PathBuf {
        self.root.join(CHAINS_DIR)
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.root.join(SETTINGS_DIR)
    }

    pub fn shells_file(&self) -> PathBuf {
        self.shells_dir().join(SHELLS_FILE)
    }

    pub fn identities_file(&self) -> PathBuf {
        self.shells_dir().join(IDENTITIES_FILE)
    }

    pub fn shell_options_file(&self) -> PathBuf {
        self.shells_dir().join(SHELL_OPTIONS_FILE)
    }

    pub fn setting_file(&self, file_name: &str) -> PathBuf {
        self.settings_dir().join(file_name)
    }

    pub fn chain_file(&self, name: &str) -> PathBuf {
        self.chains_dir()
            .join(format!("{}.{}", name, CHAIN_EXTENSION))
    }
}

/// Returns the canonical textual form of `raw`: absolute, with `.` and `..`
/// folded away and native separators. Symlinks are left untouched.
pub fn normalize_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }
    let path = Path::new(trimmed);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| invalid(format!("cannot resolve relative path {trimmed}: {e}")))?
            .join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("path is not valid UTF-8: {trimmed}")))
}

/// Renders a stored path according to the file-display setting.
pub fn display_path(path: &str, mode: FileDisplay) -> String {
    match mode {
        FileDisplay::FullPath => path.to_string(),
        FileDisplay::FileNameOnly => Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string()),
    }
}

/// Lowercased file name of an executable path, tolerant of both separators.
pub fn file_name_lower(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_lowercase()
}

/// Lowercased directory components above an executable path, outermost
/// first. Empty components (from `//` or a leading `/`) are dropped.
pub fn parent_components_lower(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect();
    parts.pop();
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(normalize_path("/usr/./bin/../bin/bash").unwrap(), "/usr/bin/bash");
        assert_eq!(normalize_path("  /bin//sh ").unwrap(), "/bin/sh");
    }

    #[test]
    fn normalize_makes_relative_paths_absolute() {
        let normalized = normalize_path("scripts/run.sh").unwrap();
        assert!(Path::new(&normalized).is_absolute());
        assert!(normalized.ends_with("run.sh"));
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(normalize_path("   ").is_err());
    }

    #[test]
    fn display_respects_mode() {
        assert_eq!(display_path("/opt/x/run.sh", FileDisplay::FullPath), "/opt/x/run.sh");
        assert_eq!(display_path("/opt/x/run.sh", FileDisplay::FileNameOnly), "run.sh");
    }

    #[test]
    fn name_and_parent_handle_both_separators() {
        assert_eq!(file_name_lower("C:\\Program Files\\Git\\bin\\BASH.EXE"), "bash.exe");
        assert_eq!(
            parent_components_lower("C:\\Program Files\\Git\\bin\\bash.exe"),
            vec!["c:", "program files", "git", "bin"]
        );
        assert_eq!(parent_components_lower("/usr//bin/zsh"), vec!["usr", "bin"]);
        assert_eq!(file_name_lower("/usr/bin/zsh"), "zsh");
        assert!(parent_components_lower("zsh").is_empty());
    }

    #[test]
    fn layout_places_stores_under_root() {
        let layout = Layout::new("/data");
        assert!(layout.shells_file().ends_with("Shells/shells.csv"));
        assert!(layout.chain_file("deploy").ends_with("Chains/deploy.csv"));
    }
}
