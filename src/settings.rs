//! Settings store.
//!
//! Each setting is a small self-describing file:
//!
//! ```text
//! # Selected
//! <current value>
//! # Options
//! <option 1>
//! ...
//! ```
//!
//! The options block doubles as a schema: it must match the compiled-in list
//! exactly, which catches stale or hand-edited files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_error, invalid, Result, StoreError};
use crate::paths::Layout;
use crate::rows::LINE_ENDING;
use crate::txn::atomic_write_file;

pub const SELECTED_TAG: &str = "# Selected";
pub const OPTIONS_TAG: &str = "# Options";

/// A setting with a fixed, ordered list of allowed values.
pub trait SettingOption: Copy + Sized {
    /// File name under the settings directory.
    const FILE_NAME: &'static str;
    /// Key used on the command line.
    const KEY: &'static str;
    /// Allowed values, default first.
    const OPTIONS: &'static [&'static str];

    fn from_label(label: &str) -> Option<Self>;

    fn label(self) -> &'static str;

    fn default_value() -> Self;
}

/// How paths are rendered in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisplay {
    FullPath,
    FileNameOnly,
}

impl SettingOption for FileDisplay {
    const FILE_NAME: &'static str = "file_display.csv";
    const KEY: &'static str = "file-display";
    const OPTIONS: &'static [&'static str] = &["Full path", "File name only"];

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Full path" => Some(Self::FullPath),
            "File name only" => Some(Self::FileNameOnly),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::FullPath => "Full path",
            Self::FileNameOnly => "File name only",
        }
    }

    fn default_value() -> Self {
        Self::FullPath
    }
}

/// Whether the host exits after running a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    Never,
    Always,
    AfterSuccessOnly,
    AfterFailureOnly,
}

impl ExitPolicy {
    pub fn exits_after_success(self) -> bool {
        matches!(self, Self::Always | Self::AfterSuccessOnly)
    }

    pub fn exits_after_failure(self) -> bool {
        matches!(self, Self::Always | Self::AfterFailureOnly)
    }
}

impl SettingOption for ExitPolicy {
    const FILE_NAME: &'static str = "exit_after_execution.csv";
    const KEY: &'static str = "exit-after-execution";
    const OPTIONS: &'static [&'static str] = &[
        "Never",
        "Always",
        "After success only",
        "After failure only",
    ];

    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Never" => Some(Self::Never),
            "Always" => Some(Self::Always),
            "After success only" => Some(Self::AfterSuccessOnly),
            "After failure only" => Some(Self::AfterFailureOnly),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Never => "Never",
            Self::Always => "Always",
            Self::AfterSuccessOnly => "After success only",
            Self::AfterFailureOnly => "After failure only",
        }
    }

    fn default_value() -> Self {
        Self::Never
    }
}

/// Returns the selected value (second line), or `None` if the file is absent
/// or too short. Unexpected read failures are logged and also yield `None`.
pub fn read_setting(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) => text.lines().nth(1).map(|line| line.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read setting");
            None
        }
    }
}

/// Replaces the selected-value line, padding a short file with blank lines.
pub fn write_setting(path: &Path, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(invalid("setting value must not contain a line break"));
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_error(path, err)),
    };
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    while lines.len() < 2 {
        lines.push(String::new());
    }
    lines[1] = value.to_string();

    let mut out = lines.join(LINE_ENDING);
    out.push_str(LINE_ENDING);
    atomic_write_file(path, out.as_bytes()).map_err(|e| io_error(path, e))?;
    tracing::debug!(path = %path.display(), value, "setting written");
    Ok(())
}

/// Checks the tagged layout and that the options block equals `allowed`.
pub fn validate_settings_file(path: &Path, allowed: &[&str]) -> Result<()> {
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let lines: Vec<&str> = text.lines().collect();
    let fail = |reason: String| StoreError::Schema {
        path: path.to_path_buf(),
        reason,
    };

    if lines.len() != allowed.len() + 3 {
        return Err(fail(format!(
            "expected {} lines, found {}",
            allowed.len() + 3,
            lines.len()
        )));
    }
    if lines[0] != SELECTED_TAG {
        return Err(fail(format!("line 1 must be `{SELECTED_TAG}`")));
    }
    if !allowed.contains(&lines[1]) {
        return Err(fail(format!("selected value `{}` is not an option", lines[1])));
    }
    if lines[2] != OPTIONS_TAG {
        return Err(fail(format!("line 3 must be `{OPTIONS_TAG}`")));
    }
    if lines[3..] != *allowed {
        return Err(fail("options block does not match the known options".to_string()));
    }
    Ok(())
}

/// Contents of a freshly initialised settings file.
pub fn render_settings_file(selected: &str, options: &[&str]) -> String {
    let mut out = String::new();
    for line in [SELECTED_TAG, selected, OPTIONS_TAG]
        .into_iter()
        .chain(options.iter().copied())
    {
        out.push_str(line);
        out.push_str(LINE_ENDING);
    }
    out
}

/// Typed access to the settings directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    layout: Layout,
}

impl SettingsStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn path_of<T: SettingOption>(&self) -> PathBuf {
        self.layout.setting_file(T::FILE_NAME)
    }

    /// Current value, falling back to the default when missing or unknown.
    pub fn get<T: SettingOption>(&self) -> T {
        let path = self.path_of::<T>();
        match read_setting(&path) {
            Some(label) => T::from_label(&label).unwrap_or_else(|| {
                tracing::warn!(path = %path.display(), %label, "unknown setting value, using default");
                T::default_value()
            }),
            None => T::default_value(),
        }
    }

    pub fn set<T: SettingOption>(&self, value: T) -> Result<()> {
        write_setting(&self.path_of::<T>(), value.label())
    }

    /// Sets a setting from its command-line key and option label.
    pub fn set_by_key(&self, key: &str, label: &str) -> Result<()> {
        if key == FileDisplay::KEY {
            self.set(parse_label::<FileDisplay>(label)?)
        } else if key == ExitPolicy::KEY {
            self.set(parse_label::<ExitPolicy>(label)?)
        } else {
            Err(invalid(format!(
                "unknown setting `{key}` (expected {} or {})",
                FileDisplay::KEY,
                ExitPolicy::KEY
            )))
        }
    }

    /// Writes the default file for `T` unless one already exists.
    pub fn ensure<T: SettingOption>(&self) -> Result<bool> {
        let path = self.path_of::<T>();
        if path.exists() {
            return Ok(false);
        }
        let contents = render_settings_file(T::default_value().label(), T::OPTIONS);
        atomic_write_file(&path, contents.as_bytes()).map_err(|e| io_error(&path, e))?;
        Ok(true)
    }
}

fn parse_label<T: SettingOption>(label: &str) -> Result<T> {
    T::from_label(label).ok_or_else(|| {
        invalid(format!(
            "`{label}` is not a valid {} option (expected one of: {})",
            T::KEY,
            T::OPTIONS.join(", ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(dir: &Path, name: &str, options: &[&str]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, render_settings_file(options[0], options)).unwrap();
        path
    }

    #[test]
    fn read_returns_second_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = fresh(dir.path(), "a.csv", FileDisplay::OPTIONS);
        assert_eq!(read_setting(&path).as_deref(), Some("Full path"));
    }

    #[test]
    fn read_missing_or_short_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_setting(&dir.path().join("nope.csv")), None);
        let short = dir.path().join("short.csv");
        fs::write(&short, "# Selected\n").unwrap();
        assert_eq!(read_setting(&short), None);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = fresh(dir.path(), "e.csv", ExitPolicy::OPTIONS);
        write_setting(&path, "After success only").unwrap();
        assert_eq!(read_setting(&path).as_deref(), Some("After success only"));
        validate_settings_file(&path, ExitPolicy::OPTIONS).unwrap();
    }

    #[test]
    fn write_pads_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pad.csv");
        fs::write(&path, "").unwrap();
        write_setting(&path, "Always").unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["", "Always"]);
    }

    #[test]
    fn write_rejects_line_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = fresh(dir.path(), "x.csv", FileDisplay::OPTIONS);
        assert!(write_setting(&path, "a\nb").is_err());
    }

    #[test]
    fn validate_accepts_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = fresh(dir.path(), "f.csv", FileDisplay::OPTIONS);
        validate_settings_file(&path, FileDisplay::OPTIONS).unwrap();
    }

    #[test]
    fn validate_rejects_shuffled_and_truncated_options() {
        let dir = tempfile::tempdir().unwrap();
        let shuffled = dir.path().join("s.csv");
        fs::write(
            &shuffled,
            "# Selected\nNever\n# Options\nAlways\nNever\nAfter success only\nAfter failure only\n",
        )
        .unwrap();
        assert!(matches!(
            validate_settings_file(&shuffled, ExitPolicy::OPTIONS),
            Err(StoreError::Schema { .. })
        ));

        let truncated = dir.path().join("t.csv");
        fs::write(&truncated, "# Selected\nNever\n# Options\nNever\nAlways\n").unwrap();
        assert!(validate_settings_file(&truncated, ExitPolicy::OPTIONS).is_err());
    }

    #[test]
    fn validate_rejects_unknown_selection_and_bad_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.csv");
        fs::write(&path, "# Selected\nSometimes\n# Options\nFull path\nFile name only\n").unwrap();
        assert!(validate_settings_file(&path, FileDisplay::OPTIONS).is_err());
        fs::write(&path, "Selected\nFull path\n# Options\nFull path\nFile name only\n").unwrap();
        assert!(validate_settings_file(&path, FileDisplay::OPTIONS).is_err());
    }

    #[test]
    fn store_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Settings")).unwrap();
        let store = SettingsStore::new(Layout::new(dir.path()));
        assert_eq!(store.get::<ExitPolicy>(), ExitPolicy::Never);

        assert!(store.ensure::<ExitPolicy>().unwrap());
        assert!(!store.ensure::<ExitPolicy>().unwrap());
        store.set_by_key("exit-after-execution", "Always").unwrap();
        assert_eq!(store.get::<ExitPolicy>(), ExitPolicy::Always);
        validate_settings_file(&store.path_of::<ExitPolicy>(), ExitPolicy::OPTIONS).unwrap();

        assert!(store.set_by_key("exit-after-execution", "Sometimes").is_err());
        assert!(store.set_by_key("colour", "Full path").is_err());
    }

    #[test]
    fn policy_gates() {
        assert!(ExitPolicy::Always.exits_after_success());
        assert!(ExitPolicy::Always.exits_after_failure());
        assert!(!ExitPolicy::AfterSuccessOnly.exits_after_failure());
        assert!(!ExitPolicy::Never.exits_after_success());
    }
}
