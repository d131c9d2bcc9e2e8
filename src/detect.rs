//! Shell identity detection.
//!
//! Identification runs in three stages, first match wins:
//!
//! 1. Directory hints that are more specific than the executable name
//!    (a `bash`/`sh` under a Cygwin or Git install).
//! 2. The executable's file name against a fixed table of known shells.
//! 3. Directory fallbacks (MSYS2, MinGW, WSL).
//!
//! Directory hints compare whole path components, so `/home/bridgit/bin/bash`
//! is plain Bash.
//!
//! If nothing matches, the executable is probed with `--version` and the first
//! line of its output becomes the identity. The probe is bounded by a timeout.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;

use crate::paths::{file_name_lower, parent_components_lower};

pub const UNKNOWN_SHELL: &str = "Unknown shell";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3000);

const KNOWN_SHELLS: &[(&str, &str)] = &[
    ("bash", "Bash"),
    ("bash.exe", "Bash"),
    ("sh", "Bourne Shell"),
    ("sh.exe", "Bourne Shell"),
    ("zsh", "Z Shell"),
    ("zsh.exe", "Z Shell"),
    ("fish", "Fish"),
    ("fish.exe", "Fish"),
    ("ksh", "Korn Shell"),
    ("mksh", "MirBSD Korn Shell"),
    ("csh", "C Shell"),
    ("tcsh", "TENEX C Shell"),
    ("dash", "Debian Almquist Shell"),
    ("ash", "Almquist Shell"),
    ("nu", "Nushell"),
    ("nu.exe", "Nushell"),
    ("elvish", "Elvish"),
    ("xonsh", "Xonsh"),
    ("pwsh", "PowerShell"),
    ("pwsh.exe", "PowerShell"),
    ("powershell", "Windows PowerShell"),
    ("powershell.exe", "Windows PowerShell"),
    ("cmd.exe", "Command Prompt"),
    ("wsl.exe", "WSL"),
    ("python", "Python"),
    ("python3", "Python"),
    ("python.exe", "Python"),
    ("node", "Node.js"),
    ("perl", "Perl"),
    ("ruby", "Ruby"),
];

fn known_shells() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| KNOWN_SHELLS.iter().copied().collect())
}

/// Classifies `path` by name and directory alone, without running anything.
pub fn classify(path: &str) -> Option<&'static str> {
    let name = file_name_lower(path);
    let stem = name.strip_suffix(".exe").unwrap_or(&name);
    let parents = parent_components_lower(path);
    let under = |is_match: fn(&str) -> bool| parents.iter().any(|dir| is_match(dir));
    let bourne = matches!(stem, "bash" | "sh");

    if bourne && under(|dir| dir.starts_with("cygwin")) {
        return Some("Cygwin Bash");
    }
    if bourne && under(|dir| matches!(dir, "git" | "portablegit") || dir.starts_with("git-")) {
        return Some("Git Bash");
    }

    if let Some(identity) = known_shells().get(name.as_str()) {
        return Some(*identity);
    }

    if under(|dir| dir.starts_with("msys")) {
        return Some("MSYS2 Shell");
    }
    if under(|dir| dir.starts_with("mingw")) {
        return Some("MinGW Shell");
    }
    if under(|dir| dir.starts_with("wsl")) || stem == "wsl" {
        return Some("WSL");
    }
    None
}

/// Returns a human-readable identity for the shell at `path`.
pub async fn detect_shell(path: &str, timeout: Duration) -> String {
    match classify(path) {
        Some(identity) => identity.to_string(),
        None => probe_version(path, timeout).await,
    }
}

/// Runs `<path> --version` and returns the first non-empty output line.
pub async fn probe_version(path: &str, timeout: Duration) -> String {
    let mut command = Command::new(path);
    command
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return format!("Error identifying shell: {}", err),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            tracing::warn!(path, timeout_ms = timeout.as_millis() as u64, "version probe timed out");
            UNKNOWN_SHELL.to_string()
        }
        Ok(Err(err)) => format!("Error identifying shell: {}", err),
        Ok(Ok(output)) => first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or_else(|| UNKNOWN_SHELL.to_string()),
    }
}

fn first_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_by_name() {
        assert_eq!(classify("/usr/bin/bash"), Some("Bash"));
        assert_eq!(classify("/bin/zsh"), Some("Z Shell"));
        assert_eq!(classify("/bin/sh"), Some("Bourne Shell"));
        assert_eq!(
            classify("C:\\Windows\\System32\\WindowsPowerShell\\v1.0\\PowerShell.exe"),
            Some("Windows PowerShell")
        );
        assert_eq!(classify("C:\\Windows\\System32\\cmd.exe"), Some("Command Prompt"));
    }

    #[test]
    fn git_directory_hint_wins_for_bash() {
        assert_eq!(
            classify("C:\\Program Files\\Git\\bin\\bash.exe"),
            Some("Git Bash")
        );
    }

    #[test]
    fn cygwin_hint_takes_precedence_over_table() {
        assert_eq!(classify("/opt/cygwin/bin/sh"), Some("Cygwin Bash"));
        assert_eq!(classify("C:\\cygwin64\\bin\\bash.exe"), Some("Cygwin Bash"));
    }

    #[test]
    fn directory_fallbacks_after_table() {
        assert_eq!(classify("C:\\msys64\\usr\\bin\\mintty.exe"), Some("MSYS2 Shell"));
        assert_eq!(classify("/mnt/wsl/tools/launcher"), Some("WSL"));
        // Name match beats the directory fallback.
        assert_eq!(classify("C:\\msys64\\usr\\bin\\zsh.exe"), Some("Z Shell"));
    }

    #[test]
    fn hints_match_whole_directory_names() {
        assert_eq!(classify("/home/bridgit/bin/bash"), Some("Bash"));
        assert_eq!(classify("/srv/github-mirror/bin/sh"), Some("Bourne Shell"));
        assert_eq!(classify("/tmp/.tmpgitcyg/bin/bash"), Some("Bash"));
        assert_eq!(classify("D:\\Tools\\PortableGit\\usr\\bin\\bash.exe"), Some("Git Bash"));
        assert_eq!(classify("/home/newsletter/tools/launcher"), None);
    }

    #[test]
    fn unknown_names_are_unclassified() {
        assert_eq!(classify("/opt/tools/frobnicate"), None);
    }

    #[test]
    fn first_line_skips_blank_lines() {
        assert_eq!(first_line(b"\n  \nGNU bash 5.2\nmore"), Some("GNU bash 5.2".to_string()));
        assert_eq!(first_line(b"   \n"), None);
    }

    #[tokio::test]
    async fn probe_failure_is_reported_as_identity() {
        let identity = probe_version("/definitely/not/a/shell", Duration::from_secs(1)).await;
        assert!(identity.starts_with("Error identifying shell:"), "{identity}");
    }

    #[cfg(unix)]
    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_uses_first_output_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "frob", "#!/bin/sh\necho 'FrobShell 1.2'\necho extra\n");
        assert_eq!(detect_shell(&path, Duration::from_secs(5)).await, "FrobShell 1.2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probe_timeout_maps_to_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), "slow", "#!/bin/sh\nsleep 5\n");
        assert_eq!(probe_version(&path, Duration::from_millis(100)).await, UNKNOWN_SHELL);
    }
}
