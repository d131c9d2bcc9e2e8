//! Comma-delimited row files.
//!
//! Every store under the data root is a flat file with one record per line.
//! Each store has a fixed-arity row type implementing [`Row`]; what happens to
//! rows of the wrong shape is decided once by the caller through [`RowPolicy`].
//!
//! Fields containing the delimiter or a quote are written quoted with doubled
//! inner quotes, which keeps the files readable by ordinary CSV tooling.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{io_error, invalid, Result, StoreError};

pub const DELIMITER: char = ',';

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// A record with a fixed number of fields.
pub trait Row: Sized {
    /// Number of fields in a well-formed row.
    const ARITY: usize;

    fn from_fields(fields: Vec<String>) -> Self;

    fn fields(&self) -> Vec<&str>;
}

/// What to do with a row whose field count differs from [`Row::ARITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPolicy {
    /// Drop the row and keep going.
    Skip,
    /// Fail with [`StoreError::Parse`].
    Strict,
}

/// Splits one line into fields, honouring double-quoted fields.
pub fn split_fields(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut quoted = false;

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
            }
            '"' => return Err("unexpected quote inside unquoted field".to_string()),
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                quoted = false;
            }
            _ if quoted => return Err("characters after closing quote".to_string()),
            _ => field.push(ch),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

/// Joins fields into one line (without line ending).
pub fn join_fields(fields: &[&str]) -> String {
    if let [only] = fields {
        if only.is_empty() {
            return "\"\"".to_string();
        }
    }
    fields
        .iter()
        .map(|field| quote_field(field))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}

fn quote_field(field: &str) -> String {
    if field.contains(DELIMITER) || field.contains('"') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Rejects values that cannot be stored in a single-line field.
pub fn check_field(label: &str, value: &str) -> Result<()> {
    if value.contains('\n') || value.contains('\r') {
        return Err(invalid(format!("{label} must not contain a line break")));
    }
    Ok(())
}

pub fn parse_rows<R: Row>(path: &Path, text: &str, policy: RowPolicy) -> Result<Vec<R>> {
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields = match split_fields(line) {
            Ok(fields) if fields.len() == R::ARITY => fields,
            Ok(fields) => {
                let reason = format!("expected {} fields, found {}", R::ARITY, fields.len());
                reject(path, idx + 1, reason, policy)?;
                continue;
            }
            Err(reason) => {
                reject(path, idx + 1, reason, policy)?;
                continue;
            }
        };
        rows.push(R::from_fields(fields));
    }
    Ok(rows)
}

fn reject(path: &Path, line: usize, reason: String, policy: RowPolicy) -> Result<()> {
    match policy {
        RowPolicy::Skip => {
            tracing::warn!(path = %path.display(), line, %reason, "skipping malformed row");
            Ok(())
        }
        RowPolicy::Strict => Err(StoreError::Parse {
            path: path.to_path_buf(),
            line,
            reason,
        }),
    }
}

pub fn read_rows<R: Row>(path: &Path, policy: RowPolicy) -> Result<Vec<R>> {
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    parse_rows(path, &text, policy)
}

pub fn render_rows<R: Row>(rows: &[R]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&join_fields(&row.fields()));
        out.push_str(LINE_ENDING);
    }
    out
}

/// Appends a single row, creating the file if needed.
pub fn append_row<R: Row>(path: &Path, row: &R) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = join_fields(&row.fields());
    line.push_str(LINE_ENDING);
    file.write_all(line.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pair(String, String);

    impl Row for Pair {
        const ARITY: usize = 2;

        fn from_fields(mut fields: Vec<String>) -> Self {
            let second = fields.pop().unwrap_or_default();
            let first = fields.pop().unwrap_or_default();
            Pair(first, second)
        }

        fn fields(&self) -> Vec<&str> {
            vec![self.0.as_str(), self.1.as_str()]
        }
    }

    #[test]
    fn splits_plain_and_quoted_fields() {
        assert_eq!(split_fields("a,b").unwrap(), vec!["a", "b"]);
        assert_eq!(split_fields("a,").unwrap(), vec!["a", ""]);
        assert_eq!(
            split_fields("\"C:\\a,b\\x.sh\",\"say \"\"hi\"\"\"").unwrap(),
            vec!["C:\\a,b\\x.sh", "say \"hi\""]
        );
        assert!(split_fields("\"open").is_err());
        assert!(split_fields("\"a\"b").is_err());
    }

    #[test]
    fn join_quotes_only_when_needed() {
        assert_eq!(join_fields(&["/bin/bash", "/tmp/a.sh"]), "/bin/bash,/tmp/a.sh");
        assert_eq!(join_fields(&["a,b", "c"]), "\"a,b\",c");
        assert_eq!(join_fields(&[""]), "\"\"");
        let line = join_fields(&["x\"y", "z"]);
        assert_eq!(split_fields(&line).unwrap(), vec!["x\"y", "z"]);
    }

    #[test]
    fn skip_policy_drops_wrong_arity_rows() {
        let text = "a,b\nonly\n\nc,d,e\r\ne,f\r\n";
        let rows: Vec<Pair> = parse_rows(Path::new("t.csv"), text, RowPolicy::Skip).unwrap();
        assert_eq!(
            rows,
            vec![
                Pair("a".into(), "b".into()),
                Pair("e".into(), "f".into())
            ]
        );
    }

    #[test]
    fn strict_policy_reports_line_number() {
        let text = "a,b\nonly\n";
        let err = parse_rows::<Pair>(Path::new("t.csv"), text, RowPolicy::Strict).unwrap_err();
        match err {
            StoreError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn append_creates_and_extends_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        append_row(&path, &Pair("a".into(), "b".into())).unwrap();
        append_row(&path, &Pair("c".into(), "d".into())).unwrap();
        let rows: Vec<Pair> = read_rows(&path, RowPolicy::Strict).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], Pair("c".into(), "d".into()));
    }

    #[test]
    fn check_field_rejects_line_breaks() {
        assert!(check_field("identity", "Bash").is_ok());
        assert!(check_field("identity", "Ba\nsh").is_err());
    }
}
