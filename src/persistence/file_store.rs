//! Log store backed by flat text files.
//!
//! Layout under the root directory:
//! - `logs/<topic>.txt` for `Keyspace::Topics`
//! - `subscriptions/<user>.txt` for `Keyspace::Subscriptions`
//!
//! One entry per line. Backslashes and line breaks inside an entry are
//! escaped so that multi-line messages survive a round trip.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{Keyspace, LogStore, validate_name};
use crate::utils::Result;

const EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, keyspace: Keyspace) -> PathBuf {
        match keyspace {
            Keyspace::Topics => self.root.join("logs"),
            Keyspace::Subscriptions => self.root.join("subscriptions"),
        }
    }

    fn file(&self, keyspace: Keyspace, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir(keyspace).join(format!("{name}.{EXTENSION}")))
    }
}

fn escape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().map(unescape).collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

impl LogStore for FileLogStore {
    fn append(&self, keyspace: Keyspace, name: &str, line: &str) -> Result<()> {
        let path = self.file(keyspace, name)?;
        fs::create_dir_all(self.dir(keyspace))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", escape(line))?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self, keyspace: Keyspace, name: &str) -> Result<Vec<String>> {
        read_lines(&self.file(keyspace, name)?)
    }

    fn list_namespaces(&self, keyspace: Keyspace) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.dir(keyspace)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if fs::metadata(&path)?.len() > 0 {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn replace(&self, keyspace: Keyspace, name: &str, lines: &[String]) -> Result<()> {
        let path = self.file(keyspace, name)?;
        fs::create_dir_all(self.dir(keyspace))?;
        let mut content = String::new();
        for line in lines {
            content.push_str(&escape(line));
            content.push('\n');
        }
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{escape, unescape};

    #[test]
    fn escaping_survives_line_breaks_and_backslashes() {
        let original = "alice: line one\nline two \\n not a break\r";
        let escaped = escape(original);
        assert!(!escaped.contains('\n'));
        assert_eq!(unescape(&escaped), original);
    }
}
