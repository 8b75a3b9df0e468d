//! File-backed host-list store.
//!
//! Host lists are plain newline-separated files under `<data_dir>/hosts/`,
//! which doubles as the mpirun hostfile directory -- the launcher reads
//! the same file the API edits. A `default` list is created on first use.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

const DEFAULT_LIST: &str = "default";

/// One stored list, as reported by [`HostListStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct HostListEntry {
    pub name: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct HostListStore {
    dir: PathBuf,
}

impl HostListStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("hosts"),
        }
    }

    /// Create the store directory and an empty `default` list if missing.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create host-list dir: {}", self.dir.display()))?;
        let default = self.dir.join(DEFAULT_LIST);
        if !default.exists() {
            fs::write(&default, "").context("failed to create default host list")?;
        }
        Ok(())
    }

    /// Absolute path of a named list, with the name validated first.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// All stored lists, newest first.
    pub fn list(&self) -> Result<Vec<HostListEntry>> {
        self.ensure()?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).context("failed to read host-list dir")? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            entries.push(HostListEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                modified: meta.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now()),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(entries)
    }

    /// Hosts in a named list: non-empty trimmed lines, in file order.
    /// A missing list reads as empty.
    pub fn read(&self, name: &str) -> Result<Vec<String>> {
        let path = self.path(name)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&path).with_context(|| format!("failed to read host list {name}"))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Replace a named list with the given hosts.
    pub fn write(&self, name: &str, hosts: &[String]) -> Result<()> {
        self.ensure()?;
        let path = self.path(name)?;
        let mut content = hosts
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(&path, content).with_context(|| format!("failed to write host list {name}"))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path(name)?;
        fs::remove_file(&path).with_context(|| format!("failed to delete host list {name}"))
    }
}

/// Reject anything that could escape the store directory.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        bail!("invalid host list name: {name:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, HostListStore) {
        let dir = TempDir::new().unwrap();
        let store = HostListStore::new(dir.path());
        store.ensure().unwrap();
        (dir, store)
    }

    #[test]
    fn ensure_creates_default_list() {
        let (_dir, store) = store();
        assert!(store.read("default").unwrap().is_empty());
        let names: Vec<_> = store.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["default"]);
    }

    #[test]
    fn write_read_round_trip_skips_blank_lines() {
        let (_dir, store) = store();
        store
            .write(
                "cluster-a",
                &[
                    "10.0.0.1".to_string(),
                    "  ".to_string(),
                    "10.0.0.2".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(store.read("cluster-a").unwrap(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn missing_list_reads_empty() {
        let (_dir, store) = store();
        assert!(store.read("nope").unwrap().is_empty());
    }

    #[test]
    fn delete_removes_list() {
        let (_dir, store) = store();
        store.write("gone", &["10.0.0.1".to_string()]).unwrap();
        store.delete("gone").unwrap();
        assert!(store.read("gone").unwrap().is_empty());
    }

    #[test]
    fn traversal_names_are_rejected() {
        let (_dir, store) = store();
        for bad in ["", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(store.path(bad).is_err(), "accepted {bad:?}");
        }
    }
}
