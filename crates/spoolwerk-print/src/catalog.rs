// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Driver catalog backed by directories of PPD files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::DriverEntry;

use crate::ppd;
use crate::spooler::DriverCatalog;

/// Scans driver directories for `.ppd` files.
///
/// The ppd-name of an entry is its path relative to the directory it was
/// found in.  When two directories hold the same ppd-name the earlier
/// directory wins.  Compressed (`.ppd.gz`) drivers are not read.
#[derive(Debug, Clone)]
pub struct PpdDirectoryCatalog {
    dirs: Vec<PathBuf>,
}

impl PpdDirectoryCatalog {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

#[async_trait]
impl DriverCatalog for PpdDirectoryCatalog {
    async fn entries(&self) -> Result<Vec<DriverEntry>> {
        let dirs = self.dirs.clone();
        tokio::task::spawn_blocking(move || scan(&dirs))
            .await
            .map_err(|e| SpoolwerkError::io_failure("driver scan task", e))
    }
}

fn scan(dirs: &[PathBuf]) -> Vec<DriverEntry> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for root in dirs {
        let mut files = Vec::new();
        walk(root, &mut files);
        files.sort();

        for path in files {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let ppd_name = relative.to_string_lossy().replace('\\', "/");
            if !seen.insert(ppd_name.clone()) {
                continue;
            }
            match read_entry(&path, ppd_name) {
                Some(entry) => entries.push(entry),
                None => warn!(path = %path.display(), "skipping unreadable PPD"),
            }
        }
    }

    debug!(count = entries.len(), "driver catalog scanned");
    entries
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(read) = std::fs::read_dir(dir) else {
        debug!(dir = %dir.display(), "driver directory not readable");
        return;
    };
    for entry in read.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ppd"))
        {
            out.push(path);
        }
    }
}

fn read_entry(path: &Path, ppd_name: String) -> Option<DriverEntry> {
    let bytes = std::fs::read(path).ok()?;
    let (text, _) = ppd::decode(&bytes);
    if !text.starts_with("*PPD-Adobe") {
        return None;
    }
    let make_and_model = ppd::model_name(&text).unwrap_or_else(|| ppd_name.clone());
    Some(DriverEntry {
        ppd_name,
        make_and_model,
        path: Some(path.to_path_buf()),
        options: ppd::parse_options(&text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ppd(path: &Path, nickname: &str) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let text = format!(
            "*PPD-Adobe: \"4.3\"\n*NickName: \"{nickname}\"\n\
             *OpenUI *Duplex/Duplex: PickOne\n*DefaultDuplex: None\n\
             *Duplex None/Off: \"\"\n*CloseUI: *Duplex\n"
        );
        std::fs::write(path, text).expect("write");
    }

    #[tokio::test]
    async fn scans_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_ppd(&dir.path().join("acme/lw9000.ppd"), "Acme LaserWriter 9000");
        write_ppd(&dir.path().join("generic.PPD"), "Generic PostScript");
        std::fs::write(dir.path().join("readme.txt"), "not a driver").expect("write");
        std::fs::write(dir.path().join("broken.ppd"), "garbage").expect("write");

        let catalog = PpdDirectoryCatalog::new(vec![dir.path().to_path_buf()]);
        let entries = catalog.entries().await.expect("entries");
        let names: Vec<&str> = entries.iter().map(|e| e.ppd_name.as_str()).collect();
        assert_eq!(names, ["acme/lw9000.ppd", "generic.PPD"]);
        assert_eq!(entries[0].make_and_model, "Acme LaserWriter 9000");
        assert_eq!(entries[0].options[0].keyword, "Duplex");
        assert!(entries[0].path.as_ref().is_some_and(|p| p.is_file()));
    }

    #[tokio::test]
    async fn earlier_directory_shadows_later() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        write_ppd(&first.path().join("x.ppd"), "First");
        write_ppd(&second.path().join("x.ppd"), "Second");

        let catalog = PpdDirectoryCatalog::new(vec![
            first.path().to_path_buf(),
            PathBuf::from("/nonexistent/driver/dir"),
            second.path().to_path_buf(),
        ]);
        let entries = catalog.entries().await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].make_and_model, "First");
    }
}
