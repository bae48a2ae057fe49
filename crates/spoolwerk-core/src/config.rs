// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings for connecting to the spooler and locating driver files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolwerkConfig {
    /// Base URI of the CUPS scheduler (default `ipp://localhost:631`).
    pub server_uri: String,
    /// Directory where the scheduler keeps one PPD per destination.
    pub ppd_dir: PathBuf,
    /// Directories scanned by the driver catalog for `.ppd` files.
    pub driver_dirs: Vec<PathBuf>,
    /// Client-side default option store (`lpoptions` format).
    pub lpoptions_path: PathBuf,
    /// Name sent as `requesting-user-name` on every request.
    pub requesting_user: String,
    /// Interval between status polls of a watched job.
    pub poll_interval_ms: u64,
    /// Consecutive failed polls tolerated before a watcher gives up.
    pub max_poll_failures: u32,
    /// Timeout for downloading a driver from `ppd_url`.
    pub download_timeout_secs: u64,
    /// Accept self-signed certificates on `ipps://` scheduler connections.
    pub ignore_tls_errors: bool,
}

impl Default for SpoolwerkConfig {
    fn default() -> Self {
        Self {
            server_uri: "ipp://localhost:631".into(),
            ppd_dir: PathBuf::from("/etc/cups/ppd"),
            driver_dirs: vec![
                PathBuf::from("/usr/share/cups/model"),
                PathBuf::from("/usr/share/ppd"),
            ],
            lpoptions_path: home_dir().join(".cups").join("lpoptions"),
            requesting_user: std::env::var("USER").unwrap_or_else(|_| "root".into()),
            poll_interval_ms: 1000,
            max_poll_failures: 3,
            download_timeout_secs: 30,
            ignore_tls_errors: false,
        }
    }
}

impl SpoolwerkConfig {
    /// Load settings from a JSON file, falling back to defaults when the file
    /// does not exist.  Fields missing from the file take their default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Write settings to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

fn home_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    // Last resort
    PathBuf::from("/tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SpoolwerkConfig::load(dir.path().join("absent.json")).expect("load");
        assert_eq!(config, SpoolwerkConfig::default());
        assert_eq!(config.server_uri, "ipp://localhost:631");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerk.json");
        std::fs::write(&path, r#"{ "poll_interval_ms": 250 }"#).expect("write");

        let config = SpoolwerkConfig::load(&path).expect("load");
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_poll_failures, 3);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerk.json");
        let config = SpoolwerkConfig {
            server_uri: "ipps://print.example.org".into(),
            ..Default::default()
        };
        config.save(&path).expect("save");
        assert_eq!(SpoolwerkConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("spoolwerk.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(SpoolwerkConfig::load(&path).is_err());
    }
}
