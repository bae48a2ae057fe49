// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The seam between the registry / job manager and the print spooler.
//
// `IppSpooler` talks to a CUPS scheduler over IPP; `MemorySpooler` keeps
// everything in process for tests.  Driver lookup is a separate seam
// (`DriverCatalog`) because the set of installable PPDs lives outside the
// spooler's own queue database.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use spoolwerk_core::error::Result;
use spoolwerk_core::types::{Destination, DriverEntry, JobRecord, PrinterOption};

/// Where a new destination's driver comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Driver {
    /// A PPD file on local disk, uploaded with the destination.
    File(PathBuf),
    /// A driver the spooler already knows by its ppd-name.
    Catalog(String),
}

/// Everything the spooler needs to create a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSpec {
    pub name: String,
    pub uri: String,
    pub driver: Driver,
    pub description: Option<String>,
    pub location: Option<String>,
}

/// A document submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub dest: String,
    pub title: String,
    pub files: Vec<PathBuf>,
    pub options: Vec<PrinterOption>,
    pub user: String,
}

/// What the spooler hands back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub jid: i32,
    pub user: String,
    pub submitted_at: DateTime<Utc>,
    pub size: u64,
}

/// Print spooler operations used by the registry and the job manager.
///
/// Implementations must be safe to share across tasks.  Operations on an
/// unknown destination or job return `SpoolwerkError::NotFound`.
#[async_trait]
pub trait Spooler: Send + Sync {
    /// Every installed destination.
    async fn destinations(&self) -> Result<Vec<Destination>>;

    /// Create a destination.  It is left disabled and rejecting jobs.
    async fn add_destination(&self, spec: DestinationSpec) -> Result<()>;

    async fn remove_destination(&self, name: &str) -> Result<()>;

    /// Enable (resume + accept) or disable (pause + reject) a destination.
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()>;

    /// The destination's stored default options.
    async fn default_options(&self, name: &str) -> Result<Vec<PrinterOption>>;

    /// Replace the destination's stored default options.
    async fn set_default_options(&self, name: &str, options: &[PrinterOption]) -> Result<()>;

    /// Path of the destination's installed PPD file.
    async fn ppd_path(&self, name: &str) -> Result<PathBuf>;

    /// Tell the spooler the PPD at `path` changed so it re-reads it.
    async fn reload_ppd(&self, name: &str, path: &Path) -> Result<()>;

    async fn submit_job(&self, request: JobRequest) -> Result<JobTicket>;

    /// Jobs on `dest` (all destinations when `None`), oldest first.
    async fn jobs(&self, dest: Option<&str>, include_completed: bool) -> Result<Vec<JobRecord>>;

    /// Current record of a job, `None` once the spooler has forgotten it.
    async fn job(&self, jid: i32) -> Result<Option<JobRecord>>;

    async fn hold_job(&self, jid: i32) -> Result<()>;

    async fn release_job(&self, jid: i32) -> Result<()>;

    async fn cancel_job(&self, jid: i32) -> Result<()>;
}

/// Source of installable drivers.
#[async_trait]
pub trait DriverCatalog: Send + Sync {
    async fn entries(&self) -> Result<Vec<DriverEntry>>;
}

/// Drivers matching `model`.
///
/// Exact (case-insensitive) make-and-model or ppd-name matches come first,
/// followed by entries whose make-and-model or ppd-name contains `model`.
/// Within each group the catalog order is kept.
pub fn match_model(entries: Vec<DriverEntry>, model: &str) -> Vec<DriverEntry> {
    let needle = model.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let (exact, rest): (Vec<_>, Vec<_>) = entries.into_iter().partition(|entry| {
        entry.make_and_model.to_lowercase() == needle || entry.ppd_name.to_lowercase() == needle
    });
    let partial = rest.into_iter().filter(|entry| {
        entry.make_and_model.to_lowercase().contains(&needle)
            || entry.ppd_name.to_lowercase().contains(&needle)
    });

    exact.into_iter().chain(partial).collect()
}
