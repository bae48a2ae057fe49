// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Spoolwerk printer manager.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolwerkError};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// A single `key=value` option in lpoptions syntax (e.g. `Duplex=None`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrinterOption {
    pub key: String,
    pub value: String,
}

impl PrinterOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for PrinterOption {
    type Err = SpoolwerkError;

    fn from_str(s: &str) -> Result<Self> {
        let syntax_error = || SpoolwerkError::OptionSyntaxError(s.to_string());
        let (key, value) = s.split_once('=').ok_or_else(syntax_error)?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(syntax_error());
        }
        Ok(Self::new(key, value))
    }
}

impl std::fmt::Display for PrinterOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// One selectable value of a driver option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChoice {
    /// Machine keyword (e.g. `DuplexNoTumble`).
    pub keyword: String,
    /// Human-readable label, falling back to the keyword.
    pub text: String,
}

/// An option declared by a driver file, with its allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    /// Option keyword (e.g. `Duplex`).
    pub keyword: String,
    /// Human-readable label.
    pub text: String,
    pub choices: Vec<OptionChoice>,
    /// Value of the matching `*Default<Keyword>` directive, if declared.
    pub default: Option<String>,
}

/// A driver file known to the driver catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEntry {
    /// Identifier the spooler knows the driver by (`ppd-name`).
    pub ppd_name: String,
    /// `*NickName` / `*ModelName` of the driver.
    pub make_and_model: String,
    /// Local copy of the driver file, when the catalog has one on disk.
    pub path: Option<PathBuf>,
    /// Declared option schema, in file order.
    pub options: Vec<OptionDescriptor>,
}

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

/// Printer state as reported by the spooler (RFC 8011 §5.4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
    Unknown,
}

impl PrinterState {
    /// Map an IPP `printer-state` enum value.
    pub fn from_ipp(value: i32) -> Self {
        match value {
            3 => Self::Idle,
            4 => Self::Processing,
            5 => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Numeric IPP value (0 when unknown).
    pub fn code(&self) -> i32 {
        match self {
            Self::Idle => 3,
            Self::Processing => 4,
            Self::Stopped => 5,
            Self::Unknown => 0,
        }
    }
}

/// A destination as the spooler currently sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub name: String,
    /// Device URI the destination sends jobs to.
    pub uri: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub make_and_model: Option<String>,
    pub state: PrinterState,
    pub state_message: String,
    pub accepting_jobs: bool,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Lifecycle states of a print job.
///
/// `Created → Submitted → {Held, Printing} → {Completed, Canceled, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Built locally, files may still be attached.
    Created,
    /// Accepted by the spooler, waiting to print.
    Submitted,
    /// Held until released with `start`.
    Held,
    /// Being processed by the printer.
    Printing,
    Completed,
    Canceled,
    /// Aborted by the spooler.
    Error,
}

impl JobState {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Error)
    }

    /// Map an IPP `job-state` enum value (RFC 8011 §5.3.7).
    pub fn from_ipp(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Submitted),
            4 => Some(Self::Held),
            // stopped: the printer paused mid-job, the job is still active
            5 | 6 => Some(Self::Printing),
            7 => Some(Self::Canceled),
            8 => Some(Self::Error),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Numeric status code (IPP `job-state`; 0 before submission).
    pub fn code(&self) -> i32 {
        match self {
            Self::Created => 0,
            Self::Submitted => 3,
            Self::Held => 4,
            Self::Printing => 5,
            Self::Canceled => 7,
            Self::Error => 8,
            Self::Completed => 9,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Submitted => "submitted",
            Self::Held => "held",
            Self::Printing => "printing",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// A job as reported by the spooler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub jid: i32,
    pub name: String,
    /// Destination name.
    pub dest: String,
    pub user: String,
    /// Size in bytes.
    pub size: u64,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
    /// `job-state-message`, or the state reasons when no message is set.
    pub state_message: String,
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Current version of the serialized record schema.
pub const SCHEMA_VERSION: u32 = 1;

/// Envelope for records persisted across process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
    pub version: u32,
    pub record: T,
}

impl<T> VersionedRecord<T> {
    pub fn new(record: T) -> Self {
        Self {
            version: SCHEMA_VERSION,
            record,
        }
    }

    /// Unwrap the record, rejecting envelopes written by a newer schema.
    pub fn into_current(self) -> Result<T> {
        if self.version > SCHEMA_VERSION {
            return Err(SpoolwerkError::IoFailure {
                context: "record schema".into(),
                message: format!(
                    "version {} is newer than supported version {SCHEMA_VERSION}",
                    self.version
                ),
            });
        }
        Ok(self.record)
    }
}
