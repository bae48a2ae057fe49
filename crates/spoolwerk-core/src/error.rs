// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolwerk.

use thiserror::Error;

use crate::types::JobState;

/// Top-level error type for all Spoolwerk operations.
///
/// Validation variants are raised before any call to the spooler is made.
/// Variants wrapping a spooler or filesystem failure keep the raw message of
/// the originating subsystem.
#[derive(Debug, Error)]
pub enum SpoolwerkError {
    // -- Validation --
    #[error("invalid printer name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid printer host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("missing required printer field: {0}")]
    MissingField(&'static str),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("option '{0}' is not of the form key=value")]
    OptionSyntaxError(String),

    // -- Registry --
    #[error("a printer named '{0}' is already installed")]
    DuplicateName(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("printer '{0}' not found")]
    PrinterNotFound(String),

    #[error("no usable driver: {0}")]
    DriverUnresolved(String),

    #[error("registering printer '{printer}' failed: {message}")]
    RegistrationFailed { printer: String, message: String },

    #[error("removing printer '{printer}' failed: {message}")]
    RemovalFailed { printer: String, message: String },

    // -- Jobs --
    #[error("no files attached to print job")]
    NoFilesAttached,

    #[error("cannot {action} a job in state {from}")]
    InvalidTransition { from: JobState, action: &'static str },

    #[error("job is already {state}")]
    AlreadyTerminal { state: JobState },

    #[error("job submission failed: {0}")]
    SubmissionFailed(String),

    #[error("job {jid} failed: {message}")]
    JobFailed { jid: i32, message: String },

    // -- External collaborators --
    #[error("spooler error: {0}")]
    Spooler(String),

    #[error("I/O failure ({context}): {message}")]
    IoFailure { context: String, message: String },

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpoolwerkError {
    /// Whether the error reports a missing printer or job.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::PrinterNotFound(_))
    }

    /// Wrap a filesystem error with the path or action it concerned.
    pub fn io_failure(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::IoFailure {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// The underlying message without the variant's prefix.
    ///
    /// Used when one failure is re-wrapped as another (e.g. a spooler error
    /// surfacing as `RegistrationFailed`) so the raw text is kept once.
    pub fn raw_message(&self) -> String {
        match self {
            Self::Spooler(msg)
            | Self::SubmissionFailed(msg)
            | Self::DriverUnresolved(msg)
            | Self::NotFound(msg) => msg.clone(),
            Self::RegistrationFailed { message, .. }
            | Self::RemovalFailed { message, .. }
            | Self::JobFailed { message, .. }
            | Self::IoFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpoolwerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_variants_are_recognised() {
        assert!(SpoolwerkError::NotFound("job 7".into()).is_not_found());
        assert!(SpoolwerkError::PrinterNotFound("lab".into()).is_not_found());
        assert!(!SpoolwerkError::NoFilesAttached.is_not_found());
    }

    #[test]
    fn raw_message_keeps_subsystem_text() {
        let err = SpoolwerkError::Spooler("client-error-not-authorized".into());
        assert_eq!(err.raw_message(), "client-error-not-authorized");

        let wrapped = SpoolwerkError::RegistrationFailed {
            printer: "lab".into(),
            message: err.raw_message(),
        };
        assert_eq!(
            wrapped.to_string(),
            "registering printer 'lab' failed: client-error-not-authorized"
        );
    }

    #[test]
    fn transition_error_names_state_and_action() {
        let err = SpoolwerkError::InvalidTransition {
            from: JobState::Completed,
            action: "hold",
        };
        assert_eq!(err.to_string(), "cannot hold a job in state completed");
    }
}
