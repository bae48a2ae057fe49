// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job lifecycle.
//
// `PrintJob` is a plain data handle: built locally, files attached, then
// handed to `JobManager::submit`.  After submission it is a snapshot of the
// spooler's view that `JobManager::refresh` brings up to date.
//
//   Created -> Submitted -> {Held, Printing} -> {Completed, Canceled, Error}
//
// Job observers are registered on the manager by job id and held weakly, so
// a dropped observer simply stops receiving notifications.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::SpoolwerkConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{JobRecord, JobState, VersionedRecord};

use crate::spooler::{JobRequest, Spooler};
use crate::watcher::{StatusWatcher, WatchEvent, WatchHandle};

// ---------------------------------------------------------------------------
// PrintJob
// ---------------------------------------------------------------------------

/// A print job, before or after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    name: String,
    dest: String,
    user: Option<String>,
    jid: Option<i32>,
    size: u64,
    submitted_at: Option<DateTime<Utc>>,
    state: JobState,
    status_description: String,
    /// Pending files; emptied once the spooler owns the document.
    files: Vec<PathBuf>,
}

impl PrintJob {
    /// A new, empty job titled `name` for destination `dest`.
    pub fn new(name: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dest: dest.into(),
            user: None,
            jid: None,
            size: 0,
            submitted_at: None,
            state: JobState::Created,
            status_description: String::new(),
            files: Vec::new(),
        }
    }

    /// Snapshot of a job the spooler already knows.
    pub fn from_record(record: JobRecord) -> Self {
        Self {
            name: record.name,
            dest: record.dest,
            user: Some(record.user),
            jid: Some(record.jid),
            size: record.size,
            submitted_at: Some(record.submitted_at),
            state: record.state,
            status_description: record.state_message,
            files: Vec::new(),
        }
    }

    /// Submit as `user` instead of the manager's requesting user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attach a document.  Only allowed before submission.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if self.state != JobState::Created {
            return Err(SpoolwerkError::InvalidTransition {
                from: self.state,
                action: "attach files to",
            });
        }
        let path = path.into();
        if !path.is_file() {
            return Err(SpoolwerkError::NotFound(format!("file {}", path.display())));
        }
        self.files.push(path);
        Ok(())
    }

    pub fn add_files<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            self.add_file(path)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Spooler-assigned id, `None` before submission.
    pub fn jid(&self) -> Option<i32> {
        self.jid
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Numeric status code of the current state.
    pub fn status(&self) -> i32 {
        self.state.code()
    }

    pub fn status_description(&self) -> &str {
        &self.status_description
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Wrap the job in a versioned envelope for persistence.
    pub fn to_record(&self) -> VersionedRecord<PrintJob> {
        VersionedRecord::new(self.clone())
    }

    pub fn from_versioned(record: VersionedRecord<PrintJob>) -> Result<Self> {
        record.into_current()
    }

    /// Apply a spooler record.  Returns whether state or message changed.
    fn apply(&mut self, record: JobRecord) -> bool {
        let changed =
            self.state != record.state || self.status_description != record.state_message;
        self.state = record.state;
        self.status_description = record.state_message;
        self.size = record.size;
        changed
    }

    fn require_jid(&self, action: &'static str) -> Result<i32> {
        self.jid.ok_or(SpoolwerkError::InvalidTransition {
            from: self.state,
            action,
        })
    }
}

// ---------------------------------------------------------------------------
// Observers and batch results
// ---------------------------------------------------------------------------

/// Receives status notifications for a job.
pub trait JobMonitor: Send + Sync {
    /// The job's state or status message changed.
    fn status_changed(&self, jid: i32, state: JobState, message: &str);

    /// The job failed or could no longer be watched.
    fn failed(&self, jid: i32, error: &SpoolwerkError) {
        let _ = (jid, error);
    }
}

/// Result of a best-effort operation over many jobs.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<i32>,
    pub failures: Vec<(i32, SpoolwerkError)>,
}

impl BatchOutcome {
    /// Whether every item succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// JobManager
// ---------------------------------------------------------------------------

/// Submits and controls jobs through a spooler.
///
/// Cheap to clone; clones share the spooler and the observer table.
#[derive(Clone)]
pub struct JobManager {
    spooler: Arc<dyn Spooler>,
    monitors: Arc<Mutex<HashMap<i32, Weak<dyn JobMonitor>>>>,
    user: String,
    poll_interval: Duration,
    max_poll_failures: u32,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("user", &self.user)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_failures", &self.max_poll_failures)
            .finish_non_exhaustive()
    }
}

impl JobManager {
    pub fn new(spooler: Arc<dyn Spooler>, config: &SpoolwerkConfig) -> Self {
        Self {
            spooler,
            monitors: Arc::new(Mutex::new(HashMap::new())),
            user: config.requesting_user.clone(),
            poll_interval: config.poll_interval(),
            max_poll_failures: config.max_poll_failures,
        }
    }

    pub fn spooler(&self) -> &Arc<dyn Spooler> {
        &self.spooler
    }

    // -- Observers --------------------------------------------------------

    /// Notify `monitor` of status changes of job `jid`.
    ///
    /// Only a weak reference is kept; the caller owns the monitor.
    pub fn register_monitor(&self, jid: i32, monitor: &Arc<dyn JobMonitor>) {
        self.table().insert(jid, Arc::downgrade(monitor));
    }

    pub fn unregister_monitor(&self, jid: i32) {
        self.table().remove(&jid);
    }

    /// The live monitor registered for `jid`.
    pub fn monitor(&self, jid: i32) -> Option<Arc<dyn JobMonitor>> {
        let mut table = self.table();
        let monitor = table.get(&jid).and_then(Weak::upgrade);
        if monitor.is_none() {
            table.remove(&jid);
        }
        monitor
    }

    fn table(&self) -> MutexGuard<'_, HashMap<i32, Weak<dyn JobMonitor>>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: &WatchEvent) {
        let Some(jid) = event.jid() else {
            return;
        };
        let Some(monitor) = self.monitor(jid) else {
            return;
        };
        match event {
            WatchEvent::Status { state, message, .. } => monitor.status_changed(jid, *state, message),
            WatchEvent::Failed { error, .. } => monitor.failed(jid, error),
        }
    }

    // -- Lifecycle --------------------------------------------------------

    /// Hand the job's files to the spooler with the destination's current
    /// default options.
    #[instrument(skip(self, job), fields(dest = %job.dest, name = %job.name))]
    pub async fn submit(&self, job: &mut PrintJob) -> Result<()> {
        if job.state != JobState::Created {
            return Err(SpoolwerkError::InvalidTransition {
                from: job.state,
                action: "submit",
            });
        }
        if job.files.is_empty() {
            return Err(SpoolwerkError::NoFilesAttached);
        }

        let destinations = self
            .spooler
            .destinations()
            .await
            .map_err(|e| SpoolwerkError::SubmissionFailed(e.raw_message()))?;
        if !destinations.iter().any(|d| d.name == job.dest) {
            return Err(SpoolwerkError::PrinterNotFound(job.dest.clone()));
        }
        let options = self
            .spooler
            .default_options(&job.dest)
            .await
            .map_err(|e| SpoolwerkError::SubmissionFailed(e.raw_message()))?;

        let request = JobRequest {
            dest: job.dest.clone(),
            title: job.name.clone(),
            files: job.files.clone(),
            options,
            user: job.user.clone().unwrap_or_else(|| self.user.clone()),
        };
        let ticket = self
            .spooler
            .submit_job(request)
            .await
            .map_err(|e| SpoolwerkError::SubmissionFailed(e.raw_message()))?;

        job.jid = Some(ticket.jid);
        job.user = Some(ticket.user);
        job.size = ticket.size;
        job.submitted_at = Some(ticket.submitted_at);
        job.state = JobState::Submitted;
        job.files.clear();

        info!(jid = ticket.jid, "job submitted");
        Ok(())
    }

    /// Bring the job up to date with the spooler.
    ///
    /// A job that was never submitted is left as is.  Fails with `NotFound`
    /// when the spooler no longer knows the job.
    pub async fn refresh(&self, job: &mut PrintJob) -> Result<()> {
        let Some(jid) = job.jid else {
            return Ok(());
        };
        let record = self
            .spooler
            .job(jid)
            .await?
            .ok_or_else(|| SpoolwerkError::NotFound(format!("job {jid}")))?;
        if job.apply(record) {
            self.notify(&WatchEvent::Status {
                jid,
                state: job.state,
                message: job.status_description.clone(),
            });
        }
        Ok(())
    }

    /// Hold a queued or printing job.
    #[instrument(skip(self, job), fields(jid = ?job.jid))]
    pub async fn hold(&self, job: &mut PrintJob) -> Result<()> {
        let jid = job.require_jid("hold")?;
        self.refresh(job).await?;
        match job.state {
            JobState::Held => Ok(()),
            JobState::Submitted | JobState::Printing => {
                self.spooler.hold_job(jid).await?;
                job.state = JobState::Held;
                debug!("job held");
                Ok(())
            }
            from => Err(SpoolwerkError::InvalidTransition {
                from,
                action: "hold",
            }),
        }
    }

    /// Release a held job.  Queued or printing jobs are left running.
    #[instrument(skip(self, job), fields(jid = ?job.jid))]
    pub async fn start(&self, job: &mut PrintJob) -> Result<()> {
        let jid = job.require_jid("start")?;
        self.refresh(job).await?;
        match job.state {
            JobState::Held => {
                self.spooler.release_job(jid).await?;
                job.state = JobState::Printing;
                debug!("job released");
                Ok(())
            }
            JobState::Submitted | JobState::Printing => Ok(()),
            from => Err(SpoolwerkError::InvalidTransition {
                from,
                action: "start",
            }),
        }
    }

    /// Cancel the job.
    ///
    /// A job that was never submitted is canceled locally.
    #[instrument(skip(self, job), fields(jid = ?job.jid))]
    pub async fn cancel(&self, job: &mut PrintJob) -> Result<()> {
        if job.state.is_terminal() {
            return Err(SpoolwerkError::AlreadyTerminal { state: job.state });
        }
        let Some(jid) = job.jid else {
            job.state = JobState::Canceled;
            job.files.clear();
            return Ok(());
        };

        self.refresh(job).await?;
        if job.state.is_terminal() {
            return Err(SpoolwerkError::AlreadyTerminal { state: job.state });
        }
        self.spooler.cancel_job(jid).await?;
        job.state = JobState::Canceled;
        self.notify(&WatchEvent::Status {
            jid,
            state: JobState::Canceled,
            message: job.status_description.clone(),
        });
        info!("job canceled");
        Ok(())
    }

    // -- Queries ----------------------------------------------------------

    /// Jobs on `printer`, oldest first.
    pub async fn jobs_for_printer(
        &self,
        printer: &str,
        include_completed: bool,
    ) -> Result<Vec<PrintJob>> {
        let destinations = self.spooler.destinations().await?;
        if !destinations.iter().any(|d| d.name == printer) {
            return Err(SpoolwerkError::PrinterNotFound(printer.to_string()));
        }
        let records = self.spooler.jobs(Some(printer), include_completed).await?;
        Ok(records.into_iter().map(PrintJob::from_record).collect())
    }

    /// Jobs on every destination, oldest first.
    pub async fn jobs_for_all_printers(&self, include_completed: bool) -> Result<Vec<PrintJob>> {
        let records = self.spooler.jobs(None, include_completed).await?;
        Ok(records.into_iter().map(PrintJob::from_record).collect())
    }

    // -- Bulk and lookup cancellation -------------------------------------

    /// Cancel every active job on every destination.
    ///
    /// Individual failures are collected; only failing to list the jobs
    /// aborts the batch.
    #[instrument(skip(self))]
    pub async fn cancel_all_jobs(&self) -> Result<BatchOutcome> {
        let records = self.spooler.jobs(None, false).await?;
        Ok(self.cancel_records(records).await)
    }

    /// Cancel every active job on `printer`.
    #[instrument(skip(self))]
    pub async fn cancel_jobs_on(&self, printer: &str) -> Result<BatchOutcome> {
        let records = self.spooler.jobs(Some(printer), false).await?;
        Ok(self.cancel_records(records).await)
    }

    async fn cancel_records(&self, records: Vec<JobRecord>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for record in records {
            match self.spooler.cancel_job(record.jid).await {
                Ok(()) => outcome.succeeded.push(record.jid),
                Err(e) => {
                    warn!(jid = record.jid, error = %e, "cancel failed");
                    outcome.failures.push((record.jid, e));
                }
            }
        }
        info!(
            canceled = outcome.succeeded.len(),
            failed = outcome.failures.len(),
            "batch cancel finished"
        );
        outcome
    }

    /// Cancel the job with id `jid`.
    #[instrument(skip(self))]
    pub async fn cancel_job_with_id(&self, jid: i32) -> Result<()> {
        let record = self
            .spooler
            .job(jid)
            .await?
            .ok_or_else(|| SpoolwerkError::NotFound(format!("job {jid}")))?;
        if record.state.is_terminal() {
            return Err(SpoolwerkError::AlreadyTerminal {
                state: record.state,
            });
        }
        self.spooler.cancel_job(jid).await
    }

    /// Cancel the oldest active job titled exactly `name`.
    ///
    /// Only active jobs are considered unless `include_terminal` is set, in
    /// which case a name whose matches have all finished yields
    /// `AlreadyTerminal` instead of `NotFound`.  Returns the id of the
    /// canceled job.
    #[instrument(skip(self))]
    pub async fn cancel_job_named(&self, name: &str, include_terminal: bool) -> Result<i32> {
        let matches: Vec<JobRecord> = self
            .spooler
            .jobs(None, include_terminal)
            .await?
            .into_iter()
            .filter(|job| job.name == name)
            .collect();
        let Some(record) = matches.iter().find(|job| !job.state.is_terminal()) else {
            return Err(match matches.first() {
                Some(finished) => SpoolwerkError::AlreadyTerminal {
                    state: finished.state,
                },
                None => SpoolwerkError::NotFound(format!("job named '{name}'")),
            });
        };
        self.spooler.cancel_job(record.jid).await?;
        Ok(record.jid)
    }

    // -- Convenience ------------------------------------------------------

    /// Create a job for one file, titled after the file name, and submit it.
    pub async fn send_file(&self, file: &Path, printer: &str) -> Result<PrintJob> {
        let mut job = job_for_file(file, printer)?;
        self.submit(&mut job).await?;
        Ok(job)
    }

    /// Like [`JobManager::send_file`], but submits in the background and
    /// watches the job.
    pub fn send_file_and_watch(&self, file: &Path, printer: &str) -> Result<WatchHandle> {
        let job = job_for_file(file, printer)?;
        Ok(self.submit_and_watch(job))
    }

    /// Submit `job` in a background task and poll its status until it
    /// reaches a terminal state.
    ///
    /// Status changes are delivered through the returned handle, in order,
    /// and to any monitor registered for the job's id.  A failed submission
    /// is reported as a single `Failed` event without a job id.
    pub fn submit_and_watch(&self, job: PrintJob) -> WatchHandle {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = self.clone();
        let task = tokio::spawn(manager.watch(job, token.clone(), tx));
        WatchHandle::new(token, rx, task)
    }

    async fn watch(
        self,
        mut job: PrintJob,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) {
        // Submission is not interrupted; a job the spooler accepted must
        // keep its id even if the watch is dropped meanwhile.
        let submitted = self.submit(&mut job).await;
        if token.is_cancelled() {
            return;
        }
        if let Err(error) = submitted {
            let _ = tx.send(WatchEvent::Failed { jid: None, error });
            return;
        }
        let Some(jid) = job.jid else {
            return;
        };

        let mut watcher = StatusWatcher::new(jid, self.max_poll_failures, token.clone());
        loop {
            if let Some(event) = watcher.tick(self.spooler.as_ref()).await {
                self.notify(&event);
                if tx.send(event).is_err() {
                    debug!(jid, "watch receiver dropped");
                    break;
                }
            }
            if watcher.is_finished() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(jid, "watch finished");
    }
}

fn job_for_file(file: &Path, printer: &str) -> Result<PrintJob> {
    let title = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let mut job = PrintJob::new(title, printer);
    job.add_file(file)?;
    Ok(job)
}
