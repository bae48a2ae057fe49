// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process spooler and driver catalog.
//
// Used by the test-suite and by callers that want to exercise the registry
// and job manager without a running scheduler.  Failures can be injected per
// operation to drive error paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{
    Destination, DriverEntry, JobRecord, JobState, PrinterOption, PrinterState,
};

use crate::ppd;
use crate::spooler::{DestinationSpec, Driver, DriverCatalog, JobRequest, JobTicket, Spooler};

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Destinations,
    AddDestination,
    RemoveDestination,
    SetDefaultOptions,
    SubmitJob,
    JobQuery,
    CancelJob,
}

#[derive(Debug)]
struct MemoryDestination {
    destination: Destination,
    driver: Driver,
    options: Vec<PrinterOption>,
}

#[derive(Debug, Default)]
struct State {
    destinations: BTreeMap<String, MemoryDestination>,
    jobs: BTreeMap<i32, JobRecord>,
    requests: Vec<JobRequest>,
    reloads: HashMap<String, usize>,
    option_writes: HashMap<String, usize>,
    leftover_options: HashMap<String, Vec<PrinterOption>>,
    failing: HashSet<FailPoint>,
    next_jid: i32,
}

/// A spooler that keeps destinations and jobs in memory.
#[derive(Debug, Default)]
pub struct MemorySpooler {
    state: Mutex<State>,
    ppd_dir: Option<PathBuf>,
}

impl MemorySpooler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install PPDs into `dir`, like the scheduler's own PPD directory.
    pub fn with_ppd_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::default(),
            ppd_dir: Some(dir.into()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.state().failing.contains(&point) {
            return Err(SpoolwerkError::Spooler(format!("injected failure: {point:?}")));
        }
        Ok(())
    }

    /// Make `point` fail until [`MemorySpooler::clear_failures`].
    pub fn fail_on(&self, point: FailPoint) {
        self.state().failing.insert(point);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    /// Force a job into `state`, as the scheduler would while printing.
    pub fn set_job_state(&self, jid: i32, state: JobState, message: &str) {
        if let Some(job) = self.state().jobs.get_mut(&jid) {
            job.state = state;
            job.state_message = message.to_string();
        }
    }

    /// Forget a job, as the scheduler does once job history is purged.
    pub fn remove_job(&self, jid: i32) {
        self.state().jobs.remove(&jid);
    }

    /// Every submission received, in order.
    pub fn requests(&self) -> Vec<JobRequest> {
        self.state().requests.clone()
    }

    pub fn driver_of(&self, name: &str) -> Option<Driver> {
        self.state()
            .destinations
            .get(name)
            .map(|d| d.driver.clone())
    }

    pub fn reload_count(&self, name: &str) -> usize {
        self.state().reloads.get(name).copied().unwrap_or(0)
    }

    /// Pre-populate the option store for a destination that is not installed
    /// yet, as a stale `lpoptions` entry left by another tool would.
    pub fn seed_options(&self, name: &str, options: Vec<PrinterOption>) {
        self.state().leftover_options.insert(name.to_string(), options);
    }

    pub fn option_write_count(&self, name: &str) -> usize {
        self.state().option_writes.get(name).copied().unwrap_or(0)
    }

    fn install_ppd(&self, name: &str, driver: &Driver) -> Result<Option<String>> {
        let Some(dir) = &self.ppd_dir else {
            return Ok(match driver {
                Driver::File(path) => std::fs::read(path)
                    .ok()
                    .and_then(|bytes| ppd::model_name(&ppd::decode(&bytes).0)),
                Driver::Catalog(ppd_name) => Some(ppd_name.clone()),
            });
        };

        let target = dir.join(format!("{name}.ppd"));
        let context = format!("install PPD {}", target.display());
        match driver {
            Driver::File(source) => {
                std::fs::copy(source, &target)
                    .map_err(|e| SpoolwerkError::io_failure(context, e))?;
                let bytes = std::fs::read(&target)?;
                Ok(ppd::model_name(&ppd::decode(&bytes).0))
            }
            Driver::Catalog(ppd_name) => {
                let text = format!("*PPD-Adobe: \"4.3\"\n*NickName: \"{ppd_name}\"\n");
                std::fs::write(&target, text)
                    .map_err(|e| SpoolwerkError::io_failure(context, e))?;
                Ok(Some(ppd_name.clone()))
            }
        }
    }
}

#[async_trait]
impl Spooler for MemorySpooler {
    async fn destinations(&self) -> Result<Vec<Destination>> {
        self.check(FailPoint::Destinations)?;
        Ok(self
            .state()
            .destinations
            .values()
            .map(|d| d.destination.clone())
            .collect())
    }

    async fn add_destination(&self, spec: DestinationSpec) -> Result<()> {
        self.check(FailPoint::AddDestination)?;
        if let Driver::File(path) = &spec.driver {
            if !path.is_file() {
                return Err(SpoolwerkError::NotFound(format!("PPD {}", path.display())));
            }
        }
        let make_and_model = self.install_ppd(&spec.name, &spec.driver)?;

        let destination = Destination {
            name: spec.name.clone(),
            uri: spec.uri,
            description: spec.description,
            location: spec.location,
            make_and_model,
            state: PrinterState::Stopped,
            state_message: String::new(),
            accepting_jobs: false,
        };
        debug!(name = %spec.name, "memory destination added");
        let mut state = self.state();
        let options = state.leftover_options.remove(&spec.name).unwrap_or_default();
        state.destinations.insert(
            spec.name,
            MemoryDestination {
                destination,
                driver: spec.driver,
                options,
            },
        );
        Ok(())
    }

    async fn remove_destination(&self, name: &str) -> Result<()> {
        self.check(FailPoint::RemoveDestination)?;
        let mut state = self.state();
        state
            .destinations
            .remove(name)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("destination {name}")))?;
        state.jobs.retain(|_, job| job.dest != name);
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut state = self.state();
        let dest = state
            .destinations
            .get_mut(name)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("destination {name}")))?;
        dest.destination.accepting_jobs = enabled;
        dest.destination.state = if enabled {
            PrinterState::Idle
        } else {
            PrinterState::Stopped
        };
        Ok(())
    }

    async fn default_options(&self, name: &str) -> Result<Vec<PrinterOption>> {
        self.state()
            .destinations
            .get(name)
            .map(|d| d.options.clone())
            .ok_or_else(|| SpoolwerkError::NotFound(format!("destination {name}")))
    }

    async fn set_default_options(&self, name: &str, options: &[PrinterOption]) -> Result<()> {
        self.check(FailPoint::SetDefaultOptions)?;
        let mut state = self.state();
        let dest = state
            .destinations
            .get_mut(name)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("destination {name}")))?;
        dest.options = options.to_vec();
        *state.option_writes.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn ppd_path(&self, name: &str) -> Result<PathBuf> {
        if !self.state().destinations.contains_key(name) {
            return Err(SpoolwerkError::NotFound(format!("destination {name}")));
        }
        match &self.ppd_dir {
            Some(dir) => Ok(dir.join(format!("{name}.ppd"))),
            None => Err(SpoolwerkError::NotFound(format!("PPD for {name}"))),
        }
    }

    async fn reload_ppd(&self, name: &str, _path: &Path) -> Result<()> {
        let mut state = self.state();
        if !state.destinations.contains_key(name) {
            return Err(SpoolwerkError::NotFound(format!("destination {name}")));
        }
        *state.reloads.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn submit_job(&self, request: JobRequest) -> Result<JobTicket> {
        self.check(FailPoint::SubmitJob)?;
        let mut size = 0;
        for file in &request.files {
            let meta = std::fs::metadata(file)
                .map_err(|e| SpoolwerkError::io_failure(format!("stat {}", file.display()), e))?;
            size += meta.len();
        }

        let mut state = self.state();
        match state.destinations.get(&request.dest) {
            Some(dest) if dest.destination.accepting_jobs => {}
            Some(_) => {
                return Err(SpoolwerkError::Spooler(format!(
                    "{} is not accepting jobs",
                    request.dest
                )));
            }
            None => return Err(SpoolwerkError::NotFound(format!("destination {}", request.dest))),
        }

        state.next_jid += 1;
        let ticket = JobTicket {
            jid: state.next_jid,
            user: request.user.clone(),
            submitted_at: Utc::now(),
            size,
        };
        state.jobs.insert(
            ticket.jid,
            JobRecord {
                jid: ticket.jid,
                name: request.title.clone(),
                dest: request.dest.clone(),
                user: ticket.user.clone(),
                size,
                submitted_at: ticket.submitted_at,
                state: JobState::Submitted,
                state_message: String::new(),
            },
        );
        state.requests.push(request);
        Ok(ticket)
    }

    async fn jobs(&self, dest: Option<&str>, include_completed: bool) -> Result<Vec<JobRecord>> {
        self.check(FailPoint::JobQuery)?;
        Ok(self
            .state()
            .jobs
            .values()
            .filter(|job| dest.is_none_or(|d| job.dest == d))
            .filter(|job| include_completed || !job.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn job(&self, jid: i32) -> Result<Option<JobRecord>> {
        self.check(FailPoint::JobQuery)?;
        Ok(self.state().jobs.get(&jid).cloned())
    }

    async fn hold_job(&self, jid: i32) -> Result<()> {
        let mut state = self.state();
        let job = state
            .jobs
            .get_mut(&jid)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("job {jid}")))?;
        if job.state.is_terminal() {
            return Err(SpoolwerkError::Spooler(format!("job {jid} is already {}", job.state)));
        }
        job.state = JobState::Held;
        Ok(())
    }

    async fn release_job(&self, jid: i32) -> Result<()> {
        let mut state = self.state();
        let job = state
            .jobs
            .get_mut(&jid)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("job {jid}")))?;
        if job.state == JobState::Held {
            job.state = JobState::Submitted;
        }
        Ok(())
    }

    async fn cancel_job(&self, jid: i32) -> Result<()> {
        self.check(FailPoint::CancelJob)?;
        let mut state = self.state();
        let job = state
            .jobs
            .get_mut(&jid)
            .ok_or_else(|| SpoolwerkError::NotFound(format!("job {jid}")))?;
        if job.state.is_terminal() {
            return Err(SpoolwerkError::Spooler(format!("job {jid} is already {}", job.state)));
        }
        job.state = JobState::Canceled;
        Ok(())
    }
}

/// A fixed list of drivers.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    entries: Vec<DriverEntry>,
}

impl MemoryCatalog {
    pub fn new(entries: Vec<DriverEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl DriverCatalog for MemoryCatalog {
    async fn entries(&self) -> Result<Vec<DriverEntry>> {
        Ok(self.entries.clone())
    }
}
