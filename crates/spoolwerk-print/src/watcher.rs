// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cancellable polling of a submitted job's status.
//
// `StatusWatcher` is the pull model: each `tick` polls the spooler once and
// yields at most one event.  `WatchHandle` is the push model built on it by
// `JobManager::submit_and_watch`: a background task ticks at the configured
// interval and forwards events over a channel.
//
// Once the watcher's token is cancelled no further event is produced, even
// for a poll that was already in flight.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::JobState;

use crate::spooler::Spooler;

/// A notification about a watched job.
#[derive(Debug)]
pub enum WatchEvent {
    /// The job's state or status message changed.
    Status {
        jid: i32,
        state: JobState,
        message: String,
    },
    /// The job failed, or could not be submitted (`jid` is `None`), or the
    /// spooler could not be polled.  No event follows a failure.
    Failed {
        jid: Option<i32>,
        error: SpoolwerkError,
    },
}

impl WatchEvent {
    pub fn jid(&self) -> Option<i32> {
        match self {
            Self::Status { jid, .. } => Some(*jid),
            Self::Failed { jid, .. } => *jid,
        }
    }
}

/// Polls one job until it reaches a terminal state.
#[derive(Debug)]
pub struct StatusWatcher {
    jid: i32,
    last: Option<(JobState, String)>,
    finished: bool,
    consecutive_failures: u32,
    max_failures: u32,
    token: CancellationToken,
}

impl StatusWatcher {
    /// Watch `jid`.  `max_failures` consecutive poll errors end the watch
    /// with a failure event.
    pub fn new(jid: i32, max_failures: u32, token: CancellationToken) -> Self {
        Self {
            jid,
            last: None,
            finished: false,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            token,
        }
    }

    pub fn jid(&self) -> i32 {
        self.jid
    }

    /// Whether polling has stopped, by terminal state or cancellation.
    pub fn is_finished(&self) -> bool {
        self.finished || self.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Poll the spooler once.
    ///
    /// Returns an event when the observed status changed since the previous
    /// tick.  After the job reaches a terminal state, disappears, fails, or
    /// the watcher is cancelled, every further tick returns `None` without
    /// contacting the spooler.
    pub async fn tick(&mut self, spooler: &dyn Spooler) -> Option<WatchEvent> {
        if self.is_finished() {
            return None;
        }

        let polled = spooler.job(self.jid).await;
        if self.token.is_cancelled() {
            self.finished = true;
            return None;
        }

        match polled {
            Ok(Some(record)) => {
                self.consecutive_failures = 0;
                if record.state == JobState::Error {
                    self.finished = true;
                    let message = if record.state_message.is_empty() {
                        "job stopped with an error".to_string()
                    } else {
                        record.state_message
                    };
                    return Some(WatchEvent::Failed {
                        jid: Some(self.jid),
                        error: SpoolwerkError::JobFailed {
                            jid: self.jid,
                            message,
                        },
                    });
                }
                if record.state.is_terminal() {
                    self.finished = true;
                }

                let observed = (record.state, record.state_message);
                if self.last.as_ref() == Some(&observed) {
                    return None;
                }
                self.last = Some(observed.clone());
                Some(WatchEvent::Status {
                    jid: self.jid,
                    state: observed.0,
                    message: observed.1,
                })
            }
            Ok(None) => {
                debug!(jid = self.jid, "job no longer known to spooler, stopping watch");
                self.finished = true;
                None
            }
            Err(e) if e.is_not_found() => {
                debug!(jid = self.jid, "job no longer known to spooler, stopping watch");
                self.finished = true;
                None
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    jid = self.jid,
                    attempt = self.consecutive_failures,
                    error = %e,
                    "job status poll failed"
                );
                if self.consecutive_failures < self.max_failures {
                    return None;
                }
                self.finished = true;
                Some(WatchEvent::Failed {
                    jid: Some(self.jid),
                    error: e,
                })
            }
        }
    }
}

/// The caller's end of a background watch.
///
/// Dropping the handle cancels the watch.
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub(crate) fn new(
        token: CancellationToken,
        events: mpsc::UnboundedReceiver<WatchEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            token,
            events,
            task: Some(task),
        }
    }

    /// Next event in the order the status changed.
    ///
    /// Returns `None` once the watch has ended or been cancelled; events
    /// still buffered at cancellation are discarded.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Stop watching.  No event is delivered after this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A token that cancels this watch, for wiring into other shutdown paths.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the background task to finish.
    pub async fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| SpoolwerkError::io_failure("watch task", e)),
            None => Ok(()),
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
