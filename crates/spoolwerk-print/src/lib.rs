// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolwerk Print — printer registry, option resolution (spooler store and
// PPD defaults), job lifecycle, and cancellable status watching on top of a
// pluggable spooler.  `IppSpooler` drives a CUPS scheduler; `MemorySpooler`
// runs everything in process.

pub mod catalog;
pub mod download;
pub mod ipp_spooler;
pub mod jobs;
pub mod locks;
pub mod lpoptions;
pub mod memory;
pub mod options;
pub mod ppd;
pub mod printer;
pub mod protocol;
pub mod registry;
pub mod spooler;
pub mod watcher;

pub use catalog::PpdDirectoryCatalog;
pub use ipp_spooler::IppSpooler;
pub use jobs::{BatchOutcome, JobManager, JobMonitor, PrintJob};
pub use memory::{MemoryCatalog, MemorySpooler};
pub use printer::{Printer, PrinterBuilder};
pub use protocol::Protocol;
pub use registry::PrinterRegistry;
pub use spooler::{DestinationSpec, Driver, DriverCatalog, JobRequest, JobTicket, Spooler};
pub use watcher::{StatusWatcher, WatchEvent, WatchHandle};
