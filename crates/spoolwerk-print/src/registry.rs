// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer registry — the service object callers construct once and share.
//
// All spooler access goes through the injected `Spooler` and `DriverCatalog`,
// so tests run against `MemorySpooler` / `MemoryCatalog`.  Multi-step
// operations on one printer (add, remove, option updates) are serialised by
// a per-name lock; queries run without locking.
//
// Two option paths exist and are deliberately kept separate:
//
// - `apply_options` merges into the spooler's stored per-printer defaults.
// - `apply_ppd_options` rewrites the `*Default` directives of the installed
//   PPD and asks the spooler to reload it.
//
// Neither updates the other.

use std::collections::BTreeSet;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use spoolwerk_core::config::SpoolwerkConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{OptionDescriptor, PrinterOption};

use crate::catalog::PpdDirectoryCatalog;
use crate::download;
use crate::ipp_spooler::IppSpooler;
use crate::jobs::{BatchOutcome, JobManager, PrintJob};
use crate::locks::NameLocks;
use crate::options::{merge_options, parse_options};
use crate::ppd;
use crate::printer::{Printer, validate_name};
use crate::spooler::{DestinationSpec, Driver, DriverCatalog, Spooler, match_model};

/// Shared entry point for printer configuration and job control.
///
/// Cheap to clone; clones share the spooler connection and the lock table.
#[derive(Clone)]
pub struct PrinterRegistry {
    spooler: Arc<dyn Spooler>,
    catalog: Arc<dyn DriverCatalog>,
    locks: Arc<NameLocks>,
    http: reqwest::Client,
    jobs: JobManager,
}

impl std::fmt::Debug for PrinterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterRegistry")
            .field("locks", &self.locks)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl PrinterRegistry {
    pub fn new(
        spooler: Arc<dyn Spooler>,
        catalog: Arc<dyn DriverCatalog>,
        config: &SpoolwerkConfig,
    ) -> Result<Self> {
        let http = download::http_client(config.download_timeout())?;
        let jobs = JobManager::new(Arc::clone(&spooler), config);
        Ok(Self {
            spooler,
            catalog,
            locks: Arc::new(NameLocks::new()),
            http,
            jobs,
        })
    }

    /// Registry backed by the CUPS scheduler and PPD directories named in
    /// `config`.
    pub fn connect(config: &SpoolwerkConfig) -> Result<Self> {
        let spooler = IppSpooler::new(config)?;
        let catalog = PpdDirectoryCatalog::new(config.driver_dirs.clone());
        info!(server = %config.server_uri, "printer registry connected");
        Self::new(Arc::new(spooler), Arc::new(catalog), config)
    }

    /// The job manager sharing this registry's spooler.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn spooler(&self) -> &Arc<dyn Spooler> {
        &self.spooler
    }

    // -- Destinations -----------------------------------------------------

    /// Install `printer` as a new, enabled destination.
    ///
    /// The driver is taken from the printer's local PPD, else downloaded
    /// from its PPD URL, else the first catalog entry matching its model.
    /// The printer's options are merged into the spooler's stored defaults.
    #[instrument(skip(self, printer), fields(name = %printer.name(), uri = %printer.uri()))]
    pub async fn add_printer(&self, printer: &Printer) -> Result<()> {
        let name = printer.name();
        validate_name(name)?;

        let _guard = self.locks.lock(name).await;
        if self.contains(name).await? {
            return Err(SpoolwerkError::DuplicateName(name.to_string()));
        }

        // The download (if any) must outlive registration.
        let (driver, _download) = self.resolve_driver(printer).await?;
        debug!(?driver, "driver resolved");

        let spec = DestinationSpec {
            name: name.to_string(),
            uri: printer.uri(),
            driver,
            description: printer.description().map(str::to_owned),
            location: printer.location().map(str::to_owned),
        };
        self.spooler
            .add_destination(spec)
            .await
            .map_err(|e| registration_failed(name, &e))?;

        if let Err(e) = self.finish_registration(printer).await {
            if let Err(cleanup) = self.spooler.remove_destination(name).await {
                warn!(error = %cleanup, "could not roll back partially added printer");
            }
            return Err(registration_failed(name, &e));
        }

        info!("printer added");
        Ok(())
    }

    async fn finish_registration(&self, printer: &Printer) -> Result<()> {
        self.merge_stored(printer.name(), printer.options()).await?;
        self.spooler.set_enabled(printer.name(), true).await
    }

    async fn resolve_driver(&self, printer: &Printer) -> Result<(Driver, Option<NamedTempFile>)> {
        if let Some(path) = printer.ppd() {
            if path.is_file() {
                return Ok((Driver::File(path.to_path_buf()), None));
            }
            warn!(path = %path.display(), "configured PPD does not exist");
        }

        let mut download_error = None;
        if let Some(url) = printer.ppd_url() {
            match download::fetch_ppd(&self.http, url).await {
                Ok(file) => {
                    let driver = Driver::File(file.path().to_path_buf());
                    return Ok((driver, Some(file)));
                }
                Err(e) => {
                    warn!(error = %e, "PPD download failed, trying the driver catalog");
                    download_error = Some(e);
                }
            }
        }

        let entries = self
            .catalog
            .entries()
            .await
            .map_err(|e| SpoolwerkError::DriverUnresolved(format!("driver catalog: {}", e.raw_message())))?;
        if let Some(entry) = match_model(entries, printer.model()).into_iter().next() {
            let driver = match entry.path {
                Some(path) => Driver::File(path),
                None => Driver::Catalog(entry.ppd_name),
            };
            return Ok((driver, None));
        }

        Err(download_error.unwrap_or_else(|| {
            SpoolwerkError::DriverUnresolved(format!("no driver for model '{}'", printer.model()))
        }))
    }

    /// Delete a destination.  Jobs queued on it are not canceled first.
    #[instrument(skip(self))]
    pub async fn remove_printer(&self, name: &str) -> Result<()> {
        let _guard = self.locks.lock(name).await;
        if !self.contains(name).await? {
            return Err(printer_missing(name));
        }
        self.spooler
            .remove_destination(name)
            .await
            .map_err(|e| SpoolwerkError::RemovalFailed {
                printer: name.to_string(),
                message: e.raw_message(),
            })?;
        info!("printer removed");
        Ok(())
    }

    /// Resume the destination and accept new jobs.
    pub async fn enable_printer(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true).await
    }

    /// Pause the destination and reject new jobs.
    pub async fn disable_printer(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false).await
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let _guard = self.locks.lock(name).await;
        if !self.contains(name).await? {
            return Err(printer_missing(name));
        }
        self.spooler.set_enabled(name, enabled).await
    }

    // -- Queries ----------------------------------------------------------

    /// Installed destinations reachable over a supported protocol, with
    /// live status and stored options.
    pub async fn installed_printers(&self) -> Result<Vec<Printer>> {
        let mut printers = Vec::new();
        for dest in self.spooler.destinations().await? {
            let Some(printer) = Printer::from_destination(&dest) else {
                debug!(name = %dest.name, uri = %dest.uri, "skipping destination with unsupported URI");
                continue;
            };
            let options = match self.spooler.default_options(&dest.name).await {
                Ok(options) => options,
                Err(e) => {
                    warn!(name = %dest.name, error = %e, "could not read stored options");
                    Vec::new()
                }
            };
            printers.push(printer.with_options(options));
        }
        Ok(printers)
    }

    /// Names of every installed destination.
    pub async fn names_of_installed_printers(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .spooler
            .destinations()
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect())
    }

    async fn contains(&self, name: &str) -> Result<bool> {
        Ok(self
            .spooler
            .destinations()
            .await?
            .iter()
            .any(|d| d.name == name))
    }

    /// Option schema of the best driver for `model`; empty when none match.
    pub async fn options_for_model(&self, model: &str) -> Result<Vec<OptionDescriptor>> {
        let entries = self.catalog.entries().await?;
        Ok(match_model(entries, model)
            .into_iter()
            .next()
            .map(|entry| entry.options)
            .unwrap_or_default())
    }

    /// Identifiers of every driver matching `model`, best match first.
    pub async fn ppds_for_model(&self, model: &str) -> Result<Vec<String>> {
        let entries = self.catalog.entries().await?;
        Ok(match_model(entries, model)
            .into_iter()
            .map(|entry| entry.ppd_name)
            .collect())
    }

    /// Jobs on `name`, through the job manager.
    pub async fn jobs_for(&self, name: &str, include_completed: bool) -> Result<Vec<PrintJob>> {
        self.jobs.jobs_for_printer(name, include_completed).await
    }

    /// Cancel every active job queued on `name`.
    pub async fn cancel_jobs_on_printer(&self, name: &str) -> Result<BatchOutcome> {
        if !self.contains(name).await? {
            return Err(printer_missing(name));
        }
        self.jobs.cancel_jobs_on(name).await
    }

    // -- Options: spooler store ------------------------------------------

    /// The spooler's stored default options for `name`.
    pub async fn stored_options(&self, name: &str) -> Result<Vec<PrinterOption>> {
        if !self.contains(name).await? {
            return Err(SpoolwerkError::PrinterNotFound(name.to_string()));
        }
        self.spooler.default_options(name).await
    }

    pub async fn apply_option(&self, name: &str, option: &str) -> Result<()> {
        self.apply_options(name, &[option]).await
    }

    /// Merge `key=value` strings into the stored defaults of `name`.
    ///
    /// Existing keys keep their position, new keys are appended.  Nothing is
    /// written when the merge changes nothing.
    #[instrument(skip(self, options), fields(count = options.len()))]
    pub async fn apply_options<S: AsRef<str> + Sync>(&self, name: &str, options: &[S]) -> Result<()> {
        let updates = parse_options(options)?;

        let _guard = self.locks.lock(name).await;
        if !self.contains(name).await? {
            return Err(SpoolwerkError::PrinterNotFound(name.to_string()));
        }
        if self.merge_stored(name, &updates).await? {
            info!("stored options updated");
        }
        Ok(())
    }

    /// Merge `updates` into the spooler's stored options for `name`, writing
    /// only when something changed.  Callers hold the name lock.
    async fn merge_stored(&self, name: &str, updates: &[PrinterOption]) -> Result<bool> {
        if updates.is_empty() {
            return Ok(false);
        }
        let mut stored = self.spooler.default_options(name).await?;
        if !merge_options(&mut stored, updates) {
            debug!("stored options already up to date");
            return Ok(false);
        }
        self.spooler.set_default_options(name, &stored).await?;
        Ok(true)
    }

    // -- Options: PPD defaults -------------------------------------------

    pub async fn apply_ppd_option(&self, name: &str, option: &str) -> Result<()> {
        self.apply_ppd_options(name, &[option]).await
    }

    /// Rewrite the `*Default` directives of the installed PPD of `name` and
    /// have the spooler reload it.
    #[instrument(skip(self, options), fields(count = options.len()))]
    pub async fn apply_ppd_options<S: AsRef<str> + Sync>(&self, name: &str, options: &[S]) -> Result<()> {
        let updates = parse_options(options)?;

        let _guard = self.locks.lock(name).await;
        if !self.contains(name).await? {
            return Err(SpoolwerkError::PrinterNotFound(name.to_string()));
        }
        let path = self.spooler.ppd_path(name).await?;

        let target = path.clone();
        let changed = tokio::task::spawn_blocking(move || ppd::patch_file(&target, &updates))
            .await
            .map_err(|e| SpoolwerkError::io_failure("PPD patch task", e))??;
        if !changed {
            debug!("PPD already up to date");
            return Ok(());
        }
        self.spooler.reload_ppd(name, &path).await?;
        info!("PPD defaults updated");
        Ok(())
    }
}

fn printer_missing(name: &str) -> SpoolwerkError {
    SpoolwerkError::NotFound(format!("printer '{name}'"))
}

fn registration_failed(name: &str, err: &SpoolwerkError) -> SpoolwerkError {
    SpoolwerkError::RegistrationFailed {
        printer: name.to_string(),
        message: err.raw_message(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use spoolwerk_core::types::{DriverEntry, JobState};

    use crate::memory::{FailPoint, MemoryCatalog, MemorySpooler};

    const PPD: &str = "*PPD-Adobe: \"4.3\"\n*NickName: \"Acme LaserWriter 9000\"\n\
        *OpenUI *Duplex/Duplex: PickOne\n*DefaultDuplex: None\n\
        *Duplex None/Off: \"\"\n*Duplex DuplexNoTumble/Long Edge: \"\"\n*CloseUI: *Duplex\n";

    struct Fixture {
        spooler: Arc<MemorySpooler>,
        registry: PrinterRegistry,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn driver_file(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, PPD).expect("write");
            path
        }

        fn installed_ppd(&self, name: &str) -> String {
            std::fs::read_to_string(self.dir.path().join("installed").join(format!("{name}.ppd")))
                .expect("installed PPD")
        }
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let installed = dir.path().join("installed");
        std::fs::create_dir(&installed).expect("mkdir");

        let spooler = Arc::new(MemorySpooler::with_ppd_dir(&installed));
        let catalog = MemoryCatalog::new(vec![
            DriverEntry {
                ppd_name: "acme/lw9000.ppd".into(),
                make_and_model: "Acme LaserWriter 9000".into(),
                path: None,
                options: ppd::parse_options(PPD),
            },
            DriverEntry {
                ppd_name: "acme/lw9000-duplex.ppd".into(),
                make_and_model: "Acme LaserWriter 9000 Duplex".into(),
                path: None,
                options: Vec::new(),
            },
        ]);
        let registry = PrinterRegistry::new(
            spooler.clone(),
            Arc::new(catalog),
            &SpoolwerkConfig::default(),
        )
        .expect("registry");
        Fixture {
            spooler,
            registry,
            dir,
        }
    }

    fn printer(name: &str) -> Printer {
        Printer::builder()
            .name(name)
            .host("10.0.0.5")
            .protocol("ipp")
            .model("Acme LaserWriter 9000")
            .build()
            .expect("printer")
    }

    #[tokio::test]
    async fn add_then_remove_round_trip() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");

        let names = fx.registry.names_of_installed_printers().await.expect("names");
        assert_eq!(names.iter().filter(|n| *n == "lab").count(), 1);

        let installed = fx.registry.installed_printers().await.expect("installed");
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].uri(), "ipp://10.0.0.5");
        assert_eq!(installed[0].status(), spoolwerk_core::types::PrinterState::Idle);

        fx.registry.remove_printer("lab").await.expect("remove");
        assert!(!fx.registry.names_of_installed_printers().await.expect("names").contains("lab"));
        assert!(fx.registry.remove_printer("lab").await.expect_err("gone").is_not_found());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");
        assert!(matches!(
            fx.registry.add_printer(&printer("lab")).await,
            Err(SpoolwerkError::DuplicateName(name)) if name == "lab"
        ));
    }

    #[tokio::test]
    async fn driver_preference_order() {
        let fx = fixture();

        // Local PPD wins.
        let local = fx.driver_file("local.ppd");
        let with_ppd = Printer::builder()
            .name("a")
            .host("h")
            .protocol("socket")
            .model("Unknown Model")
            .ppd(&local)
            .build()
            .expect("printer");
        fx.registry.add_printer(&with_ppd).await.expect("add a");
        assert_eq!(fx.spooler.driver_of("a"), Some(Driver::File(local.clone())));

        // Then the URL.
        let with_url = Printer::builder()
            .name("b")
            .host("h")
            .protocol("socket")
            .model("Unknown Model")
            .ppd_url(format!("file://{}", local.display()))
            .build()
            .expect("printer");
        fx.registry.add_printer(&with_url).await.expect("add b");
        assert!(matches!(fx.spooler.driver_of("b"), Some(Driver::File(p)) if p != local));
        assert!(fx.installed_ppd("b").contains("Acme LaserWriter 9000"));

        // Then the catalog, exact match first.
        fx.registry.add_printer(&printer("c")).await.expect("add c");
        assert_eq!(
            fx.spooler.driver_of("c"),
            Some(Driver::Catalog("acme/lw9000.ppd".into()))
        );
    }

    #[tokio::test]
    async fn unresolvable_driver_registers_nothing() {
        let fx = fixture();
        let orphan = Printer::builder()
            .name("orphan")
            .host("h")
            .protocol("lpd")
            .model("Nobody Makes This")
            .ppd_url("file:///nonexistent/driver.ppd")
            .build()
            .expect("printer");
        assert!(matches!(
            fx.registry.add_printer(&orphan).await,
            Err(SpoolwerkError::DriverUnresolved(_))
        ));
        assert!(fx.registry.names_of_installed_printers().await.expect("names").is_empty());
    }

    #[tokio::test]
    async fn spooler_refusal_is_registration_failure() {
        let fx = fixture();
        fx.spooler.fail_on(FailPoint::AddDestination);
        match fx.registry.add_printer(&printer("lab")).await {
            Err(SpoolwerkError::RegistrationFailed { printer, message }) => {
                assert_eq!(printer, "lab");
                assert!(message.contains("injected failure"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_option_write_rolls_back() {
        let fx = fixture();
        fx.spooler.fail_on(FailPoint::SetDefaultOptions);
        let with_options = Printer::builder()
            .name("lab")
            .host("h")
            .protocol("ipp")
            .model("Acme LaserWriter 9000")
            .option("Duplex=None")
            .build()
            .expect("printer");
        assert!(matches!(
            fx.registry.add_printer(&with_options).await,
            Err(SpoolwerkError::RegistrationFailed { .. })
        ));
        assert!(fx.registry.names_of_installed_printers().await.expect("names").is_empty());
    }

    #[tokio::test]
    async fn removal_failure_keeps_raw_message() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");
        fx.spooler.fail_on(FailPoint::RemoveDestination);
        assert!(matches!(
            fx.registry.remove_printer("lab").await,
            Err(SpoolwerkError::RemovalFailed { message, .. }) if message.contains("RemoveDestination")
        ));
    }

    #[tokio::test]
    async fn enable_and_disable() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");
        fx.registry.disable_printer("lab").await.expect("disable");
        let dests = fx.spooler.destinations().await.expect("list");
        assert!(!dests[0].accepting_jobs);
        fx.registry.enable_printer("lab").await.expect("enable");
        assert!(fx.registry.enable_printer("nope").await.expect_err("missing").is_not_found());
    }

    #[tokio::test]
    async fn catalog_queries() {
        let fx = fixture();
        let ppds = fx.registry.ppds_for_model("acme laserwriter 9000").await.expect("ppds");
        assert_eq!(ppds, ["acme/lw9000.ppd", "acme/lw9000-duplex.ppd"]);
        let options = fx.registry.options_for_model("Acme LaserWriter 9000").await.expect("opts");
        assert_eq!(options[0].keyword, "Duplex");
        assert!(fx.registry.ppds_for_model("Zebra").await.expect("none").is_empty());
        assert!(fx.registry.options_for_model("Zebra").await.expect("none").is_empty());
    }

    #[tokio::test]
    async fn stored_options_merge_in_place() {
        let fx = fixture();
        let with_options = Printer::builder()
            .name("lab")
            .host("h")
            .protocol("ipp")
            .model("Acme LaserWriter 9000")
            .options(["Key=A", "media=a4"])
            .build()
            .expect("printer");
        fx.registry.add_printer(&with_options).await.expect("add");

        fx.registry.apply_option("lab", "Key=B").await.expect("apply");
        let stored = fx.registry.stored_options("lab").await.expect("stored");
        assert_eq!(
            stored,
            vec![PrinterOption::new("Key", "B"), PrinterOption::new("media", "a4")]
        );

        let writes = fx.spooler.option_write_count("lab");
        fx.registry.apply_option("lab", "Key=B").await.expect("reapply");
        assert_eq!(fx.spooler.option_write_count("lab"), writes);
        assert_eq!(fx.registry.stored_options("lab").await.expect("stored"), stored);
    }

    #[tokio::test]
    async fn malformed_option_changes_nothing() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");
        fx.registry.apply_option("lab", "Key=A").await.expect("apply");
        let before = fx.registry.stored_options("lab").await.expect("stored");

        assert!(matches!(
            fx.registry.apply_options("lab", &["Key=B", "novalue"]).await,
            Err(SpoolwerkError::OptionSyntaxError(s)) if s == "novalue"
        ));
        assert!(matches!(
            fx.registry.apply_ppd_option("lab", "novalue").await,
            Err(SpoolwerkError::OptionSyntaxError(_))
        ));
        assert_eq!(fx.registry.stored_options("lab").await.expect("stored"), before);
    }

    #[tokio::test]
    async fn option_paths_require_printer() {
        let fx = fixture();
        assert!(matches!(
            fx.registry.apply_option("ghost", "A=B").await,
            Err(SpoolwerkError::PrinterNotFound(_))
        ));
        assert!(matches!(
            fx.registry.apply_ppd_option("ghost", "A=B").await,
            Err(SpoolwerkError::PrinterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn ppd_options_patch_and_reload() {
        let fx = fixture();
        let local = fx.driver_file("local.ppd");
        let lab = Printer::builder()
            .name("lab")
            .host("h")
            .protocol("ipp")
            .model("Acme")
            .ppd(&local)
            .build()
            .expect("printer");
        fx.registry.add_printer(&lab).await.expect("add");

        fx.registry
            .apply_ppd_options("lab", &["Duplex=DuplexNoTumble", "PageSize=A4"])
            .await
            .expect("patch");
        let text = fx.installed_ppd("lab");
        assert!(text.contains("*DefaultDuplex: DuplexNoTumble\n"));
        assert!(text.ends_with("*DefaultPageSize: A4\n"));
        assert_eq!(fx.spooler.reload_count("lab"), 1);

        // Unchanged values do not trigger another reload.
        fx.registry.apply_ppd_option("lab", "PageSize=A4").await.expect("again");
        assert_eq!(fx.spooler.reload_count("lab"), 1);

        // The source driver file is untouched, and the store path is separate.
        assert_eq!(std::fs::read_to_string(&local).expect("read"), PPD);
        assert!(fx.registry.stored_options("lab").await.expect("stored").is_empty());
    }

    #[tokio::test]
    async fn concurrent_ppd_patches_serialise() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = fx.registry.clone();
                tokio::spawn(async move {
                    let option = format!("Opt{i}=Value{i}");
                    registry.apply_ppd_option("lab", &option).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("patch");
        }

        let text = fx.installed_ppd("lab");
        for i in 0..8 {
            assert!(text.contains(&format!("*DefaultOpt{i}: Value{i}\n")));
        }
        let leftovers = std::fs::read_dir(fx.dir.path().join("installed"))
            .expect("read_dir")
            .count();
        assert_eq!(leftovers, 1);
        assert_eq!(fx.spooler.reload_count("lab"), 8);
    }

    #[tokio::test]
    async fn registration_merges_into_leftover_store_entry() {
        let fx = fixture();
        fx.spooler.seed_options(
            "lab",
            vec![PrinterOption::new("media", "letter"), PrinterOption::new("sides", "one-sided")],
        );
        let with_options = Printer::builder()
            .name("lab")
            .host("10.0.0.5")
            .protocol("ipp")
            .model("Acme LaserWriter 9000")
            .options(["media=a4", "copies=2"])
            .build()
            .expect("printer");
        fx.registry.add_printer(&with_options).await.expect("add");

        assert_eq!(
            fx.registry.stored_options("lab").await.expect("stored"),
            vec![
                PrinterOption::new("media", "a4"),
                PrinterOption::new("sides", "one-sided"),
                PrinterOption::new("copies", "2"),
            ]
        );
        assert_eq!(fx.spooler.option_write_count("lab"), 1);
    }

    #[tokio::test]
    async fn concurrent_store_updates_keep_every_key() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = fx.registry.clone();
                tokio::spawn(async move {
                    let option = format!("opt{i}=value{i}");
                    registry.apply_option("lab", &option).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("apply");
        }

        let stored = fx.registry.stored_options("lab").await.expect("stored");
        assert_eq!(stored.len(), 8);
        for i in 0..8 {
            assert!(stored.contains(&PrinterOption::new(format!("opt{i}"), format!("value{i}"))));
        }
        assert_eq!(fx.spooler.option_write_count("lab"), 8);
    }

    #[tokio::test]
    async fn jobs_through_registry() {
        let fx = fixture();
        fx.registry.add_printer(&printer("lab")).await.expect("add");
        let file = fx.dir.path().join("doc.txt");
        std::fs::write(&file, "hello").expect("write");

        let job = fx.registry.jobs().send_file(Path::new(&file), "lab").await.expect("send");
        assert_eq!(job.name(), "doc.txt");
        assert_eq!(fx.registry.jobs_for("lab", false).await.expect("jobs").len(), 1);

        let outcome = fx.registry.cancel_jobs_on_printer("lab").await.expect("cancel");
        assert_eq!(outcome.succeeded, vec![job.jid().expect("jid")]);
        let all = fx.registry.jobs_for("lab", true).await.expect("jobs");
        assert_eq!(all[0].state(), JobState::Canceled);
        assert!(
            fx.registry
                .cancel_jobs_on_printer("ghost")
                .await
                .expect_err("missing")
                .is_not_found()
        );
    }
}
