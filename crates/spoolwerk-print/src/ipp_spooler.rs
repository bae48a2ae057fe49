// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spooler backed by a CUPS scheduler, spoken to over IPP.
//
// Operations used:
//   - CUPS-Get-Printers, CUPS-Add-Modify-Printer, CUPS-Delete-Printer
//   - Pause-Printer / Resume-Printer, CUPS-Accept-Jobs / CUPS-Reject-Jobs
//   - Print-Job, Create-Job + Send-Document (multi-file jobs)
//   - Get-Jobs, Get-Job-Attributes, Hold-Job, Release-Job, Cancel-Job
//
// Administrative requests go to `<server>/admin/`.  Per-user default options
// live in the lpoptions file, as with the CUPS command-line tools.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipp::prelude::*;
use tracing::{debug, error, info, instrument};

use spoolwerk_core::config::SpoolwerkConfig;
use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{
    Destination, JobRecord, JobState, PrinterOption, PrinterState,
};

use crate::lpoptions::LpOptions;
use crate::spooler::{DestinationSpec, Driver, JobRequest, JobTicket, Spooler};

/// Printer attributes requested from CUPS-Get-Printers.
const PRINTER_ATTRIBUTES: &[&str] = &[
    "printer-name",
    "device-uri",
    "printer-info",
    "printer-location",
    "printer-make-and-model",
    "printer-state",
    "printer-state-message",
    "printer-is-accepting-jobs",
];

/// Job attributes requested from Get-Jobs / Get-Job-Attributes.
const JOB_ATTRIBUTES: &[&str] = &[
    "job-id",
    "job-name",
    "job-printer-uri",
    "job-originating-user-name",
    "job-k-octets",
    "time-at-creation",
    "job-state",
    "job-state-message",
    "job-state-reasons",
];

/// IPP `printer-state` value for a paused queue.
const PRINTER_STATE_STOPPED: i32 = 5;

type AttributeMap = std::collections::HashMap<String, IppAttribute>;

/// A spooler that drives a CUPS scheduler.
pub struct IppSpooler {
    /// Scheduler base URI without trailing slash, e.g. `ipp://localhost:631`.
    server: String,
    ppd_dir: PathBuf,
    lpoptions_path: PathBuf,
    user: String,
    ignore_tls_errors: bool,
    /// Serialises read-modify-write of the lpoptions file.
    lpoptions_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for IppSpooler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IppSpooler")
            .field("server", &self.server)
            .field("ppd_dir", &self.ppd_dir)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl IppSpooler {
    pub fn new(config: &SpoolwerkConfig) -> Result<Self> {
        let server = config.server_uri.trim_end_matches('/').to_string();
        server
            .parse::<Uri>()
            .map_err(|e| SpoolwerkError::Spooler(format!("invalid server URI '{server}': {e}")))?;
        Ok(Self {
            server,
            ppd_dir: config.ppd_dir.clone(),
            lpoptions_path: config.lpoptions_path.clone(),
            user: config.requesting_user.clone(),
            ignore_tls_errors: config.ignore_tls_errors,
            lpoptions_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn printer_uri(&self, name: &str) -> String {
        format!("{}/printers/{name}", self.server)
    }

    fn admin_uri(&self) -> String {
        format!("{}/admin/", self.server)
    }

    fn root_uri(&self) -> String {
        format!("{}/", self.server)
    }

    /// A request for `operation` about `subject`, tagged with the requesting
    /// user.
    fn request(&self, operation: Operation, subject: &str, user: &str) -> Result<IppRequestResponse> {
        let uri = parse_uri(subject)?;
        let mut request = IppRequestResponse::new(IppVersion::v1_1(), operation, Some(uri));
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                IppAttribute::REQUESTING_USER_NAME,
                IppValue::NameWithoutLanguage(user.into()),
            ),
        );
        Ok(request)
    }

    fn job_request(&self, operation: Operation, jid: i32) -> Result<IppRequestResponse> {
        let mut request = self.request(operation, &self.root_uri(), &self.user)?;
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(IppAttribute::JOB_ID, IppValue::Integer(jid)),
        );
        Ok(request)
    }

    /// Send `request` to `target` and check the status.
    async fn send(
        &self,
        target: &str,
        name: &'static str,
        request: IppRequestResponse,
    ) -> Result<IppRequestResponse> {
        let client = AsyncIppClient::builder(parse_uri(target)?)
            .ignore_tls_errors(self.ignore_tls_errors)
            .build();

        debug!(operation = name, target, "sending IPP request");
        let response = client
            .send(request)
            .await
            .map_err(|e| SpoolwerkError::Spooler(format!("{name}: {e}")))?;

        let code = response.header().status_code();
        if code.is_success() {
            return Ok(response);
        }
        if matches!(code, StatusCode::ClientErrorNotFound) {
            return Err(SpoolwerkError::NotFound(format!("{name}: {code:?}")));
        }
        error!(operation = name, status = ?code, "IPP request failed");
        Err(SpoolwerkError::Spooler(format!("{name} returned status {code:?}")))
    }

    async fn admin(&self, operation: Operation, name: &'static str, printer: &str) -> Result<()> {
        let request = self.request(operation, &self.printer_uri(printer), &self.user)?;
        self.send(&self.admin_uri(), name, request).await?;
        Ok(())
    }

    /// Upload `ppd` as the driver of `printer` (CUPS-Add-Modify-Printer).
    async fn upload_ppd(&self, printer: &str, ppd: &Path) -> Result<()> {
        let bytes = tokio::fs::read(ppd)
            .await
            .map_err(|e| SpoolwerkError::io_failure(format!("read {}", ppd.display()), e))?;
        let mut request =
            self.request(Operation::CupsAddModifyPrinter, &self.printer_uri(printer), &self.user)?;
        *request.payload_mut() = IppPayload::new(Cursor::new(bytes));
        self.send(&self.admin_uri(), "CUPS-Add-Modify-Printer", request)
            .await?;
        Ok(())
    }

    async fn query_jobs(&self, target: &str, which: &str) -> Result<Vec<JobRecord>> {
        let mut request = self.request(Operation::GetJobs, target, &self.user)?;
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("which-jobs", IppValue::Keyword(which.into())),
        );
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            requested_attributes(JOB_ATTRIBUTES),
        );
        let response = self.send(target, "Get-Jobs", request).await?;

        let mut jobs: Vec<JobRecord> = response
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .filter_map(|group| job_record(group.attributes()))
            .collect();
        jobs.sort_by_key(|job| job.jid);
        Ok(jobs)
    }

    async fn update_lpoptions<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut LpOptions) + Send + 'static,
    {
        let _guard = self.lpoptions_lock.lock().await;
        let path = self.lpoptions_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut store = LpOptions::load(&path)?;
            update(&mut store);
            store.save(&path)
        })
        .await
        .map_err(|e| SpoolwerkError::io_failure("lpoptions task", e))?
    }
}

#[async_trait]
impl Spooler for IppSpooler {
    #[instrument(skip(self))]
    async fn destinations(&self) -> Result<Vec<Destination>> {
        let target = self.root_uri();
        let mut request = self.request(Operation::CupsGetPrinters, &target, &self.user)?;
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            requested_attributes(PRINTER_ATTRIBUTES),
        );
        let response = self.send(&target, "CUPS-Get-Printers", request).await?;

        let destinations: Vec<Destination> = response
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
            .filter_map(|group| destination(group.attributes()))
            .collect();
        debug!(count = destinations.len(), "destinations listed");
        Ok(destinations)
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, uri = %spec.uri))]
    async fn add_destination(&self, spec: DestinationSpec) -> Result<()> {
        let mut request =
            self.request(Operation::CupsAddModifyPrinter, &self.printer_uri(&spec.name), &self.user)?;
        let attributes = request.attributes_mut();
        attributes.add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new("device-uri", IppValue::Uri(spec.uri.clone().into())),
        );
        attributes.add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new("printer-is-accepting-jobs", IppValue::Boolean(false)),
        );
        attributes.add(
            DelimiterTag::PrinterAttributes,
            IppAttribute::new("printer-state", IppValue::Enum(PRINTER_STATE_STOPPED)),
        );
        if let Some(info) = &spec.description {
            attributes.add(
                DelimiterTag::PrinterAttributes,
                IppAttribute::new("printer-info", IppValue::TextWithoutLanguage(info.clone().into())),
            );
        }
        if let Some(location) = &spec.location {
            attributes.add(
                DelimiterTag::PrinterAttributes,
                IppAttribute::new(
                    "printer-location",
                    IppValue::TextWithoutLanguage(location.clone().into()),
                ),
            );
        }

        match &spec.driver {
            Driver::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    SpoolwerkError::io_failure(format!("read {}", path.display()), e)
                })?;
                *request.payload_mut() = IppPayload::new(Cursor::new(bytes));
            }
            Driver::Catalog(ppd_name) => {
                request.attributes_mut().add(
                    DelimiterTag::PrinterAttributes,
                    IppAttribute::new("ppd-name", IppValue::NameWithoutLanguage(ppd_name.clone().into())),
                );
            }
        }

        self.send(&self.admin_uri(), "CUPS-Add-Modify-Printer", request)
            .await?;
        info!("destination created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_destination(&self, name: &str) -> Result<()> {
        self.admin(Operation::CupsDeletePrinter, "CUPS-Delete-Printer", name)
            .await?;
        let dest = name.to_string();
        self.update_lpoptions(move |store| {
            store.remove(&dest);
        })
        .await?;
        info!("destination deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        if enabled {
            self.admin(Operation::ResumePrinter, "Resume-Printer", name).await?;
            self.admin(Operation::CupsAcceptJobs, "CUPS-Accept-Jobs", name).await
        } else {
            self.admin(Operation::PausePrinter, "Pause-Printer", name).await?;
            self.admin(Operation::CupsRejectJobs, "CUPS-Reject-Jobs", name).await
        }
    }

    async fn default_options(&self, name: &str) -> Result<Vec<PrinterOption>> {
        let path = self.lpoptions_path.clone();
        let store = tokio::task::spawn_blocking(move || LpOptions::load(&path))
            .await
            .map_err(|e| SpoolwerkError::io_failure("lpoptions task", e))??;
        Ok(store.options_for(name))
    }

    async fn set_default_options(&self, name: &str, options: &[PrinterOption]) -> Result<()> {
        let dest = name.to_string();
        let options = options.to_vec();
        self.update_lpoptions(move |store| store.set_options(&dest, options))
            .await
    }

    async fn ppd_path(&self, name: &str) -> Result<PathBuf> {
        let path = self.ppd_dir.join(format!("{name}.ppd"));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(SpoolwerkError::NotFound(format!("PPD {}", path.display())))
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn reload_ppd(&self, name: &str, path: &Path) -> Result<()> {
        self.upload_ppd(name, path).await
    }

    #[instrument(skip(self, request), fields(dest = %request.dest, files = request.files.len()))]
    async fn submit_job(&self, request: JobRequest) -> Result<JobTicket> {
        let target = self.printer_uri(&request.dest);
        let mut documents = Vec::with_capacity(request.files.len());
        for file in &request.files {
            let bytes = tokio::fs::read(file)
                .await
                .map_err(|e| SpoolwerkError::io_failure(format!("read {}", file.display()), e))?;
            documents.push(bytes);
        }
        let size: u64 = documents.iter().map(|d| d.len() as u64).sum();

        let single = documents.len() == 1;
        let operation = if single { Operation::PrintJob } else { Operation::CreateJob };
        let mut ipp_request = self.request(operation, &target, &request.user)?;
        ipp_request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new(
                IppAttribute::JOB_NAME,
                IppValue::NameWithoutLanguage(request.title.clone().into()),
            ),
        );
        for option in &request.options {
            ipp_request.attributes_mut().add(
                DelimiterTag::JobAttributes,
                IppAttribute::new(&option.key, encode_option_value(&option.value)),
            );
        }

        let mut documents = documents.into_iter();
        if single {
            if let Some(bytes) = documents.next() {
                *ipp_request.payload_mut() = IppPayload::new(Cursor::new(bytes));
            }
        }
        let response = self
            .send(&target, if single { "Print-Job" } else { "Create-Job" }, ipp_request)
            .await?;
        let jid = response
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .find_map(|group| integer(group.attributes(), "job-id"))
            .ok_or_else(|| SpoolwerkError::Spooler("response is missing job-id".into()))?;

        let remaining = documents.len();
        for (index, bytes) in documents.enumerate() {
            let mut send = self.request(Operation::SendDocument, &target, &request.user)?;
            let attributes = send.attributes_mut();
            attributes.add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new(IppAttribute::JOB_ID, IppValue::Integer(jid)),
            );
            attributes.add(
                DelimiterTag::OperationAttributes,
                IppAttribute::new("last-document", IppValue::Boolean(index + 1 == remaining)),
            );
            *send.payload_mut() = IppPayload::new(Cursor::new(bytes));
            self.send(&target, "Send-Document", send).await?;
        }

        info!(jid, size, "job accepted");
        Ok(JobTicket {
            jid,
            user: request.user,
            submitted_at: Utc::now(),
            size,
        })
    }

    async fn jobs(&self, dest: Option<&str>, include_completed: bool) -> Result<Vec<JobRecord>> {
        let target = match dest {
            Some(name) => self.printer_uri(name),
            None => self.root_uri(),
        };
        let which = if include_completed { "all" } else { "not-completed" };
        self.query_jobs(&target, which).await
    }

    async fn job(&self, jid: i32) -> Result<Option<JobRecord>> {
        let mut request = self.job_request(Operation::GetJobAttributes, jid)?;
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            requested_attributes(JOB_ATTRIBUTES),
        );
        let response = match self
            .send(&self.root_uri(), "Get-Job-Attributes", request)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(response
            .attributes()
            .groups_of(DelimiterTag::JobAttributes)
            .find_map(|group| job_record(group.attributes())))
    }

    async fn hold_job(&self, jid: i32) -> Result<()> {
        let request = self.job_request(Operation::HoldJob, jid)?;
        self.send(&self.root_uri(), "Hold-Job", request).await?;
        Ok(())
    }

    async fn release_job(&self, jid: i32) -> Result<()> {
        let request = self.job_request(Operation::ReleaseJob, jid)?;
        self.send(&self.root_uri(), "Release-Job", request).await?;
        Ok(())
    }

    async fn cancel_job(&self, jid: i32) -> Result<()> {
        let request = self.job_request(Operation::CancelJob, jid)?;
        self.send(&self.root_uri(), "Cancel-Job", request).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Attribute helpers
// ---------------------------------------------------------------------------

fn parse_uri(uri: &str) -> Result<Uri> {
    uri.parse()
        .map_err(|e| SpoolwerkError::Spooler(format!("invalid URI '{uri}': {e}")))
}

fn requested_attributes(names: &[&str]) -> IppAttribute {
    let values = names
        .iter()
        .map(|name| IppValue::Keyword((*name).into()))
        .collect();
    IppAttribute::new("requested-attributes", IppValue::Array(values))
}

/// Encode an option value the way the CUPS tools do: integers and booleans
/// keep their type, comma-separated values become a set, anything else is a
/// keyword.
pub(crate) fn encode_option_value(value: &str) -> IppValue {
    if value.contains(',') {
        let parts = value
            .split(',')
            .map(|part| encode_option_value(part.trim()))
            .collect();
        return IppValue::Array(parts);
    }
    if let Ok(number) = value.parse::<i32>() {
        return IppValue::Integer(number);
    }
    match value {
        "true" | "yes" | "on" => IppValue::Boolean(true),
        "false" | "no" | "off" => IppValue::Boolean(false),
        other => IppValue::Keyword(other.into()),
    }
}

fn text(attributes: &AttributeMap, name: &str) -> Option<String> {
    attributes
        .get(name)
        .map(|a| a.value().to_string())
        .filter(|s| !s.is_empty())
}

fn integer(attributes: &AttributeMap, name: &str) -> Option<i32> {
    attributes.get(name).and_then(|a| a.value().as_integer().copied())
}

fn enumeration(attributes: &AttributeMap, name: &str) -> Option<i32> {
    attributes.get(name).and_then(|a| a.value().as_enum().copied())
}

fn destination(attributes: &AttributeMap) -> Option<Destination> {
    let name = text(attributes, "printer-name")?;
    Some(Destination {
        name,
        uri: text(attributes, "device-uri").unwrap_or_default(),
        description: text(attributes, "printer-info"),
        location: text(attributes, "printer-location"),
        make_and_model: text(attributes, "printer-make-and-model"),
        state: enumeration(attributes, "printer-state")
            .map(PrinterState::from_ipp)
            .unwrap_or(PrinterState::Unknown),
        state_message: text(attributes, "printer-state-message").unwrap_or_default(),
        accepting_jobs: attributes
            .get("printer-is-accepting-jobs")
            .and_then(|a| a.value().as_boolean().copied())
            .unwrap_or(false),
    })
}

fn job_record(attributes: &AttributeMap) -> Option<JobRecord> {
    let jid = integer(attributes, "job-id")?;
    let state = enumeration(attributes, "job-state")
        .and_then(JobState::from_ipp)
        .unwrap_or(JobState::Submitted);
    let submitted_at = integer(attributes, "time-at-creation")
        .and_then(|secs| DateTime::<Utc>::from_timestamp(i64::from(secs), 0))
        .unwrap_or_else(Utc::now);
    let state_message = text(attributes, "job-state-message")
        .or_else(|| text(attributes, "job-state-reasons").filter(|r| r != "none"))
        .unwrap_or_default();

    Some(JobRecord {
        jid,
        name: text(attributes, "job-name").unwrap_or_default(),
        dest: text(attributes, "job-printer-uri")
            .as_deref()
            .map(queue_name)
            .unwrap_or_default(),
        user: text(attributes, "job-originating-user-name").unwrap_or_default(),
        size: integer(attributes, "job-k-octets")
            .map(|k| u64::try_from(k).unwrap_or(0) * 1024)
            .unwrap_or(0),
        submitted_at,
        state,
        state_message,
    })
}

/// Queue name from a printer URI such as `ipp://host/printers/lab`.
pub(crate) fn queue_name(uri: &str) -> String {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
