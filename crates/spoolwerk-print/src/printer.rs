// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The printer configuration record and its validation.
//
// A `Printer` is built through `PrinterBuilder`, which fails fast on missing
// required fields (name, host, protocol, model), malformed names or hosts,
// and malformed options.  The device URI is never stored: it is recomputed from
// protocol, host, and port so it cannot drift from them.

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{Destination, PrinterOption, PrinterState, VersionedRecord};

use crate::options::merge_options;
use crate::protocol::{self, Protocol};

/// Longest destination name the scheduler accepts.
const MAX_NAME_LEN: usize = 127;

/// Characters the scheduler refuses in a destination name.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', '?', '\'', '"', '#'];

/// Characters that would end or split the authority part of a device URI.
const FORBIDDEN_HOST_CHARS: &[char] = &['/', '\\', '@', '?', '#'];

/// A printer destination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    name: String,
    host: String,
    protocol: Protocol,
    /// `None` = use the protocol's default (or auto-detect).
    port: Option<u16>,
    description: Option<String>,
    location: Option<String>,
    model: String,
    ppd: Option<PathBuf>,
    ppd_url: Option<String>,
    options: Vec<PrinterOption>,
    #[serde(skip, default = "unknown_state")]
    status: PrinterState,
    #[serde(skip)]
    status_message: String,
}

fn unknown_state() -> PrinterState {
    PrinterState::Unknown
}

impl Printer {
    pub fn builder() -> PrinterBuilder {
        PrinterBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Explicitly configured port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Port the device URI will actually use.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.protocol.default_port())
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn ppd(&self) -> Option<&Path> {
        self.ppd.as_deref()
    }

    pub fn ppd_url(&self) -> Option<&str> {
        self.ppd_url.as_deref()
    }

    /// Initial options, in order, keys unique.
    pub fn options(&self) -> &[PrinterOption] {
        &self.options
    }

    /// Last state observed from the spooler.  Not authoritative.
    pub fn status(&self) -> PrinterState {
        self.status
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// Device URI derived from protocol, host, and port.
    pub fn uri(&self) -> String {
        protocol::build_uri(self.protocol, &self.host, self.port)
    }

    /// Rebuild a printer from a destination reported by the spooler.
    ///
    /// Returns `None` when the device URI uses a scheme outside the
    /// supported protocol set (usb, file, ...).
    pub(crate) fn from_destination(dest: &Destination) -> Option<Self> {
        let (protocol, host, port) = protocol::parse_uri(&dest.uri)?;
        Some(Self {
            name: dest.name.clone(),
            host,
            protocol,
            port,
            description: dest.description.clone(),
            location: dest.location.clone(),
            model: dest.make_and_model.clone().unwrap_or_default(),
            ppd: None,
            ppd_url: None,
            options: Vec::new(),
            status: dest.state,
            status_message: dest.state_message.clone(),
        })
    }

    pub(crate) fn with_options(mut self, options: Vec<PrinterOption>) -> Self {
        self.options = options;
        self
    }

    /// Wrap the configuration in a versioned envelope for persistence.
    pub fn to_record(&self) -> VersionedRecord<Printer> {
        VersionedRecord::new(self.clone())
    }

    /// Restore a persisted printer, re-checking the invariants the builder
    /// enforces.
    pub fn from_record(record: VersionedRecord<Printer>) -> Result<Self> {
        let printer = record.into_current()?;
        validate_name(&printer.name)?;
        validate_host(&printer.host)?;
        if printer.model.trim().is_empty() {
            return Err(SpoolwerkError::MissingField("model"));
        }
        Ok(printer)
    }
}

/// Check a destination name against the scheduler's naming rules.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| SpoolwerkError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 127 bytes"));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("name contains whitespace or control characters"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(invalid(&format!("name contains '{c}'")));
    }
    Ok(())
}

/// Check that `host` is a bare FQDN or IP address that can sit in the
/// authority part of a device URI.
///
/// IPv6 literals are accepted with or without brackets.  A port must be
/// given through the port field, never appended to the host.
pub fn validate_host(host: &str) -> Result<()> {
    let invalid = |reason: &str| SpoolwerkError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    if host.trim().is_empty() {
        return Err(SpoolwerkError::MissingField("host"));
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("host contains whitespace or control characters"));
    }
    if let Some(c) = host.chars().find(|c| FORBIDDEN_HOST_CHARS.contains(c)) {
        return Err(invalid(&format!("host contains '{c}'")));
    }

    let literal = host
        .strip_prefix('[')
        .map(|inner| inner.strip_suffix(']').ok_or_else(|| invalid("unclosed '['")))
        .transpose()?;
    match literal {
        Some(inner) if inner.parse::<Ipv6Addr>().is_ok() => Ok(()),
        Some(_) => Err(invalid("bracketed host is not an IPv6 address")),
        None if host.contains(['[', ']']) => Err(invalid("stray bracket")),
        None if host.contains(':') && host.parse::<Ipv6Addr>().is_err() => {
            Err(invalid("host carries a port; set the port field instead"))
        }
        None => Ok(()),
    }
}

/// Builder validating required fields at construction time.
#[derive(Debug, Default, Clone)]
pub struct PrinterBuilder {
    name: Option<String>,
    host: Option<String>,
    protocol: Option<String>,
    port: Option<u16>,
    description: Option<String>,
    location: Option<String>,
    model: Option<String>,
    ppd: Option<PathBuf>,
    ppd_url: Option<String>,
    options: Vec<String>,
}

impl PrinterBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Protocol identifier (`ipp`, `lpd`, `socket`, ...).
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Local driver file (`.ppd` or `.ppd.gz`).
    pub fn ppd(mut self, path: impl Into<PathBuf>) -> Self {
        self.ppd = Some(path.into());
        self
    }

    /// URL to download the driver from when no local file is given.
    pub fn ppd_url(mut self, url: impl Into<String>) -> Self {
        self.ppd_url = Some(url.into());
        self
    }

    /// Add one `key=value` option.  A repeated key replaces the earlier value.
    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<Printer> {
        let name = required(self.name, "name")?;
        let host = required(self.host, "host")?;
        let protocol = required(self.protocol, "protocol")?;
        let model = required(self.model, "model")?;

        validate_name(&name)?;
        validate_host(&host)?;
        let protocol: Protocol = protocol.parse()?;

        let parsed = self
            .options
            .iter()
            .map(|o| o.parse::<PrinterOption>())
            .collect::<Result<Vec<_>>>()?;
        let mut options = Vec::with_capacity(parsed.len());
        merge_options(&mut options, &parsed);

        Ok(Printer {
            name,
            host,
            protocol,
            port: self.port,
            description: self.description,
            location: self.location,
            model,
            ppd: self.ppd,
            ppd_url: self.ppd_url,
            options,
            status: PrinterState::Unknown,
            status_message: String::new(),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SpoolwerkError::MissingField(field)),
    }
}
