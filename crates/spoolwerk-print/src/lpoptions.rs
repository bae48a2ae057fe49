// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-user destination option store in the CUPS `lpoptions` format:
//
//   Default lab duplex=two-sided-long-edge
//   Dest office media=a4 job-sheets="none,none"
//
// Lines that are not `Dest`/`Default` entries (comments, instance entries
// such as `Dest lab/draft ...`) are kept verbatim.

use std::io::Write;
use std::path::Path;

use tracing::{debug, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::PrinterOption;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DestEntry {
    is_default: bool,
    name: String,
    options: Vec<PrinterOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Dest(DestEntry),
    Verbatim(String),
}

/// Parsed contents of an lpoptions file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LpOptions {
    lines: Vec<Line>,
}

impl LpOptions {
    /// Load the file at `path`; a missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SpoolwerkError::io_failure(
                format!("read {}", path.display()),
                e,
            )),
        }
    }

    pub fn parse(text: &str) -> Self {
        let lines = text.lines().map(parse_line).collect();
        Self { lines }
    }

    /// Options stored for `dest`, empty when it has no entry.
    pub fn options_for(&self, dest: &str) -> Vec<PrinterOption> {
        self.entry(dest)
            .map(|entry| entry.options.clone())
            .unwrap_or_default()
    }

    /// The destination marked `Default`, if any.
    pub fn default_destination(&self) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Dest(entry) if entry.is_default => Some(entry.name.as_str()),
            _ => None,
        })
    }

    /// Replace the stored options of `dest`, adding an entry if needed.
    pub fn set_options(&mut self, dest: &str, options: Vec<PrinterOption>) {
        if let Some(entry) = self.entry_mut(dest) {
            entry.options = options;
            return;
        }
        self.lines.push(Line::Dest(DestEntry {
            is_default: false,
            name: dest.to_string(),
            options,
        }));
    }

    /// Drop the entry of `dest`.  Returns whether one existed.
    pub fn remove(&mut self, dest: &str) -> bool {
        let before = self.lines.len();
        self.lines
            .retain(|line| !matches!(line, Line::Dest(entry) if entry.name == dest));
        self.lines.len() != before
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Verbatim(text) => out.push_str(text),
                Line::Dest(entry) => {
                    out.push_str(if entry.is_default { "Default " } else { "Dest " });
                    out.push_str(&entry.name);
                    for option in &entry.options {
                        out.push(' ');
                        out.push_str(&option.key);
                        out.push('=');
                        out.push_str(&quote(&option.value));
                    }
                }
            }
            out.push('\n');
        }
        out
    }

    /// Write the store atomically, creating the parent directory.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> Result<()> {
        let context = |action: &str| format!("{action} {}", path.display());
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| SpoolwerkError::io_failure(context("create directory for"), e))?;

        let mut scratch = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SpoolwerkError::io_failure(context("create scratch for"), e))?;
        scratch
            .write_all(self.render().as_bytes())
            .and_then(|()| scratch.as_file().sync_all())
            .map_err(|e| SpoolwerkError::io_failure(context("write scratch for"), e))?;
        scratch
            .persist(path)
            .map_err(|e| SpoolwerkError::io_failure(context("replace"), e.error))?;

        debug!("lpoptions saved");
        Ok(())
    }

    fn entry(&self, dest: &str) -> Option<&DestEntry> {
        self.lines.iter().find_map(|line| match line {
            Line::Dest(entry) if entry.name == dest => Some(entry),
            _ => None,
        })
    }

    fn entry_mut(&mut self, dest: &str) -> Option<&mut DestEntry> {
        self.lines.iter_mut().find_map(|line| match line {
            Line::Dest(entry) if entry.name == dest => Some(entry),
            _ => None,
        })
    }
}

fn parse_line(text: &str) -> Line {
    let verbatim = || Line::Verbatim(text.to_string());
    let mut tokens = tokenize(text).into_iter();

    let is_default = match tokens.next().as_deref() {
        Some(kw) if kw.eq_ignore_ascii_case("dest") => false,
        Some(kw) if kw.eq_ignore_ascii_case("default") => true,
        _ => return verbatim(),
    };
    let Some(name) = tokens.next() else {
        return verbatim();
    };
    if name.contains('/') {
        return verbatim();
    }

    let mut options = Vec::new();
    for token in tokens {
        let option = match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => PrinterOption::new(key, value),
            Some(_) => return verbatim(),
            // A bare keyword is a boolean option.
            None => PrinterOption::new(token, "true"),
        };
        options.push(option);
    }
    Line::Dest(DestEntry {
        is_default,
        name,
        options,
    })
}

/// Split on whitespace, honouring single/double quotes and backslash escapes.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            ('"' | '\'', None) => {
                quote = Some(c);
                in_token = true;
            }
            (c, Some(q)) if c == q => quote = None,
            (c, None) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (c, _) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn quote(value: &str) -> String {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'))
    {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# user defaults\n\
Default lab sides=two-sided-long-edge media=a4\n\
Dest office job-sheets=\"none, none\" landscape\n\
Dest lab/draft print-quality=3\n";

    #[test]
    fn parses_dest_and_default_entries() {
        let store = LpOptions::parse(SAMPLE);
        assert_eq!(store.default_destination(), Some("lab"));
        assert_eq!(
            store.options_for("lab"),
            vec![
                PrinterOption::new("sides", "two-sided-long-edge"),
                PrinterOption::new("media", "a4"),
            ]
        );
        assert_eq!(
            store.options_for("office"),
            vec![
                PrinterOption::new("job-sheets", "none, none"),
                PrinterOption::new("landscape", "true"),
            ]
        );
        assert!(store.options_for("missing").is_empty());
    }

    #[test]
    fn unrelated_lines_render_verbatim() {
        let rendered = LpOptions::parse(SAMPLE).render();
        assert!(rendered.starts_with("# user defaults\n"));
        assert!(rendered.contains("Dest lab/draft print-quality=3\n"));
        assert!(rendered.contains("Dest office job-sheets=\"none, none\" landscape=true\n"));
    }

    #[test]
    fn set_options_replaces_or_appends() {
        let mut store = LpOptions::parse(SAMPLE);
        store.set_options("lab", vec![PrinterOption::new("media", "letter")]);
        store.set_options("annex", vec![PrinterOption::new("copies", "2")]);

        let reparsed = LpOptions::parse(&store.render());
        assert_eq!(reparsed.options_for("lab"), vec![PrinterOption::new("media", "letter")]);
        assert_eq!(reparsed.options_for("annex"), vec![PrinterOption::new("copies", "2")]);
        assert_eq!(reparsed.default_destination(), Some("lab"));
    }

    #[test]
    fn remove_drops_only_plain_entry() {
        let mut store = LpOptions::parse(SAMPLE);
        assert!(store.remove("lab"));
        assert!(!store.remove("lab"));
        assert!(store.render().contains("Dest lab/draft"));
        assert_eq!(store.default_destination(), None);
    }

    #[test]
    fn missing_file_loads_empty_and_save_creates_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".cups").join("lpoptions");

        let mut store = LpOptions::load(&path).expect("load");
        assert_eq!(store, LpOptions::default());

        store.set_options("lab", vec![PrinterOption::new("note", "a \"b\"")]);
        store.save(&path).expect("save");

        let loaded = LpOptions::load(&path).expect("reload");
        assert_eq!(loaded.options_for("lab"), vec![PrinterOption::new("note", "a \"b\"")]);
    }
}
