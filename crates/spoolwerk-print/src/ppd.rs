// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PPD driver file handling: reading the option schema and rewriting the
// embedded `*Default<Key>: <value>` directives.
//
// PPD files are line-oriented ASCII, commonly with ISO-8859-1 translation
// strings.  Files that are not valid UTF-8 are decoded as Latin-1 and written
// back in the same encoding so untouched lines keep their exact bytes.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, instrument};

use spoolwerk_core::error::{Result, SpoolwerkError};
use spoolwerk_core::types::{OptionChoice, OptionDescriptor, PrinterOption};

/// Byte encoding a PPD file was read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpdEncoding {
    Utf8,
    Latin1,
}

/// Decode PPD bytes, falling back to Latin-1 for non-UTF-8 files.
pub fn decode(bytes: &[u8]) -> (String, PpdEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), PpdEncoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| char::from(b)).collect(),
            PpdEncoding::Latin1,
        ),
    }
}

/// Encode text back into the file's original encoding.
///
/// Characters outside Latin-1 become `?` in Latin-1 files.
pub fn encode(text: &str, encoding: PpdEncoding) -> Vec<u8> {
    match encoding {
        PpdEncoding::Utf8 => text.as_bytes().to_vec(),
        PpdEncoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Default directive patching
// ---------------------------------------------------------------------------

/// Rewrite `*Default<Key>: <old>` to `*Default<Key>: <value>` for every
/// option, appending the directive when the file has none.
///
/// Every other line, including its line ending, is preserved.
pub fn patch_defaults(text: &str, options: &[PrinterOption]) -> String {
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = text.split_inclusive('\n').map(str::to_owned).collect();

    for option in options {
        let directive = format!("*Default{}:", option.key);
        let replacement = format!("*Default{}: {}", option.key, option.value);
        let mut found = false;

        for line in lines.iter_mut().filter(|l| l.starts_with(&directive)) {
            let ending = line_ending(line);
            *line = format!("{replacement}{ending}");
            found = true;
        }

        if !found {
            if let Some(last) = lines.last_mut() {
                if !last.ends_with('\n') {
                    last.push_str(newline);
                }
            }
            lines.push(format!("{replacement}{newline}"));
        }
    }

    lines.concat()
}

fn line_ending(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Patch the PPD at `path` in place.
///
/// The new content is written to a scratch file in the same directory and
/// renamed over the original, so readers never observe a half-written file.
/// The scratch file is removed on every failure path.  Returns `false` when
/// the file already held every value and was left untouched.
#[instrument(skip(options), fields(path = %path.display(), count = options.len()))]
pub fn patch_file(path: &Path, options: &[PrinterOption]) -> Result<bool> {
    let context = |action: &str| format!("{action} {}", path.display());

    let bytes = std::fs::read(path).map_err(|e| SpoolwerkError::io_failure(context("read"), e))?;
    let (original, encoding) = decode(&bytes);
    let patched = patch_defaults(&original, options);
    if patched == original {
        debug!("PPD already holds requested defaults");
        return Ok(false);
    }

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut scratch = tempfile::Builder::new()
        .prefix(".spoolwerk-")
        .suffix(".ppd")
        .tempfile_in(dir)
        .map_err(|e| SpoolwerkError::io_failure(context("create scratch for"), e))?;

    scratch
        .write_all(&encode(&patched, encoding))
        .and_then(|()| scratch.as_file().sync_all())
        .map_err(|e| SpoolwerkError::io_failure(context("write scratch for"), e))?;

    // Keep the original file mode (the scheduler reads PPDs as another user).
    let permissions = std::fs::metadata(path)
        .map_err(|e| SpoolwerkError::io_failure(context("stat"), e))?
        .permissions();
    scratch
        .as_file()
        .set_permissions(permissions)
        .map_err(|e| SpoolwerkError::io_failure(context("chmod scratch for"), e))?;

    scratch
        .persist(path)
        .map_err(|e| SpoolwerkError::io_failure(context("replace"), e.error))?;

    info!("PPD defaults rewritten");
    Ok(true)
}

// ---------------------------------------------------------------------------
// Option schema
// ---------------------------------------------------------------------------

/// Extract the option schema declared by `*OpenUI` / `*CloseUI` blocks.
///
/// Options are returned in file order with their choices and the value of the
/// matching `*Default<Keyword>` directive.
pub fn parse_options(text: &str) -> Vec<OptionDescriptor> {
    let mut options: Vec<OptionDescriptor> = Vec::new();
    let mut defaults: HashMap<String, String> = HashMap::new();
    let mut current: Option<usize> = None;
    let mut in_string = false;

    for raw in text.lines() {
        let line = raw.trim_end();

        if in_string {
            // A quoted value spanning lines ends at the next odd quote.
            if line.matches('"').count() % 2 == 1 {
                in_string = false;
            }
            continue;
        }

        if let Some(rest) = line
            .strip_prefix("*OpenUI")
            .or_else(|| line.strip_prefix("*JCLOpenUI"))
        {
            if let Some(option) = parse_open_ui(rest) {
                options.push(option);
                current = Some(options.len() - 1);
            }
        } else if line.starts_with("*CloseUI") || line.starts_with("*JCLCloseUI") {
            current = None;
        } else if let Some(rest) = line.strip_prefix("*Default") {
            if let Some((keyword, value)) = rest.split_once(':') {
                defaults.insert(keyword.trim().to_string(), unquote(value).to_string());
            }
        } else if let Some(index) = current {
            if let Some(choice) = parse_choice(line, &options[index].keyword) {
                options[index].choices.push(choice);
            }
        }

        if line.starts_with('*') {
            if let Some((_, value)) = line.split_once(':') {
                if value.matches('"').count() % 2 == 1 {
                    in_string = true;
                }
            }
        }
    }

    for option in &mut options {
        option.default = defaults.remove(&option.keyword);
    }
    options
}

/// Parse the remainder of `*OpenUI *PageSize/Media Size: PickOne`.
fn parse_open_ui(rest: &str) -> Option<OptionDescriptor> {
    let spec = rest.trim_start().strip_prefix('*')?;
    let (name, _ui_type) = spec.split_once(':')?;
    let (keyword, text) = split_translation(name);
    if keyword.is_empty() {
        return None;
    }
    Some(OptionDescriptor {
        keyword: keyword.to_string(),
        text: text.to_string(),
        choices: Vec::new(),
        default: None,
    })
}

/// Parse `*PageSize Letter/US Letter: "..."` inside the block of `keyword`.
fn parse_choice(line: &str, keyword: &str) -> Option<OptionChoice> {
    let rest = line.strip_prefix('*')?.strip_prefix(keyword)?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let (choice, _value) = rest.split_once(':')?;
    let (keyword, text) = split_translation(choice.trim());
    if keyword.is_empty() {
        return None;
    }
    Some(OptionChoice {
        keyword: keyword.to_string(),
        text: text.to_string(),
    })
}

/// Split `Keyword/Translation`; the translation defaults to the keyword.
fn split_translation(name: &str) -> (&str, &str) {
    match name.split_once('/') {
        Some((keyword, text)) if !text.trim().is_empty() => (keyword.trim(), text.trim()),
        Some((keyword, _)) => (keyword.trim(), keyword.trim()),
        None => (name.trim(), name.trim()),
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Value of a main keyword such as `*NickName: "..."`.
pub fn directive_value(text: &str, keyword: &str) -> Option<String> {
    let prefix = format!("*{keyword}:");
    text.lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|value| unquote(value).to_string())
        .filter(|value| !value.is_empty())
}

/// Make-and-model string of a driver: `*NickName`, else `*ModelName`.
pub fn model_name(text: &str) -> Option<String> {
    directive_value(text, "NickName").or_else(|| directive_value(text, "ModelName"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"*PPD-Adobe: "4.3"
*ModelName: "Acme LaserWriter 9000"
*NickName: "Acme LaserWriter 9000, 1.2"
*OpenGroup: General/General
*OpenUI *PageSize/Media Size: PickOne
*OrderDependency: 10 AnySetup *PageSize
*DefaultPageSize: Letter
*PageSize Letter/US Letter: "<</PageSize[612 792]>>setpagedevice"
*PageSize A4/A4: "<</PageSize[595 842]
  /ImagingBBox null>>setpagedevice"
*CloseUI: *PageSize
*OpenUI *Duplex/2-Sided Printing: PickOne
*DefaultDuplex: None
*Duplex None/Off: "<</Duplex false>>setpagedevice"
*Duplex DuplexNoTumble: "<</Duplex true>>setpagedevice"
*CloseUI: *Duplex
*CloseGroup: General
"#;

    fn opt(s: &str) -> PrinterOption {
        s.parse().expect("option")
    }

    #[test]
    fn existing_directive_is_rewritten_in_place() {
        let patched = patch_defaults(SAMPLE, &[opt("Duplex=DuplexNoTumble")]);
        assert!(patched.contains("*DefaultDuplex: DuplexNoTumble\n*Duplex None/Off"));
        assert!(!patched.contains("*DefaultDuplex: None"));
        assert_eq!(patched.lines().count(), SAMPLE.lines().count());
    }

    #[test]
    fn missing_directive_is_appended() {
        let patched = patch_defaults(SAMPLE, &[opt("ColorModel=Gray")]);
        assert!(patched.ends_with("*CloseGroup: General\n*DefaultColorModel: Gray\n"));
    }

    #[test]
    fn similar_prefix_is_not_matched() {
        let text = "*DefaultDuplexMode: Auto\n";
        let patched = patch_defaults(text, &[opt("Duplex=None")]);
        assert_eq!(patched, "*DefaultDuplexMode: Auto\n*DefaultDuplex: None\n");
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        let text = "*PPD-Adobe: \"4.3\"\r\n*DefaultDuplex: None\r\n";
        let patched = patch_defaults(text, &[opt("Duplex=DuplexTumble"), opt("InputSlot=Tray2")]);
        assert_eq!(
            patched,
            "*PPD-Adobe: \"4.3\"\r\n*DefaultDuplex: DuplexTumble\r\n*DefaultInputSlot: Tray2\r\n"
        );
    }

    #[test]
    fn missing_trailing_newline_is_added_before_append() {
        let patched = patch_defaults("*DefaultDuplex: None", &[opt("PageSize=A4")]);
        assert_eq!(patched, "*DefaultDuplex: None\n*DefaultPageSize: A4\n");
    }

    #[test]
    fn patching_is_idempotent() {
        let options = [opt("Duplex=DuplexNoTumble"), opt("ColorModel=Gray")];
        let once = patch_defaults(SAMPLE, &options);
        assert_eq!(patch_defaults(&once, &options), once);
    }

    #[test]
    fn patch_file_replaces_original_and_leaves_no_scratch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lab.ppd");
        std::fs::write(&path, SAMPLE).expect("write");

        assert!(patch_file(&path, &[opt("PageSize=A4")]).expect("patch"));
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("*DefaultPageSize: A4"));

        // Second run changes nothing.
        assert!(!patch_file(&path, &[opt("PageSize=A4")]).expect("patch again"));

        let entries: Vec<_> = std::fs::read_dir(dir.path()).expect("read_dir").collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn patch_file_missing_ppd_is_io_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = patch_file(&dir.path().join("absent.ppd"), &[opt("A=B")]).expect_err("absent");
        assert!(matches!(err, SpoolwerkError::IoFailure { .. }));
    }

    #[test]
    fn latin1_bytes_survive_patching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latin.ppd");
        let mut bytes = b"*da.Translation PageSize/St\xf8rrelse: \"\"\n".to_vec();
        bytes.extend_from_slice(b"*DefaultPageSize: Letter\n");
        std::fs::write(&path, &bytes).expect("write");

        patch_file(&path, &[opt("PageSize=A4")]).expect("patch");
        let written = std::fs::read(&path).expect("read");
        assert!(written.starts_with(b"*da.Translation PageSize/St\xf8rrelse"));
        assert!(written.ends_with(b"*DefaultPageSize: A4\n"));
    }

    #[test]
    fn option_schema_is_parsed_in_file_order() {
        let options = parse_options(SAMPLE);
        assert_eq!(options.len(), 2);

        let page_size = &options[0];
        assert_eq!(page_size.keyword, "PageSize");
        assert_eq!(page_size.text, "Media Size");
        assert_eq!(page_size.default.as_deref(), Some("Letter"));
        let choices: Vec<&str> = page_size.choices.iter().map(|c| c.keyword.as_str()).collect();
        assert_eq!(choices, ["Letter", "A4"]);
        assert_eq!(page_size.choices[0].text, "US Letter");

        let duplex = &options[1];
        assert_eq!(duplex.keyword, "Duplex");
        assert_eq!(duplex.default.as_deref(), Some("None"));
        assert_eq!(duplex.choices[1].text, "DuplexNoTumble");
    }

    #[test]
    fn model_name_prefers_nickname() {
        assert_eq!(model_name(SAMPLE).as_deref(), Some("Acme LaserWriter 9000, 1.2"));
        assert_eq!(
            model_name("*ModelName: \"Plain\"\n").as_deref(),
            Some("Plain")
        );
        assert_eq!(model_name("*PPD-Adobe: \"4.3\"\n"), None);
    }
}
