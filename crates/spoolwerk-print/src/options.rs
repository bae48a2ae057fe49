// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Merge semantics for per-printer default option lists.
//
// A key already present keeps its position and takes the new value; a new key
// is appended.  Applying the same update twice leaves the list unchanged.

use spoolwerk_core::error::Result;
use spoolwerk_core::types::PrinterOption;

/// Parse every string as `key=value`, failing on the first malformed one.
///
/// Nothing is applied unless every option parses.
pub fn parse_options<S: AsRef<str>>(options: &[S]) -> Result<Vec<PrinterOption>> {
    options.iter().map(|o| o.as_ref().parse()).collect()
}

/// Merge `updates` into `existing` in place.
///
/// Returns `true` if the list changed.
pub fn merge_options(existing: &mut Vec<PrinterOption>, updates: &[PrinterOption]) -> bool {
    let mut changed = false;
    for update in updates {
        match existing.iter_mut().find(|o| o.key == update.key) {
            Some(current) if current.value == update.value => {}
            Some(current) => {
                current.value.clone_from(&update.value);
                changed = true;
            }
            None => {
                existing.push(update.clone());
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoolwerk_core::error::SpoolwerkError;

    fn opts(items: &[&str]) -> Vec<PrinterOption> {
        parse_options(items).expect("parse")
    }

    fn render(options: &[PrinterOption]) -> Vec<String> {
        options.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn replace_keeps_original_position() {
        let mut list = opts(&["Key=A", "PageSize=A4"]);
        assert!(merge_options(&mut list, &opts(&["Key=B"])));
        assert_eq!(render(&list), ["Key=B", "PageSize=A4"]);
    }

    #[test]
    fn sequential_updates_leave_one_entry() {
        let mut list = opts(&["PageSize=A4"]);
        merge_options(&mut list, &opts(&["Key=A"]));
        merge_options(&mut list, &opts(&["Key=B"]));
        assert_eq!(render(&list), ["PageSize=A4", "Key=B"]);
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let update = opts(&["Duplex=DuplexNoTumble", "ColorModel=Gray"]);
        let mut once = opts(&["Duplex=None"]);
        merge_options(&mut once, &update);

        let mut twice = once.clone();
        assert!(!merge_options(&mut twice, &update));
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_keys_in_one_update_take_last_value() {
        let mut list = Vec::new();
        merge_options(&mut list, &opts(&["Key=A", "Key=B"]));
        assert_eq!(render(&list), ["Key=B"]);
    }

    #[test]
    fn malformed_option_fails_whole_batch() {
        let err = parse_options(&["Duplex=None", "garbage"]).expect_err("garbage");
        assert!(matches!(err, SpoolwerkError::OptionSyntaxError(ref s) if s == "garbage"));
    }
}
