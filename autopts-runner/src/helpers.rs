// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error::Error, fmt, time::Duration};

/// Returns the project part of a qualified `<project>/<case>` name.
///
/// A name without a `/` is its own project.
pub fn project_of(test_case_name: &str) -> &str {
    test_case_name
        .split_once('/')
        .map_or(test_case_name, |(project, _)| project)
}

/// Returns a file name for a per-attempt log.
pub(crate) fn attempt_log_file_name(test_case_name: &str) -> String {
    let mut name = test_case_name.replace(['/', '\\'], "_");
    name.push_str(".log");
    name
}

/// Removes all whitespace from a name reported by the engine.
pub(crate) fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Formats a duration as seconds with millisecond precision.
pub(crate) fn format_duration_secs(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

/// Formats an engine device address as colon-separated upper-case hex pairs.
pub(crate) fn format_device_address(raw: &str) -> String {
    let raw = raw.to_uppercase();
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

/// Displays an error followed by each of its sources, separated by `: `.
pub(crate) struct DisplayErrorChain<'a>(pub(crate) &'a (dyn Error + 'static));

impl fmt::Display for DisplayErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}
