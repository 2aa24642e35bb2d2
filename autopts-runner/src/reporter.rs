// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints attempt results and the end-of-run summary.
//!
//! Each attempt is reported in two parts: the test case is announced before the attempt starts,
//! and the rest of the line is written once the attempt completes.

use crate::{helpers::format_duration_secs, test_case::TestStatus};
use owo_colors::{OwoColorize, Style};
use std::{collections::BTreeMap, io, io::Write, time::Duration};

const MARGIN: usize = 3;
const STATUS_WIDTH: usize = 16;

/// Column widths for attempt lines, computed once per run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ReportWidths {
    count: usize,
    project: usize,
    test_case: usize,
    retry: usize,
}

impl ReportWidths {
    /// Computes widths for a run over `test_cases`, drawn from `projects`, with up to `retries`
    /// re-runs each.
    pub fn new<P, T>(projects: &[P], test_cases: &[T], retries: u32) -> Self
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            count: test_cases.len().to_string().len(),
            project: longest(projects),
            test_case: longest(test_cases),
            retry: format!("#{retries}").len(),
        }
    }
}

fn longest<S: AsRef<str>>(names: &[S]) -> usize {
    names.iter().map(|name| name.as_ref().len()).max().unwrap_or(0)
}

/// The outcome of a single attempt, as displayed.
#[derive(Clone, Debug)]
pub struct AttemptOutcome<'a> {
    /// The status the attempt ended with.
    pub status: &'a TestStatus,

    /// How long the attempt took.
    pub duration: Duration,

    /// The number of earlier attempts of the same test case.
    pub retry: u32,
}

/// Writes human-readable run output.
#[derive(Debug)]
pub struct AttemptReporter<W> {
    writer: W,
    widths: ReportWidths,
    styles: Styles,
}

impl<W: Write> AttemptReporter<W> {
    /// Creates a new reporter writing to `writer`.
    pub fn new(writer: W, widths: ReportWidths) -> Self {
        Self {
            writer,
            widths,
            styles: Styles::default(),
        }
    }

    /// Colorizes statuses in the output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Announces the attempt about to start.
    ///
    /// `index` is zero-based.
    pub fn report_start(&mut self, index: usize, total: usize, name: &str) -> io::Result<()> {
        let ReportWidths {
            count,
            project,
            test_case,
            ..
        } = self.widths;
        let project_name = name.split('/').next().unwrap_or(name);
        write!(
            self.writer,
            "{:>count$}/{:<total_width$}{:<project_width$}{:<name_width$} ",
            index + 1,
            total,
            project_name,
            name,
            total_width = count + MARGIN,
            project_width = project + MARGIN,
            name_width = test_case + MARGIN - 1,
        )?;
        self.writer.flush()
    }

    /// Completes the line started by [`report_start`](Self::report_start).
    pub fn report_finish(&mut self, outcome: &AttemptOutcome<'_>) -> io::Result<()> {
        let retry = if outcome.retry > 0 {
            format!("#{}", outcome.retry)
        } else {
            String::new()
        };
        let result = format!(
            "{:<STATUS_WIDTH$}{}{:>retry_width$}",
            outcome.status.as_str(),
            format_duration_secs(outcome.duration),
            retry,
            retry_width = self.widths.retry + MARGIN,
        );
        writeln!(
            self.writer,
            "{}",
            result.style(self.styles.for_status(outcome.status))
        )
    }

    /// Writes the summary table: one row per status, then the total.
    pub fn report_summary(
        &mut self,
        status_counts: &BTreeMap<String, usize>,
        total: usize,
    ) -> io::Result<()> {
        let total = total.to_string();

        let status_width = status_counts
            .keys()
            .map(String::len)
            .chain(["Status".len(), "Total".len()])
            .max()
            .unwrap_or(0)
            + MARGIN;
        let count_width = status_counts
            .values()
            .map(|count| count.to_string().len())
            .chain(["Count".len(), total.len()])
            .max()
            .unwrap_or(0);
        let border = "=".repeat(status_width + count_width);

        writeln!(self.writer, "\nSummary:\n")?;
        writeln!(
            self.writer,
            "{:<status_width$}{:>count_width$}",
            "Status", "Count"
        )?;
        writeln!(self.writer, "{border}")?;
        for (status, count) in status_counts {
            writeln!(self.writer, "{status:<status_width$}{count:>count_width$}")?;
        }
        writeln!(self.writer, "{border}")?;
        writeln!(self.writer, "{:<status_width$}{total:>count_width$}", "Total")?;
        self.writer.flush()
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    inconclusive: Style,
    other: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green();
        self.fail = Style::new().red();
        self.inconclusive = Style::new().yellow();
        self.other = Style::new().magenta();
    }

    fn for_status(&self, status: &TestStatus) -> Style {
        match status {
            TestStatus::Pass => self.pass,
            TestStatus::Fail => self.fail,
            TestStatus::Inconclusive => self.inconclusive,
            _ => self.other,
        }
    }
}
