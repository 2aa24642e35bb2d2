// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run statistics ledger.
//!
//! The ledger is an XML document with one `<test_case>` record per distinct test case, holding
//! its last status, last duration and cumulative run count. The file is the single source of
//! truth: every read re-parses it, and every update rewrites it atomically. That keeps the state
//! of a run inspectable even if autopts crashes partway through.

use crate::{
    errors::{LedgerError, LedgerParseError},
    helpers::project_of,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use std::{
    collections::BTreeMap,
    io::Write,
    sync::{Mutex, PoisonError},
    time::Duration,
};

static RESULTS_TAG: &str = "results";
static TEST_CASE_TAG: &str = "test_case";

/// A single ledger record.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRecord {
    /// The project the test case belongs to.
    pub project: String,

    /// The qualified test case name.
    pub name: String,

    /// The duration of the last attempt, in seconds.
    pub duration: f64,

    /// The status of the last attempt.
    pub status: String,

    /// The number of attempts recorded so far.
    pub run_count: u32,
}

/// A durable store of per-test-case outcomes.
#[derive(Debug)]
pub struct RunLedger {
    path: Utf8PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl RunLedger {
    /// Creates an empty ledger in a temporary file that is kept after the run.
    pub fn create_temp() -> Result<Self, LedgerError> {
        let file = camino_tempfile::Builder::new()
            .prefix("autopts-results-")
            .suffix(".xml")
            .tempfile()
            .map_err(|error| LedgerError::Create { error })?;
        let (_, path) = file
            .keep()
            .map_err(|error| LedgerError::Create { error: error.error })?;

        Self::create(path)
    }

    /// Creates an empty ledger at `path`, replacing any existing file.
    pub fn create(path: impl Into<Utf8PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self::open(path);
        ledger.write_records(&[])?;
        Ok(ledger)
    }

    /// Opens an existing ledger at `path`.
    ///
    /// The file is not read until it is needed.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the path to the ledger file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Records the outcome of an attempt.
    ///
    /// A new test case is inserted with a run count of 1. For a known test case, the run count is
    /// incremented and the status and duration are overwritten.
    pub fn update(&self, name: &str, duration: Duration, status: &str) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut records = self.records()?;
        match records.iter_mut().find(|record| record.name == name) {
            Some(record) => {
                record.run_count += 1;
                record.status = status.to_owned();
                record.duration = duration.as_secs_f64();
            }
            None => records.push(LedgerRecord {
                project: project_of(name).to_owned(),
                name: name.to_owned(),
                duration: duration.as_secs_f64(),
                status: status.to_owned(),
                run_count: 1,
            }),
        }

        self.write_records(&records)
    }

    /// Returns the latest status of every recorded test case, in the order they were first
    /// recorded.
    pub fn results(&self) -> Result<IndexMap<String, String>, LedgerError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|record| (record.name, record.status))
            .collect())
    }

    /// Returns the number of distinct test cases currently at each status.
    pub fn status_counts(&self) -> Result<BTreeMap<String, usize>, LedgerError> {
        let mut counts = BTreeMap::new();
        for record in self.records()? {
            *counts.entry(record.status).or_default() += 1;
        }
        Ok(counts)
    }

    /// Reads every record from the ledger file.
    pub fn records(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let text = fs_err::read_to_string(&self.path).map_err(|error| LedgerError::Read {
            path: self.path.clone(),
            error,
        })?;
        parse_records(&text).map_err(|error| LedgerError::Parse {
            path: self.path.clone(),
            error,
        })
    }

    fn write_records(&self, records: &[LedgerRecord]) -> Result<(), LedgerError> {
        let bytes = serialize_records(records).map_err(|error| LedgerError::Serialize {
            path: self.path.clone(),
            error,
        })?;

        AtomicFile::new(&self.path, OverwriteBehavior::AllowOverwrite)
            .write(|file| file.write_all(&bytes))
            .map_err(|error| LedgerError::Write {
                path: self.path.clone(),
                error,
            })
    }
}

fn serialize_records(records: &[LedgerRecord]) -> std::io::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    if records.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(RESULTS_TAG)))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new(RESULTS_TAG)))?;
        for record in records {
            // Use the destructuring syntax to ensure that all fields are handled.
            let LedgerRecord {
                project,
                name,
                duration,
                status,
                run_count,
            } = record;

            let duration = duration.to_string();
            let run_count = run_count.to_string();
            let tag = BytesStart::new(TEST_CASE_TAG).with_attributes([
                ("project", project.as_str()),
                ("name", name.as_str()),
                ("duration", duration.as_str()),
                ("status", status.as_str()),
                ("run_count", run_count.as_str()),
            ]);
            writer.write_event(Event::Empty(tag))?;
        }
        writer.write_event(Event::End(BytesEnd::new(RESULTS_TAG)))?;
    }

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn parse_records(text: &str) -> Result<Vec<LedgerRecord>, LedgerParseError> {
    let mut reader = Reader::from_str(text);
    let mut records = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(tag) | Event::Empty(tag)
                if tag.name().as_ref() == TEST_CASE_TAG.as_bytes() =>
            {
                records.push(parse_record(records.len(), &tag)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

fn parse_record(index: usize, tag: &BytesStart<'_>) -> Result<LedgerRecord, LedgerParseError> {
    let mut project = None;
    let mut name = None;
    let mut duration = None;
    let mut status = None;
    let mut run_count = None;

    for attr in tag.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.as_ref() {
            b"project" => project = Some(value),
            b"name" => name = Some(value),
            b"duration" => duration = Some(value),
            b"status" => status = Some(value),
            b"run_count" => run_count = Some(value),
            _ => {}
        }
    }

    let missing = |attribute| LedgerParseError::MissingAttribute { index, attribute };
    let name = name.ok_or_else(|| missing("name"))?;
    let duration = duration.ok_or_else(|| missing("duration"))?;
    let run_count = run_count.ok_or_else(|| missing("run_count"))?;

    let duration = duration
        .parse()
        .map_err(|_| LedgerParseError::InvalidAttribute {
            index,
            attribute: "duration",
            value: duration.clone(),
        })?;
    let run_count = run_count
        .parse()
        .map_err(|_| LedgerParseError::InvalidAttribute {
            index,
            attribute: "run_count",
            value: run_count.clone(),
        })?;

    Ok(LedgerRecord {
        project: project.unwrap_or_else(|| project_of(&name).to_owned()),
        status: status.ok_or_else(|| missing("status"))?,
        name,
        duration,
        run_count,
    })
}
