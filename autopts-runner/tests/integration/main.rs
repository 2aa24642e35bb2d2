// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests
//!
//! Each test starts an engine server on a loopback port with a [`ScriptedEngine`], then drives it
//! through a real client session: the command channel, the callback listener, the scheduler and
//! the ledger all run as they would against a real engine.

use autopts_metadata::ENGINE_E_TESTCASE_TIMEOUT;
use autopts_runner::{
    bridge::BridgeTimings,
    client::{EngineControl, RemoteEngine},
    errors::ServerRunError,
    fatal::FatalFaultHandler,
    ledger::RunLedger,
    registry::RunRegistry,
    reporter::{AttemptReporter, ReportWidths},
    runner::{RunOptions, RunSummary, TestRunner, collect_candidates},
    session::{ServerSession, init_all},
    test_case::TestCatalog,
    test_filter::{TestFilter, TestFilterBuilder},
};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::time::Duration;

mod fixtures;

use fixtures::*;

struct RunOutput {
    summary: RunSummary,
    ledger: RunLedger,
    output: String,
}

async fn run_candidates(
    loopback: &Loopback,
    session: &ServerSession,
    registry: &RunRegistry,
    filter: &TestFilter,
    retries: u32,
) -> RunOutput {
    let candidates = collect_candidates(session.engine(), filter).await.unwrap();
    let catalog = TestCatalog::from_names(candidates.test_cases.iter().cloned());
    let ledger = RunLedger::create(loopback.dir.path().join("results.xml")).unwrap();

    let widths = ReportWidths::new(&candidates.projects, &candidates.test_cases, retries);
    let mut reporter = AttemptReporter::new(Vec::new(), widths);
    let runner = TestRunner::new(
        session.engine(),
        &catalog,
        registry.clone(),
        &ledger,
        FatalFaultHandler::new(),
        RunOptions {
            workspace: loopback.workspace.to_string(),
            retries,
            log_dir: loopback.log_dir(),
            call_timeout_ms: 60_000,
        },
    );
    let summary = runner.execute(&candidates, &mut reporter).await.unwrap();
    assert!(registry.is_empty(), "no test case is left registered");

    RunOutput {
        summary,
        ledger,
        output: String::from_utf8(reporter.into_inner()).unwrap(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn end_to_end_run() {
    let engine = ScriptedEngine::new(&[
        ("GAP", &["GAP/CONN/BV-01-C", "GAP/CONN/BV-02-C"]),
        ("SM", &["SM/MAS/PROT/BV-01-C"]),
    ])
    .script(
        "GAP/CONN/BV-01-C",
        [
            Step::Verdict("FAIL"),
            Step::AskThenVerdict {
                wid: 20,
                verdict: "PASS",
            },
        ],
    )
    .script("GAP/CONN/BV-02-C", [Step::Verdict("INCONC"), Step::Verdict("INCONC")]);
    let record = engine.record();
    let loopback = Loopback::start(engine, Responder::Answer("OK"), BridgeTimings::default()).await;

    let registry = RunRegistry::new();
    let client_fatal = FatalFaultHandler::new();
    let mut options = loopback.session_options();
    options.bd_addr_override = Some("AA:BB:CC:DD:EE:FF".to_owned());
    let sessions = init_all(&[loopback.target()], &options, &registry, &client_fatal)
        .await
        .unwrap();
    let session = &sessions[0];
    assert_eq!(session.version(), "8.5.0");
    assert_eq!(session.bd_addr(), "00:1B:DC:F2:1C:48");
    // The listener got an ephemeral port.
    assert_ne!(session.callback_addr().port(), 0);

    // The device address override is written to every project.
    assert_eq!(record.count("pixit"), 2);
    assert!(
        record
            .calls()
            .contains(&"pixit SM TSPX_bd_addr_iut AA:BB:CC:DD:EE:FF".to_owned())
    );

    let filter = TestFilterBuilder::new(vec!["GAP".to_owned()], Vec::new())
        .build()
        .unwrap();
    let run = run_candidates(&loopback, session, &registry, &filter, 1).await;

    assert_eq!(
        run.summary.status_counts,
        btreemap! {"INCONC".to_owned() => 1, "PASS".to_owned() => 1}
    );
    let records = run.ledger.records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "GAP/CONN/BV-01-C");
    assert_eq!(records[0].run_count, 2);
    assert_eq!(records[1].run_count, 2);
    assert_eq!(record.count("run SM"), 0, "SM was filtered out");

    // The implicit send was relayed and answered.
    assert_eq!(
        record.answers(),
        vec![["OK".to_owned(), "2".to_owned(), "1".to_owned()]]
    );
    let requests = loopback.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["command"], "ImplicitSend");
    assert_eq!(requests[0]["parameters"]["projectName"], "GAP");
    assert_eq!(requests[0]["parameters"]["wid"], 20);

    // Only default log types reach the attempt log while maximum logging is off.
    let log = std::fs::read_to_string(
        run.summary
            .session_log_dir
            .join("GAP_CONN_BV-01-C.log"),
    )
    .unwrap();
    assert!(log.contains("Final Verdict: PASS"), "{log}");
    assert!(!log.contains("some chatter"), "{log}");

    assert!(run.output.contains("Summary:"), "{}", run.output);
    assert!(!client_fatal.is_triggered());
    assert!(!loopback.server_fatal.is_triggered());

    for session in sessions {
        session.close().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_error_is_recorded_and_recovered() {
    let engine = ScriptedEngine::new(&[("L2CAP", &["L2CAP/COS/CED/BV-01-C"])]).script(
        "L2CAP/COS/CED/BV-01-C",
        [Step::Code(ENGINE_E_TESTCASE_TIMEOUT)],
    );
    let record = engine.record();
    let loopback = Loopback::start(engine, Responder::Silent, BridgeTimings::default()).await;

    let registry = RunRegistry::new();
    let mut options = loopback.session_options();
    options.enable_max_logging = true;
    let sessions = init_all(
        &[loopback.target()],
        &options,
        &registry,
        &FatalFaultHandler::new(),
    )
    .await
    .unwrap();
    let opens_after_init = record.count("open_workspace");

    let run = run_candidates(&loopback, &sessions[0], &registry, &TestFilter::all(), 0).await;
    assert_eq!(
        run.summary
            .results
            .get("L2CAP/COS/CED/BV-01-C")
            .map(String::as_str),
        Some("PTS TIMEOUT")
    );

    // The server stopped the test case and re-opened the workspace.
    assert_eq!(record.count("stop_test_case"), 1);
    assert_eq!(record.count("open_workspace"), opens_after_init + 1);
    assert!(record.calls().contains(&"max_logging true".to_owned()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unanswered_implicit_send_is_cancelled() {
    let engine = ScriptedEngine::new(&[("GATT", &["GATT/SR/GAC/BV-01-C"])]).script(
        "GATT/SR/GAC/BV-01-C",
        [Step::AskThenVerdict {
            wid: 1,
            verdict: "FAIL",
        }],
    );
    let record = engine.record();
    let timings = BridgeTimings {
        timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
    };
    let loopback = Loopback::start(engine, Responder::Silent, timings).await;

    let registry = RunRegistry::new();
    let sessions = init_all(
        &[loopback.target()],
        &loopback.session_options(),
        &registry,
        &FatalFaultHandler::new(),
    )
    .await
    .unwrap();

    let run = run_candidates(&loopback, &sessions[0], &registry, &TestFilter::all(), 0).await;
    assert_eq!(
        record.answers(),
        vec![["Cancel".to_owned(), "6".to_owned(), "1".to_owned()]]
    );
    assert_eq!(run.summary.status_counts, btreemap! {"FAIL".to_owned() => 1});
    assert!(!loopback.server_fatal.is_triggered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callback_reregistration_replaces_target() {
    let engine = ScriptedEngine::new(&[("GAP", &["GAP/1"])])
        .script("GAP/1", [Step::Verdict("PASS")]);
    let loopback = Loopback::start(engine, Responder::Silent, BridgeTimings::default()).await;

    // The first session's listener goes away; the second session re-registers.
    let stale_registry = RunRegistry::new();
    let stale = init_all(
        &[loopback.target()],
        &loopback.session_options(),
        &stale_registry,
        &FatalFaultHandler::new(),
    )
    .await
    .unwrap();
    drop(stale);

    let registry = RunRegistry::new();
    let client_fatal = FatalFaultHandler::new();
    let sessions = init_all(
        &[loopback.target()],
        &loopback.session_options(),
        &registry,
        &client_fatal,
    )
    .await
    .unwrap();

    let run = run_candidates(&loopback, &sessions[0], &registry, &TestFilter::all(), 0).await;
    assert!(run.summary.all_passed());
    assert!(!loopback.server_fatal.is_triggered());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn relay_failure_stops_server() {
    let engine = ScriptedEngine::new(&[("GAP", &["GAP/CONN/BV-01-C"])]).script(
        "GAP/CONN/BV-01-C",
        [Step::AskThenVerdict {
            wid: 20,
            verdict: "PASS",
        }],
    );
    let record = engine.record();
    let loopback =
        Loopback::start(engine, Responder::Disconnected, BridgeTimings::default()).await;

    let client = RemoteEngine::connect(
        "127.0.0.1",
        loopback.target().port,
        Duration::from_secs(30),
    )
    .unwrap();
    let workspace = loopback.workspace.as_str();
    client.open_workspace(workspace).await.unwrap();
    let result = client
        .run_test_case(workspace, "GAP", "GAP/CONN/BV-01-C")
        .await
        .unwrap();

    // The engine's frame unwinds with a Cancel answer; the fault is raised out of band.
    assert_eq!(result, None);
    assert_eq!(
        record.answers(),
        vec![["Cancel".to_owned(), "6".to_owned(), "1".to_owned()]]
    );
    let fault = loopback.server_fatal.fault().expect("fault was captured");
    assert_eq!(fault.context(), "implicit-send publish");

    let Loopback {
        dir: _dir, server, ..
    } = loopback;
    let error = tokio::time::timeout(Duration::from_secs(10), server.wait())
        .await
        .expect("server stopped")
        .unwrap_err();
    assert!(matches!(error, ServerRunError::Fatal(_)), "{error:?}");
    assert_eq!(record.calls().last().map(String::as_str), Some("stop"));

    // The command channel is gone.
    assert!(client.version().await.is_err());
}
