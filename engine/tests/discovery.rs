//! End-to-end discovery tests: scripted engine, real store, full cycles.
//!
//! These exercise the whole pipeline a user actually hits: segmentation,
//! reasoning tracking, loop defense, evaluation, persistence, temperature
//! carry, and the background/foreground handoff.

use std::sync::Arc;
use std::time::Duration;

use edify_engine::{
    CancelFlag, CycleError, EdifyConfig, GenerationConfig, MemorySink, Orchestrator, StorageConfig,
    run_cycle,
};
use edify_session::scripted::{ScriptStep, ScriptedSession};
use edify_store::DiscoveryStore;
use edify_types::Temperature;

fn store_with_interest() -> DiscoveryStore {
    let mut store = DiscoveryStore::open_in_memory().expect("in-memory store");
    store.add_interest("retro game consoles").expect("interest");
    store
}

fn config_at(dir: &tempfile::TempDir) -> EdifyConfig {
    EdifyConfig {
        storage: StorageConfig {
            db_path: Some(dir.path().join("facts.db")),
            log_dir: Some(dir.path().join("logs")),
        },
        ..EdifyConfig::default()
    }
}

fn think(text: &str) -> Vec<ScriptStep> {
    vec![
        ScriptStep::fragment(format!("{text}\n")),
        ScriptStep::fragment("</think>"),
    ]
}

#[test]
fn repeated_lines_are_corrected_banned_and_stored_once() {
    let mut store = store_with_interest();
    let mut script = think("Listing facts, hopefully without stutter.");
    script.extend([
        ScriptStep::fragment("\nThe SNES shipped carts with extra coprocessors.\n"),
        ScriptStep::fragment("The SNES shipped carts with extra coprocessors.\n"),
        ScriptStep::fragment("The Game Boy ran about 15 hours on four AA batteries.\n"),
        ScriptStep::Stop,
    ]);
    script.extend(think("Both are keepers."));
    script.extend([
        ScriptStep::fragment("\nThe SNES shipped carts with extra coprocessors.\n"),
        ScriptStep::fragment("The Game Boy ran about 15 hours on four AA batteries.\n"),
        ScriptStep::Stop,
    ]);
    let mut session = ScriptedSession::new(script);
    let sink = MemorySink::new();

    let report = run_cycle(
        &mut session,
        &mut store,
        Temperature::ZERO,
        &GenerationConfig::default(),
        &sink,
        &CancelFlag::new(),
    )
    .expect("cycle succeeds");

    // The duplicate never became a second candidate.
    assert_eq!(report.generated, 2);
    assert_eq!(report.persisted, 2);
    let pending = store.pending_facts().expect("pending");
    let texts: Vec<&str> = pending.iter().map(|fact| fact.text.as_str()).collect();
    assert_eq!(
        texts,
        [
            "The SNES shipped carts with extra coprocessors.",
            "The Game Boy ran about 15 hours on four AA batteries.",
        ]
    );

    // The corrective context went into the conversation.
    assert!(
        session
            .tokenize_log()
            .iter()
            .any(|text| text.starts_with("The SNES shipped carts") && text.contains("--")),
        "corrective injection missing from the conversation"
    );
}

#[test]
fn forced_close_discards_everything_generated_before_it() {
    let mut store = store_with_interest();
    let mut script = vec![
        // The reasoning phase never closes on its own.
        ScriptStep::fragment("A phantom fact that looks real enough.\n"),
        ScriptStep::fragment("Another phantom line of reasoning.\n"),
        ScriptStep::Stop,
        // After the runner injects the close, real output follows.
        ScriptStep::fragment("The Virtual Boy sold under a million units.\n"),
        ScriptStep::Stop,
    ];
    script.extend(think("Fine as is."));
    script.extend([
        ScriptStep::fragment("\nThe Virtual Boy sold under a million units.\n"),
        ScriptStep::Stop,
    ]);
    let mut session = ScriptedSession::new(script);
    let sink = MemorySink::new();

    run_cycle(
        &mut session,
        &mut store,
        Temperature::ZERO,
        &GenerationConfig::default(),
        &sink,
        &CancelFlag::new(),
    )
    .expect("cycle succeeds");

    let pending = store.pending_facts().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].text, "The Virtual Boy sold under a million units.");
    assert!(
        !pending
            .iter()
            .any(|fact| fact.text.contains("phantom")),
        "pre-close output must never be persisted"
    );
}

#[test]
fn list_markers_are_stripped_before_persistence() {
    let mut store = store_with_interest();
    let mut script = think("Formatting these as a list anyway.");
    script.extend([
        ScriptStep::fragment("\n1. **Consoles**: The SNES sound chip was designed by Sony.\n"),
        ScriptStep::fragment("- The N64 shipped without a DVD drive on purpose.\n"),
        ScriptStep::fragment("2. ok.\n"),
        ScriptStep::Stop,
    ]);
    script.extend(think("Keeping both real ones."));
    script.extend([
        ScriptStep::fragment("\nThe SNES sound chip was designed by Sony.\n"),
        ScriptStep::fragment("The N64 shipped without a DVD drive on purpose.\n"),
        ScriptStep::Stop,
    ]);
    let mut session = ScriptedSession::new(script);
    let sink = MemorySink::new();

    let report = run_cycle(
        &mut session,
        &mut store,
        Temperature::ZERO,
        &GenerationConfig::default(),
        &sink,
        &CancelFlag::new(),
    )
    .expect("cycle succeeds");

    // The numbered stub "ok." fell below the length floor.
    assert_eq!(report.generated, 2);
    let pending = store.pending_facts().expect("pending");
    assert!(pending.iter().all(|fact| !fact.text.starts_with(['1', '-', '2'])));
}

#[tokio::test]
async fn temperature_carries_across_cycles_until_something_lands() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut store = DiscoveryStore::open(dir.path().join("facts.db")).expect("open store");
        store.add_interest("retro game consoles").expect("interest");
    }

    // Two dry cycles, then one that produces.
    let mut script: Vec<ScriptStep> = Vec::new();
    for _ in 0..2 {
        script.extend([
            ScriptStep::fragment("Nothing novel comes to mind.\n"),
            ScriptStep::Stop,
            ScriptStep::Stop,
        ]);
    }
    script.extend(think("Found one."));
    script.extend([
        ScriptStep::fragment("\nThe GameCube handle was a deliberate design feature.\n"),
        ScriptStep::Stop,
    ]);
    script.extend(think("It holds up."));
    script.extend([
        ScriptStep::fragment("\nThe GameCube handle was a deliberate design feature.\n"),
        ScriptStep::Stop,
    ]);

    let orchestrator = Orchestrator::new(ScriptedSession::new(script), &config_at(&dir));
    let sink = Arc::new(MemorySink::new());

    let first = orchestrator
        .run_cycle_foreground(sink.clone())
        .await
        .expect("first cycle");
    assert!((first.temperature.value() - 0.3).abs() < 1e-6);

    let second = orchestrator
        .run_cycle_foreground(sink.clone())
        .await
        .expect("second cycle");
    assert!(
        (second.temperature.value() - 0.6).abs() < 1e-6,
        "the second dry cycle must start from the carried temperature"
    );

    let third = orchestrator
        .run_cycle_foreground(sink.clone())
        .await
        .expect("third cycle");
    assert_eq!(third.persisted, 1);
    assert!(third.temperature.is_greedy());
}

#[tokio::test]
async fn engine_failure_surfaces_and_the_next_cycle_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("facts.db");
    {
        let mut store = DiscoveryStore::open(&db_path).expect("open store");
        store.add_interest("retro game consoles").expect("interest");
    }

    let mut script = think("Two candidates.");
    script.extend([
        ScriptStep::fragment("\nThe Dreamcast had a built-in modem.\n"),
        ScriptStep::Stop,
    ]);
    script.extend(think("Keeping it."));
    script.extend([
        ScriptStep::fragment("\nThe Dreamcast had a built-in modem.\n"),
        ScriptStep::Stop,
    ]);
    let session = ScriptedSession::new(script).fail_decode_at(1);
    let orchestrator = Orchestrator::new(session, &config_at(&dir));
    let sink = Arc::new(MemorySink::new());

    let failed = orchestrator.run_cycle_foreground(sink.clone()).await;
    assert!(matches!(failed, Err(CycleError::Engine(_))));
    {
        let store = DiscoveryStore::open(&db_path).expect("open store");
        assert_eq!(store.pending_count(), 0, "a failed cycle persists nothing");
    }

    // The failure consumed no script; a fresh cycle runs it cleanly.
    let report = orchestrator
        .run_cycle_foreground(sink)
        .await
        .expect("recovery cycle");
    assert_eq!(report.persisted, 1);
}

#[tokio::test]
async fn fact_requests_drain_the_queue_then_generate_ahead() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("facts.db");
    {
        let mut store = DiscoveryStore::open(&db_path).expect("open store");
        store.add_interest("retro game consoles").expect("interest");
        store
            .append_pending(&[
                "First queued fact.".to_string(),
                "Second queued fact.".to_string(),
            ])
            .expect("seed pending");
    }

    let mut script = think("Two more.");
    script.extend([
        ScriptStep::fragment("\nThe Saturn had two CPUs that were hard to program.\n"),
        ScriptStep::fragment("The PS1 could render quads natively.\n"),
        ScriptStep::Stop,
    ]);
    script.extend(think("Both fine."));
    script.extend([
        ScriptStep::fragment("\nThe Saturn had two CPUs that were hard to program.\n"),
        ScriptStep::fragment("The PS1 could render quads natively.\n"),
        ScriptStep::Stop,
    ]);
    let mut orchestrator = Orchestrator::new(
        ScriptedSession::new(script).with_decode_delay(Duration::from_millis(5)),
        &config_at(&dir),
    );
    let sink = Arc::new(MemorySink::new());

    let first = orchestrator
        .next_discovery(sink.clone())
        .await
        .expect("first request");
    let second = orchestrator
        .next_discovery(sink.clone())
        .await
        .expect("second request");
    let third = orchestrator
        .next_discovery(sink.clone())
        .await
        .expect("third request");
    orchestrator.shutdown().await;

    assert_eq!(first.as_deref(), Some("First queued fact."));
    assert_eq!(second.as_deref(), Some("Second queued fact."));
    assert_eq!(
        third.as_deref(),
        Some("The Saturn had two CPUs that were hard to program.")
    );

    let store = DiscoveryStore::open(&db_path).expect("open store");
    let known = store.known_facts().expect("known");
    assert_eq!(known.len(), 3);
    assert_eq!(known[0].text, "First queued fact.");
}
