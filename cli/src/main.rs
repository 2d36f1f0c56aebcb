//! Edify CLI - the interactive discovery menu.
//!
//! # Architecture
//!
//! One engine session lives behind an [`Orchestrator`]; the menu loop is
//! the only writer to stdout. Foreground cycles narrate through
//! [`console::ConsoleSink`], background cycles narrate to a log file until
//! a handoff swings them to the console, and all diagnostics go to the
//! tracing log so the menu stays readable.
//!
//! ```text
//! main() -> menu loop -> Orchestrator::next_discovery / spawn_background
//!                              |
//!                              v
//!                  compact -> generate -> evaluate -> persist
//! ```

mod console;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use crossterm::style::Color;
use edify_engine::{EdifyConfig, Orchestrator, Progress, generation_prompt};
use edify_session::scripted::ScriptedSession;
use edify_store::{DiscoveryStore, Preference};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::console::ConsoleSink;

type MenuInput = Lines<BufReader<Stdin>>;

const MENU: &str = concat!(
    "\nOptions:\n",
    " 0. How it works\n",
    " 1. Add an interest\n",
    " 2. Add a dislike\n",
    " 3. Get a new fact\n",
    " 4. Generate another batch of facts in the background\n",
    " 5. Dump the generation prompt\n",
    " X. Exit\n",
);

const HELP: &str = concat!(
    "\nHow edify works:\n",
    "----------------\n",
    "1. Drop a GGUF model into the working directory (the largest one is picked\n",
    "   up automatically), or set model_path under [engine] in edify.toml.\n",
    "2. Add a few interests (topics to learn about) and dislikes (topics to\n",
    "   avoid). Specific beats broad: \"programming (Rust, embedded, profiling)\"\n",
    "   works better than \"programming\".\n",
    "3. Option 3 serves one fact at a time. When the backlog is empty, a fresh\n",
    "   batch is generated first, which can take a while. Gray text shows\n",
    "   progress; you are not expected to read it.\n",
    "4. The requested fact appears in green. Every fact is checked against your\n",
    "   dislikes and everything served before, so each one should be new.\n",
    "5. Generation normally samples greedily: the same inputs give the same\n",
    "   output. When a batch yields nothing new, the temperature rises until\n",
    "   something lands, then drops back to zero.\n",
    "6. Option 4 prepares the next batch in the background while you read.\n",
);

fn init_tracing(config: &EdifyConfig) {
    let env_filter = EnvFilter::try_from_env("EDIFY_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_log_file(config);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, prefer "no logs" over writing into the menu on
    // stdout/stderr.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file(config: &EdifyConfig) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates(config) {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates(config: &EdifyConfig) -> Vec<PathBuf> {
    vec![
        // Primary: the configured log directory (default ~/.edify/logs).
        config.storage.session_log(),
        // Fallback: ./.edify/logs (useful in constrained environments).
        PathBuf::from(".edify").join("logs").join("edify.log"),
    ]
}

fn load_config() -> (EdifyConfig, Option<String>) {
    match EdifyConfig::load() {
        Ok(Some(config)) => (config, None),
        Ok(None) => (EdifyConfig::default(), None),
        Err(err) => (
            EdifyConfig::default(),
            Some(format!("Config file ignored: {err}")),
        ),
    }
}

fn announce_engine(config: &EdifyConfig) {
    match config.engine.resolve_model() {
        Some(model) => tracing::info!(
            model = %model.display(),
            context_size = config.engine.context_size,
            gpu_layers = config.engine.gpu_layers,
            "model located; decoding runs on the built-in demo session"
        ),
        None => tracing::info!(
            "no GGUF model in the working directory; using the built-in demo session"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_warning) = load_config();
    init_tracing(&config);
    if let Some(warning) = config_warning {
        tracing::warn!("{warning}");
    }

    let db_path = config.storage.resolve_db_path();
    // Open once up front so the schema exists before the first menu choice.
    DiscoveryStore::open(&db_path)
        .with_context(|| format!("initialize discovery store at {}", db_path.display()))?;

    announce_engine(&config);
    let mut orchestrator = Orchestrator::new(ScriptedSession::with_canned_facts(), &config);
    let sink = Arc::new(ConsoleSink);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        console::paint(MENU, Color::Cyan);
        let Some(line) = input.next_line().await? else {
            break;
        };

        match line.trim().chars().next() {
            Some('0') => println!("{HELP}"),
            Some('1') => add_interest(&mut input, &db_path).await?,
            Some('2') => add_dislike(&mut input, &db_path).await?,
            Some('3') => serve_fact(&mut orchestrator, sink.clone()).await,
            Some('4') => start_background(&mut orchestrator),
            Some('5') => dump_prompt(&db_path)?,
            Some('x' | 'X' | '\u{1b}') => break,
            _ => console::paint("Type the desired option number (0-5).\n", Color::Red),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

async fn add_interest(input: &mut MenuInput, db_path: &Path) -> Result<()> {
    println!("Enter interest:");
    let Some(line) = input.next_line().await? else {
        return Ok(());
    };
    let name = line.trim();
    if name.is_empty() {
        return Ok(());
    }

    let mut store = DiscoveryStore::open(db_path)?;
    store.add_interest(name)?;
    console::paint("Interest added.\n", Color::Green);
    Ok(())
}

async fn add_dislike(input: &mut MenuInput, db_path: &Path) -> Result<()> {
    println!("Enter dislike:");
    let Some(line) = input.next_line().await? else {
        return Ok(());
    };
    let name = line.trim();
    if name.is_empty() {
        return Ok(());
    }

    let mut store = DiscoveryStore::open(db_path)?;
    store.add_dislike(name)?;
    console::paint("Dislike added.\n", Color::Green);
    Ok(())
}

async fn serve_fact(orchestrator: &mut Orchestrator<ScriptedSession>, sink: Arc<dyn Progress>) {
    match orchestrator.next_discovery(sink).await {
        Ok(Some(fact)) => console::paint(&format!("\n{fact}\n"), Color::Green),
        // The sink narration already explained the dry cycle.
        Ok(None) => {}
        Err(err) => {
            tracing::error!("discovery request failed: {err}");
            console::paint(&format!("\nGeneration failed: {err}\n"), Color::Red);
        }
    }
}

fn start_background(orchestrator: &mut Orchestrator<ScriptedSession>) {
    if orchestrator.background_running() {
        console::paint(
            "Background generation already in progress. Select 3 to wait for it instead.\n",
            Color::Red,
        );
        return;
    }

    match orchestrator.spawn_background() {
        Ok(()) => println!("Background generation started."),
        Err(err) => {
            tracing::error!("background generation failed to start: {err}");
            console::paint(
                &format!("Could not start background generation: {err}\n"),
                Color::Red,
            );
        }
    }
}

/// Prints the generation prompt built from live store contents, for pasting
/// into a larger model elsewhere.
fn dump_prompt(db_path: &Path) -> Result<()> {
    let store = DiscoveryStore::open(db_path)?;
    let interests = names(&store.interests()?);
    let dislikes = names(&store.dislikes()?);
    let mut known: Vec<String> = store
        .known_facts()?
        .iter()
        .map(|fact| fact.prompt_text().to_string())
        .collect();
    known.extend(store.pending_facts()?.into_iter().map(|fact| fact.text));

    println!("{}", generation_prompt(&interests, &dislikes, &known));
    Ok(())
}

fn names(preferences: &[Preference]) -> Vec<String> {
    preferences
        .iter()
        .map(|preference| preference.name.clone())
        .collect()
}
