//! Pagi Heartbeat Service (Cognitive Cycle)
//!
//! A long-running daemon that owns one cycle orchestrator and wakes it on a fixed interval
//! to evaluate goals and run budgeted background work.
//!
//! Goals come from the journal plus the `[[goals]]` tables of the config file. Lines written
//! to stdin become working memory, e.g. `tail -F notes.log | pagi-daemon`.

use pagi_cognition::collaborators::{Collaborators, WorkingMemory};
use pagi_cognition::{CognitionConfig, CycleHeartbeat, CycleOrchestrator, GoalStore, SledJournal};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Confidence assigned to lines fed through stdin.
const STDIN_MEMORY_CONFIDENCE: f64 = 0.8;
/// Working memory older than this is dropped as new lines arrive.
const MEMORY_RETENTION_DAYS: i64 = 7;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[pagi-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match CognitionConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load cognition config");
            std::process::exit(1);
        }
    };

    // NOTE: sled is single-writer; point PAGI_COGNITION__JOURNAL_PATH at a path no other
    // process has open.
    let journal = match SledJournal::open_path(&config.journal_path) {
        Ok(j) => Arc::new(j),
        Err(e) => {
            tracing::error!(error = %e, path = %config.journal_path, "Failed to open journal");
            std::process::exit(1);
        }
    };

    let goals = match journal.restore_goals(&config.goals) {
        Ok(goals) => goals,
        Err(e) => {
            tracing::warn!(error = %e, "Journal unreadable; starting from configured goals only");
            let mut goals = GoalStore::new();
            if let Err(e) = goals.seed(&config.goals) {
                tracing::warn!(error = %e, "Configured goals could not be created");
            }
            goals
        }
    };

    let (collaborators, working_memory) = Collaborators::in_process();
    tokio::spawn(feed_working_memory(working_memory));
    let interval = config.wake_interval();
    let orchestrator = CycleOrchestrator::new(config, collaborators)
        .with_goals(goals)
        .with_journal(journal.clone());
    let orchestrator = Arc::new(Mutex::new(orchestrator));

    tracing::info!(
        wake_interval_secs = interval.as_secs(),
        goals = orchestrator.lock().await.goals().len(),
        "Pagi daemon started"
    );

    let heartbeat = CycleHeartbeat::spawn(Arc::clone(&orchestrator), interval);
    heartbeat.wake_now();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    tracing::info!("CTRL-C received; shutting down daemon");
    heartbeat.shutdown().await;

    if let Err(e) = journal.flush() {
        tracing::warn!(error = %e, "Journal flush failed");
    }
}

/// Each non-empty stdin line becomes a working-memory item for the next cycle.
async fn feed_working_memory(memory: Arc<WorkingMemory>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let retention = chrono::Duration::days(MEMORY_RETENTION_DAYS);
    match memory
        .ingest_lines(stdin, STDIN_MEMORY_CONFIDENCE, retention)
        .await
    {
        Ok(lines) => tracing::info!(lines, "stdin closed; working memory feed stopped"),
        Err(e) => tracing::warn!(error = %e, "stdin read failed; working memory feed stopped"),
    }
}
