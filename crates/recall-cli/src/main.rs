//! Recall CLI - capture tasks and notes, and keep devices in sync
//!
//! Quick capture from the terminal with minimal friction; the sync
//! subcommands drive the same engine the desktop app embeds.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use recall_core::sync::{FileProvider, HttpProvider};
use recall_core::util::now_ms;
use recall_core::{
    Collection, Record, RecordId, RecordStore, RemoteProvider, SqliteStore, SyncConfig, SyncEngine,
    SyncEvent, TombstoneStore,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "A memory companion that keeps every device on the same page")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Quick capture: recall "buy milk tomorrow"
    #[arg(trailing_var_arg = true)]
    task: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new task
    #[command(alias = "new")]
    Add {
        /// Task description
        description: Vec<String>,
        /// Optional due date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,
    },
    /// Create a new note
    Note {
        /// Note content
        content: Vec<String>,
    },
    /// List recent tasks
    List {
        /// Number of tasks to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include completed tasks
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a task as completed
    Done {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Delete a task
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Synchronize with the configured remote
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Show sync configuration and last sync time
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enable sync against the configured remote
    Enable,
    /// Disable sync entirely
    Disable,
    /// Run auto-sync in the foreground until interrupted
    Watch,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] recall_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No task description provided")]
    EmptyContent,
    #[error("Task ID cannot be empty")]
    EmptyTaskId,
    #[error("Task not found for id/prefix: {0}")]
    TaskNotFound(String),
    #[error("{0}")]
    AmbiguousTaskId(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Set RECALL_SYNC_URL (and optionally RECALL_SYNC_TOKEN), or RECALL_SYNC_FILE for folder-based sync."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recall=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Add { description, due }) => run_add(&description, due, &db_path).await?,
        Some(Commands::Note { content }) => run_note(&content, &db_path).await?,
        Some(Commands::List { limit, all, json }) => run_list(limit, all, json, &db_path).await?,
        Some(Commands::Done { id }) => run_done(&id, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync { command }) => match command {
            None => run_sync(&db_path).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(json, &db_path).await?,
            Some(SyncCommands::Enable) => run_sync_enable(&db_path).await?,
            Some(SyncCommands::Disable) => run_sync_disable(&db_path).await?,
            Some(SyncCommands::Watch) => run_sync_watch(&db_path).await?,
        },
        None => {
            // Quick capture mode: recall "buy milk"
            if cli.task.is_empty() {
                use clap::CommandFactory;
                Cli::command().print_help()?;
                println!();
            } else {
                run_add(&cli.task, None, &db_path).await?;
            }
        }
    }

    Ok(())
}

fn open_store(path: &Path) -> Result<Arc<SqliteStore>, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(SqliteStore::open(path)?))
}

/// The single app-level engine, wired from the environment.
fn build_engine(store: Arc<SqliteStore>) -> Result<SyncEngine, CliError> {
    let engine = SyncEngine::new(store);
    if let Some(provider) = provider_from_env()? {
        tracing::info!("Sync provider configured: {}", provider.name());
        engine.set_provider(provider);
    }
    Ok(engine)
}

fn provider_from_env() -> Result<Option<Arc<dyn RemoteProvider>>, CliError> {
    provider_from_settings(
        env::var("RECALL_SYNC_URL").ok(),
        env::var("RECALL_SYNC_TOKEN").ok(),
        env::var("RECALL_SYNC_FILE").ok(),
    )
}

fn provider_from_settings(
    url: Option<String>,
    token: Option<String>,
    file: Option<String>,
) -> Result<Option<Arc<dyn RemoteProvider>>, CliError> {
    if let Some(path) = file.filter(|path| !path.trim().is_empty()) {
        return Ok(Some(Arc::new(FileProvider::new(path.trim().to_string()))));
    }
    if let Some(url) = url.filter(|url| !url.trim().is_empty()) {
        return Ok(Some(Arc::new(HttpProvider::new(url, token)?)));
    }
    Ok(None)
}

fn task_record(description: &str, due: Option<&str>) -> Record {
    let mut record = Record::new(uuid::Uuid::now_v7().to_string())
        .with("description", description)
        .with("timestamp", now_ms())
        .with("completed", false);
    if let Some(due) = due {
        record.insert("date", due);
    }
    record
}

async fn run_add(
    description_parts: &[String],
    due: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let description =
        normalize_content(&description_parts.join(" ")).ok_or(CliError::EmptyContent)?;

    let store = open_store(db_path)?;
    let record = task_record(&description, due.as_deref());
    let id = store.add(Collection::Tasks, record).await?;

    println!("{id}");
    Ok(())
}

async fn run_note(content_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let content = normalize_content(&content_parts.join(" ")).ok_or(CliError::EmptyContent)?;

    let store = open_store(db_path)?;
    let record = Record::new(uuid::Uuid::now_v7().to_string())
        .with("content", content)
        .with("timestamp", now_ms());
    let id = store.add(Collection::Notes, record).await?;

    println!("{id}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct TaskListItem {
    id: String,
    description: String,
    completed: bool,
    due: Option<String>,
    timestamp: i64,
    relative_time: String,
}

async fn run_list(limit: usize, all: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let mut tasks = store.get_all(Collection::Tasks).await?;

    if !all {
        tasks.retain(|task| !is_completed(task));
    }
    tasks.sort_by_key(|task| std::cmp::Reverse(task.effective_timestamp()));
    tasks.truncate(limit);

    if as_json {
        let items: Vec<TaskListItem> = tasks.iter().map(task_to_list_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if tasks.is_empty() {
        println!("No tasks.");
    } else {
        for line in format_task_lines(&tasks) {
            println!("{line}");
        }
    }

    Ok(())
}

async fn run_done(id: &str, db_path: &Path) -> Result<(), CliError> {
    let query = normalize_task_identifier(id)?;
    let store = open_store(db_path)?;
    let mut task = resolve_task(store.as_ref(), &query).await?;

    task.insert("completed", true);
    task.insert("completedAt", now_ms());
    // Bump the LWW clock so the completion wins on other devices.
    task.insert("timestamp", now_ms());
    store.update(Collection::Tasks, task.clone()).await?;

    println!("{}", task.id);
    Ok(())
}

async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let query = normalize_task_identifier(id)?;
    let store = open_store(db_path)?;
    let task = resolve_task(store.as_ref(), &query).await?;

    store.delete(Collection::Tasks, &task.id).await?;
    store
        .record_deletion(Collection::Tasks, &task.id, now_ms())
        .await?;

    println!("{}", task.id);
    Ok(())
}

async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let engine = build_engine(store)?;
    if !engine.has_provider() {
        return Err(CliError::SyncNotConfigured);
    }
    engine.load_config().await?;

    let outcome = engine.manual_sync().await;
    if !outcome.success {
        return Err(CliError::SyncFailed(
            outcome.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    if outcome.has_changes {
        println!("Sync completed ({})", outcome.direction);
    } else {
        println!("Sync completed (already up to date)");
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStatus {
    enabled: bool,
    auto_sync: bool,
    interval_ms: u64,
    last_sync: Option<String>,
    provider: Option<String>,
    device_id: String,
}

async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let engine = build_engine(store.clone())?;
    let config = engine.load_config().await?;
    let device_id = recall_core::sync::load_or_create_device_id(store.as_ref()).await?;

    let status = SyncStatus {
        enabled: config.enabled,
        auto_sync: config.auto_sync,
        interval_ms: config.interval,
        last_sync: config.last_sync,
        provider: engine.provider().map(|provider| provider.name().to_string()),
        device_id,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!(
            "enabled: {}  auto-sync: {}  interval: {}ms",
            status.enabled, status.auto_sync, status.interval_ms
        );
        println!(
            "provider: {}",
            status.provider.as_deref().unwrap_or("none configured")
        );
        println!(
            "last sync: {}",
            status.last_sync.as_deref().unwrap_or("never")
        );
        println!("device: {}", status.device_id);
    }
    Ok(())
}

async fn run_sync_enable(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let engine = build_engine(store.clone())?;
    if !engine.has_provider() {
        return Err(CliError::SyncNotConfigured);
    }

    let mut config = SyncConfig::load(store.as_ref()).await?;
    config.enabled = true;
    config.save(store.as_ref()).await?;

    println!("Sync enabled");
    Ok(())
}

async fn run_sync_disable(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let engine = build_engine(store)?;
    engine.disable_sync().await?;

    println!("Sync disabled");
    Ok(())
}

async fn run_sync_watch(db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let engine = build_engine(store)?;
    if !engine.has_provider() {
        return Err(CliError::SyncNotConfigured);
    }

    engine.add_listener(|event| match event {
        SyncEvent::SyncCompleted {
            direction,
            has_changes: true,
        } => println!("[{}] synced ({direction})", Utc::now().format("%H:%M:%S")),
        SyncEvent::SyncError { error } => {
            eprintln!("[{}] sync error: {error}", Utc::now().format("%H:%M:%S"));
        }
        _ => {}
    });

    let outcome = engine.start_auto_sync().await?;
    if !outcome.success {
        eprintln!(
            "Initial sync failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("Watching for changes (ctrl-c to stop)...");

    tokio::signal::ctrl_c().await?;
    engine.stop_auto_sync().await?;
    println!("Stopped");
    Ok(())
}

async fn resolve_task<S: RecordStore>(store: &S, query: &str) -> Result<Record, CliError> {
    if let Some(task) = store
        .get(Collection::Tasks, &RecordId::from(query))
        .await?
    {
        return Ok(task);
    }

    let tasks = store.get_all(Collection::Tasks).await?;
    let matches: Vec<&Record> = tasks
        .iter()
        .filter(|task| task.id.as_str().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::TaskNotFound(query.to_string())),
        1 => Ok(matches[0].clone()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|task| short_id(&task.id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousTaskId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn format_task_lines(tasks: &[Record]) -> Vec<String> {
    let now = now_ms();
    tasks
        .iter()
        .map(|task| {
            let id = short_id(&task.id);
            let marker = if is_completed(task) { "[x]" } else { "[ ]" };
            let description = task
                .get("description")
                .and_then(|value| value.as_str())
                .unwrap_or("(no description)");
            let relative = format_relative_time(task.effective_timestamp(), now);
            format!("{id:<13}  {marker} {description:<40}  {relative}")
        })
        .collect()
}

fn task_to_list_item(task: &Record) -> TaskListItem {
    TaskListItem {
        id: task.id.to_string(),
        description: task
            .get("description")
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .to_string(),
        completed: is_completed(task),
        due: task
            .get("date")
            .and_then(|value| value.as_str())
            .map(ToString::to_string),
        timestamp: task.effective_timestamp(),
        relative_time: format_relative_time(task.effective_timestamp(), now_ms()),
    }
}

fn is_completed(task: &Record) -> bool {
    task.get("completed")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn short_id(id: &RecordId) -> String {
    id.as_str().chars().take(13).collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_task_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTaskId)
    } else {
        Ok(trimmed.to_string())
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("RECALL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
        .join("recall.db")
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use recall_core::MemoryStore;

    use super::*;

    #[test]
    fn normalize_content_trims_and_rejects_empty() {
        assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
        assert_eq!(normalize_content(" \n\t "), None);
    }

    #[test]
    fn normalize_task_identifier_rejects_empty() {
        assert!(matches!(
            normalize_task_identifier(" \n "),
            Err(CliError::EmptyTaskId)
        ));
        assert_eq!(normalize_task_identifier(" abc ").unwrap(), "abc");
    }

    #[test]
    fn format_relative_time_units() {
        let now = 10_000_000;
        assert_eq!(format_relative_time(now - 30_000, now), "just now");
        assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
        assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    }

    #[test]
    fn task_record_carries_lww_fields() {
        let record = task_record("Buy milk", Some("2026-09-01"));
        assert_eq!(record.get("description").unwrap(), "Buy milk");
        assert_eq!(record.get("date").unwrap(), "2026-09-01");
        assert!(record.effective_timestamp() > 0);
        assert!(!is_completed(&record));
    }

    #[test]
    fn provider_from_settings_prefers_file_over_http() {
        let provider = provider_from_settings(
            Some("https://api.example.com/sync".to_string()),
            None,
            Some("/tmp/sync.json".to_string()),
        )
        .unwrap()
        .unwrap();
        assert_eq!(provider.name(), "file");

        let provider = provider_from_settings(
            Some("https://api.example.com/sync".to_string()),
            Some("token".to_string()),
            None,
        )
        .unwrap()
        .unwrap();
        assert_eq!(provider.name(), "http");

        assert!(provider_from_settings(None, None, None).unwrap().is_none());
    }

    #[test]
    fn provider_from_settings_rejects_bad_urls() {
        assert!(provider_from_settings(Some("not-a-url".to_string()), None, None).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_task_matches_exact_and_prefix() {
        let store = MemoryStore::new();
        store
            .add(Collection::Tasks, Record::new("aaaa-1111").with("n", 1))
            .await
            .unwrap();
        store
            .add(Collection::Tasks, Record::new("bbbb-2222").with("n", 2))
            .await
            .unwrap();

        let exact = resolve_task(&store, "aaaa-1111").await.unwrap();
        assert_eq!(exact.id, RecordId::from("aaaa-1111"));

        let by_prefix = resolve_task(&store, "bbbb").await.unwrap();
        assert_eq!(by_prefix.id, RecordId::from("bbbb-2222"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_task_rejects_ambiguous_and_missing() {
        let store = MemoryStore::new();
        store
            .add(Collection::Tasks, Record::new("aaaa-1111"))
            .await
            .unwrap();
        store
            .add(Collection::Tasks, Record::new("aaaa-2222"))
            .await
            .unwrap();

        assert!(matches!(
            resolve_task(&store, "aaaa").await,
            Err(CliError::AmbiguousTaskId(_))
        ));
        assert!(matches!(
            resolve_task(&store, "zzzz").await,
            Err(CliError::TaskNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_records_a_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("recall.db");

        let store = open_store(&db_path).unwrap();
        let record = task_record("short lived", None);
        let id = store.add(Collection::Tasks, record).await.unwrap();
        drop(store);

        run_delete(id.as_str(), &db_path).await.unwrap();

        let store = open_store(&db_path).unwrap();
        assert!(store.get_all(Collection::Tasks).await.unwrap().is_empty());
        let tombstones = store.get_tombstones(Collection::Tasks).await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].id, id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn done_bumps_the_lww_clock() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("recall.db");

        let store = open_store(&db_path).unwrap();
        let mut record = task_record("finish me", None);
        record.insert("timestamp", 1000);
        let id = store.add(Collection::Tasks, record).await.unwrap();
        drop(store);

        run_done(id.as_str(), &db_path).await.unwrap();

        let store = open_store(&db_path).unwrap();
        let task = store.get(Collection::Tasks, &id).await.unwrap().unwrap();
        assert!(is_completed(&task));
        assert!(task.effective_timestamp() > 1000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_without_provider_reports_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("recall.db");

        let store = open_store(&db_path).unwrap();
        let engine = SyncEngine::new(store);
        assert!(!engine.has_provider());
    }
}
