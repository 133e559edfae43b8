//! Integration tests for the collection session
//!
//! These tests drive a session with a scripted fetcher and a clock that
//! records waits instead of sleeping, against real checkpoint files in a
//! temporary directory.

use async_trait::async_trait;
use std::cell::Cell;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use sumi_harvest::crawler::{
    CheckpointCadence, Clock, CursorFetcher, FetchError, PacingPolicy, Page, Session,
    SessionConfig,
};
use sumi_harvest::output::Termination;
use sumi_harvest::storage::{
    Checkpoint, CheckpointStore, CommentRecord, JsonCheckpointStore, StorageError, StorageResult,
};
use sumi_harvest::target::page_reference;
use sumi_harvest::{HarvestError, RecordKind};
use tempfile::TempDir;

const TARGET: &str = "C0ffee123";

/// Fetcher that replays a fixed sequence of results
struct ScriptedFetcher {
    script: VecDeque<Result<Page<CommentRecord>, FetchError>>,
    cursors: Vec<String>,
    recoveries: u32,
    resume_to: Option<String>,
    known: usize,
}

impl ScriptedFetcher {
    fn new(script: Vec<Result<Page<CommentRecord>, FetchError>>) -> Self {
        Self {
            script: script.into(),
            cursors: Vec::new(),
            recoveries: 0,
            resume_to: None,
            known: 0,
        }
    }

    fn resuming_to(mut self, cursor: &str) -> Self {
        self.resume_to = Some(cursor.to_string());
        self
    }
}

#[async_trait]
impl CursorFetcher for ScriptedFetcher {
    type Item = CommentRecord;

    async fn fetch(&mut self, _target: &str, cursor: &str) -> Result<Page<CommentRecord>, FetchError> {
        self.cursors.push(cursor.to_string());
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Fatal("script exhausted".to_string())))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.recoveries += 1;
        Ok(())
    }

    fn resume_cursor(&self, _target: &str, _cursor: &str) -> Option<String> {
        self.resume_to.clone()
    }

    fn narrow(&mut self, known: &HashSet<String>) {
        self.known = known.len();
    }
}

/// Fetcher whose first call never answers in time
#[derive(Default)]
struct HangingFetcher {
    cursors: Vec<String>,
    recoveries: u32,
}

#[async_trait]
impl CursorFetcher for HangingFetcher {
    type Item = CommentRecord;

    async fn fetch(&mut self, _target: &str, cursor: &str) -> Result<Page<CommentRecord>, FetchError> {
        self.cursors.push(cursor.to_string());
        if self.cursors.len() == 1 {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(Page::last(vec![create_test_comment("1", "text")]))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.recoveries += 1;
        Ok(())
    }
}

/// Clock that records every wait
#[derive(Default)]
struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Store that fails every save after the first `allowed`
struct FlakyStore {
    inner: JsonCheckpointStore,
    allowed: usize,
    saves: Cell<usize>,
}

impl CheckpointStore<CommentRecord> for FlakyStore {
    fn load(&self, target: &str) -> StorageResult<Option<Checkpoint<CommentRecord>>> {
        self.inner.load(target)
    }

    fn save(&self, checkpoint: &Checkpoint<CommentRecord>) -> StorageResult<()> {
        let saves = self.saves.get();
        self.saves.set(saves + 1);
        if saves >= self.allowed {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(checkpoint)
    }
}

fn create_test_comment(id: &str, text: &str) -> CommentRecord {
    CommentRecord {
        id: id.to_string(),
        text: Some(text.to_string()),
        created_at: Some(1_700_000_000),
        owner_id: Some("42".to_string()),
        owner_username: Some("someone".to_string()),
        owner_is_verified: Some(false),
        likes: 0,
        replies: 0,
    }
}

/// A page holding comments `start..start + count`
fn create_test_page(start: usize, count: usize, cursor: Option<&str>, has_more: bool) -> Page<CommentRecord> {
    let items = (start..start + count)
        .map(|i| create_test_comment(&format!("c{}", i), "text"))
        .collect();
    Page::new(items, cursor.map(str::to_string), has_more)
}

fn three_page_script() -> Vec<Result<Page<CommentRecord>, FetchError>> {
    vec![
        Ok(create_test_page(0, 50, Some("p1"), true)),
        Ok(create_test_page(50, 50, Some("p2"), true)),
        Ok(create_test_page(100, 20, None, false)),
    ]
}

fn create_test_config() -> SessionConfig {
    SessionConfig {
        max_items: Some(1000),
        max_pages: None,
        cadence: CheckpointCadence::EveryPage,
        fetch_timeout: Duration::from_secs(5),
        max_rate_limit_retries: 6,
    }
}

async fn run_session(
    config: SessionConfig,
    fetcher: &mut dyn CursorFetcher<Item = CommentRecord>,
    store: &dyn CheckpointStore<CommentRecord>,
    clock: &RecordingClock,
) -> Result<sumi_harvest::output::SessionSummary, HarvestError> {
    Session::new(
        TARGET,
        RecordKind::Comment,
        config,
        PacingPolicy::default(),
        fetcher,
        store,
        clock,
    )
    .with_seed(7)
    .run()
    .await
}

fn load(store: &JsonCheckpointStore) -> Checkpoint<CommentRecord> {
    store.load(TARGET).unwrap().expect("checkpoint should exist")
}

#[tokio::test]
async fn test_session_walks_all_pages() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(three_page_script());

    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();

    assert_eq!(fetcher.cursors, vec!["", "p1", "p2"]);
    assert_eq!(summary.total_fetched, 120);
    assert_eq!(summary.total_records, 120);
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.inserted, 120);
    assert_eq!(summary.termination, Termination::Exhausted);

    // One wait between each pair of pages, none after the last
    assert_eq!(clock.sleeps().len(), 2);

    let checkpoint = load(&store);
    assert_eq!(checkpoint.record_count(), 120);
    assert!(checkpoint.errors.is_empty());
}

#[tokio::test]
async fn test_item_cap_stops_after_page() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 50, Some("p1"), true)),
        Ok(create_test_page(50, 50, Some("p2"), true)),
        Ok(create_test_page(100, 50, Some("p3"), true)),
    ]);

    let config = SessionConfig {
        max_items: Some(60),
        ..create_test_config()
    };
    let summary = run_session(config, &mut fetcher, &store, &clock)
        .await
        .unwrap();

    assert_eq!(fetcher.cursors.len(), 2);
    assert_eq!(summary.total_records, 100);
    assert_eq!(summary.termination, Termination::ItemCap);
}

#[tokio::test]
async fn test_interrupted_then_resumed_matches_uninterrupted() {
    // Uninterrupted reference run
    let reference_dir = TempDir::new().unwrap();
    let reference_store = JsonCheckpointStore::new(reference_dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(three_page_script());
    run_session(create_test_config(), &mut fetcher, &reference_store, &clock)
        .await
        .unwrap();

    // Interrupted run: the third page keeps failing
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 50, Some("p1"), true)),
        Ok(create_test_page(50, 50, Some("p2"), true)),
        Err(FetchError::transient("connection reset")),
        Err(FetchError::transient("connection reset")),
    ]);
    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();
    assert_eq!(summary.termination, Termination::Degraded);
    assert_eq!(load(&store).record_count(), 100);

    // Resumed run sees the records already on file
    let mut fetcher = ScriptedFetcher::new(three_page_script());
    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();
    assert_eq!(fetcher.known, 100);
    assert_eq!(summary.inserted, 20);
    assert_eq!(summary.updated, 100);

    let resumed = load(&store);
    let expected = load(&reference_store);
    assert_eq!(resumed.records, expected.records);
    assert_eq!(resumed.errors.len(), 1);
}

#[tokio::test]
async fn test_rate_limit_backoff_tiers() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Err(FetchError::RateLimited("429".to_string())),
        Err(FetchError::RateLimited("429".to_string())),
        Err(FetchError::RateLimited("429".to_string())),
        Err(FetchError::RateLimited("429".to_string())),
        Ok(create_test_page(0, 10, None, false)),
    ]);

    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();

    let minutes = |m: u64| Duration::from_secs(m * 60);
    assert_eq!(
        clock.sleeps(),
        vec![minutes(2), minutes(5), minutes(10), minutes(10)]
    );
    assert_eq!(summary.rate_limit_events, 4);
    assert_eq!(summary.total_records, 10);
    assert_eq!(summary.termination, Termination::Exhausted);
    assert!(summary.errors.is_empty());

    // Every retry asks for the same page
    assert!(fetcher.cursors.iter().all(|c| c.is_empty()));
}

#[tokio::test]
async fn test_rate_limit_budget_ends_session() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 50, Some("p1"), true)),
        Err(FetchError::RateLimited("429".to_string())),
        Err(FetchError::RateLimited("429".to_string())),
        Err(FetchError::RateLimited("429".to_string())),
    ]);

    let config = SessionConfig {
        max_rate_limit_retries: 2,
        ..create_test_config()
    };
    let summary = run_session(config, &mut fetcher, &store, &clock)
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::RateLimitExhausted);
    assert_eq!(summary.total_records, 50);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].source_reference, page_reference(TARGET, "p1"));

    let checkpoint = load(&store);
    assert_eq!(checkpoint.record_count(), 50);
    assert_eq!(checkpoint.errors.len(), 1);
}

#[tokio::test]
async fn test_degraded_page_is_skipped_with_resume_cursor() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 5, Some("1"), true)),
        Err(FetchError::recoverable("timed out")),
        Err(FetchError::recoverable("timed out")),
        Ok(create_test_page(5, 5, None, false)),
    ])
    .resuming_to("2");

    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();

    assert_eq!(fetcher.cursors, vec!["", "1", "1", "2"]);
    assert_eq!(fetcher.recoveries, 1);
    assert_eq!(summary.total_records, 10);
    assert_eq!(summary.termination, Termination::Exhausted);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].source_reference, page_reference(TARGET, "1"));
    assert_eq!(summary.errors[0].error_description, "timed out");

    assert_eq!(load(&store).errors.len(), 1);
}

#[tokio::test]
async fn test_fatal_error_escalates_with_partial_results() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 50, Some("p1"), true)),
        Err(FetchError::Fatal("HTTP 404".to_string())),
    ]);

    let result = run_session(create_test_config(), &mut fetcher, &store, &clock).await;

    match result {
        Err(HarvestError::FatalTarget {
            target,
            reason,
            partial,
        }) => {
            assert_eq!(target, TARGET);
            assert_eq!(reason, "HTTP 404");
            assert_eq!(partial.total_records, 50);
            assert_eq!(partial.termination, Termination::Fatal);
        }
        other => panic!("expected a fatal target error, got {:?}", other),
    }

    let checkpoint = load(&store);
    assert_eq!(checkpoint.record_count(), 50);
    assert_eq!(checkpoint.errors.len(), 1);
}

#[tokio::test]
async fn test_fatal_first_page_writes_no_checkpoint() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![Err(FetchError::Fatal("HTTP 404".to_string()))]);

    let result = run_session(create_test_config(), &mut fetcher, &store, &clock).await;

    assert!(matches!(result, Err(HarvestError::FatalTarget { .. })));
    assert!(!store.path_for(TARGET).exists());
}

#[tokio::test]
async fn test_persistence_failure_keeps_previous_checkpoint() {
    let dir = TempDir::new().unwrap();
    let inner = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let store = FlakyStore {
        inner: inner.clone(),
        allowed: 1,
        saves: Cell::new(0),
    };
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(three_page_script());

    let result = run_session(create_test_config(), &mut fetcher, &store, &clock).await;

    assert!(matches!(result, Err(HarvestError::Persistence { .. })));
    // The session stops at the failed write
    assert_eq!(fetcher.cursors.len(), 2);
    assert_eq!(load(&inner).record_count(), 50);
}

#[tokio::test]
async fn test_later_run_overwrites_records() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();

    let mut first = ScriptedFetcher::new(vec![Ok(Page::new(
        vec![create_test_comment("1", "old")],
        None,
        false,
    ))]);
    run_session(create_test_config(), &mut first, &store, &clock)
        .await
        .unwrap();
    let first_collected_at = load(&store).first_collected_at;

    let mut second = ScriptedFetcher::new(vec![Ok(Page::new(
        vec![
            create_test_comment("1", "new"),
            create_test_comment("2", "other"),
        ],
        None,
        false,
    ))]);
    let summary = run_session(create_test_config(), &mut second, &store, &clock)
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.updated, 1);

    let checkpoint = load(&store);
    assert_eq!(checkpoint.record_count(), 2);
    assert_eq!(
        checkpoint.records.get("1").unwrap().text.as_deref(),
        Some("new")
    );
    assert_eq!(checkpoint.first_collected_at, first_collected_at);
    assert!(checkpoint.last_updated_at >= first_collected_at);
}

#[tokio::test]
async fn test_checkpoint_cadence_by_records() {
    let dir = TempDir::new().unwrap();
    let inner = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let store = FlakyStore {
        inner,
        allowed: usize::MAX,
        saves: Cell::new(0),
    };
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(three_page_script());

    let config = SessionConfig {
        cadence: CheckpointCadence::EveryRecords(100),
        ..create_test_config()
    };
    run_session(config, &mut fetcher, &store, &clock)
        .await
        .unwrap();

    // Once after the second page, once at the end
    assert_eq!(store.saves.get(), 2);
}

#[tokio::test]
async fn test_fetch_timeout_recovers_and_retries() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = HangingFetcher::default();

    let config = SessionConfig {
        fetch_timeout: Duration::from_millis(50),
        ..create_test_config()
    };
    let summary = run_session(config, &mut fetcher, &store, &clock)
        .await
        .unwrap();

    // The timed-out page is retried once on the same cursor after recovery
    assert_eq!(fetcher.cursors, vec!["", ""]);
    assert_eq!(fetcher.recoveries, 1);
    assert_eq!(summary.total_records, 1);
    assert_eq!(summary.termination, Termination::Exhausted);
    assert!(summary.errors.is_empty());

    let checkpoint = load(&store);
    assert_eq!(checkpoint.record_count(), 1);
    assert!(checkpoint.errors.is_empty());
}

#[tokio::test]
async fn test_repeated_cursor_stops_session() {
    let dir = TempDir::new().unwrap();
    let store = JsonCheckpointStore::new(dir.path(), RecordKind::Comment);
    let clock = RecordingClock::default();
    let mut fetcher = ScriptedFetcher::new(vec![
        Ok(create_test_page(0, 5, Some("p1"), true)),
        Ok(create_test_page(5, 5, Some("p1"), true)),
        Ok(create_test_page(10, 5, Some("p2"), true)),
    ]);

    let summary = run_session(create_test_config(), &mut fetcher, &store, &clock)
        .await
        .unwrap();

    assert_eq!(fetcher.cursors, vec!["", "p1"]);
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.total_records, 10);
    assert_eq!(summary.termination, Termination::Exhausted);
    assert_eq!(load(&store).record_count(), 10);
}
