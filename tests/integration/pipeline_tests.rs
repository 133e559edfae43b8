//! Integration tests for the pipeline orchestrator
//!
//! A fake fetcher factory hands out single-page fetchers so stage gating
//! and reporting can be checked without a network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_harvest::crawler::{Clock, CursorFetcher, FetchError, FetcherFactory, Page, Pipeline, Stage};
use sumi_harvest::output::StageStatus;
use sumi_harvest::storage::{
    CommentRecord, PostRecord, PostUrlRecord, ProfileRecord, TagRelationRecord,
};
use sumi_harvest::Config;
use tempfile::TempDir;

type Scripted<R> = Result<Vec<R>, FetchError>;

/// Fetcher that answers its first call with one final page
struct OnceFetcher<R> {
    result: Option<Scripted<R>>,
}

impl<R> OnceFetcher<R> {
    fn boxed(result: Scripted<R>) -> Box<Self> {
        Box::new(Self {
            result: Some(result),
        })
    }
}

#[async_trait]
impl<R: Send> CursorFetcher for OnceFetcher<R> {
    type Item = R;

    async fn fetch(&mut self, _target: &str, _cursor: &str) -> Result<Page<R>, FetchError> {
        match self.result.take() {
            Some(Ok(items)) => Ok(Page::last(items)),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Fatal("called twice".to_string())),
        }
    }
}

/// What the fake factory was asked for
#[derive(Default)]
struct CallLog {
    calls: Vec<&'static str>,
    post_urls: Vec<String>,
}

struct FakeFactory {
    log: Arc<Mutex<CallLog>>,
    profile: Mutex<Option<Scripted<ProfileRecord>>>,
    urls: Mutex<Option<Scripted<PostUrlRecord>>>,
    comments: Mutex<VecDeque<Scripted<CommentRecord>>>,
}

impl FakeFactory {
    fn new(log: Arc<Mutex<CallLog>>) -> Self {
        Self {
            log,
            profile: Mutex::new(Some(Ok(vec![create_test_profile()]))),
            urls: Mutex::new(Some(Ok(vec![
                create_test_url("AAA", 100),
                create_test_url("BBB", 300),
                create_test_url("CCC", 200),
            ]))),
            comments: Mutex::new(VecDeque::new()),
        }
    }

    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().calls.push(call);
    }
}

impl FetcherFactory for FakeFactory {
    fn profile(&self) -> Box<dyn CursorFetcher<Item = ProfileRecord>> {
        self.record("profile");
        OnceFetcher::boxed(self.profile.lock().unwrap().take().unwrap_or(Ok(vec![])))
    }

    fn post_urls(&self) -> Box<dyn CursorFetcher<Item = PostUrlRecord>> {
        self.record("post_urls");
        OnceFetcher::boxed(self.urls.lock().unwrap().take().unwrap_or(Ok(vec![])))
    }

    fn posts(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = PostRecord>> {
        self.record("posts");
        self.log.lock().unwrap().post_urls = urls.clone();
        let posts = urls.iter().map(|url| create_test_post(url)).collect();
        OnceFetcher::boxed(Ok(posts))
    }

    fn comments(&self) -> Box<dyn CursorFetcher<Item = CommentRecord>> {
        self.record("comments");
        let next = self
            .comments
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![create_test_comment("1")]));
        OnceFetcher::boxed(next)
    }

    fn tags(&self, urls: Vec<String>) -> Box<dyn CursorFetcher<Item = TagRelationRecord>> {
        self.record("tags");
        let tags = urls
            .iter()
            .map(|url| TagRelationRecord {
                shortcode: shortcode_of(url),
                username: "friend".to_string(),
                slides: vec![1],
            })
            .collect();
        OnceFetcher::boxed(Ok(tags))
    }
}

#[derive(Default)]
struct InstantClock {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for InstantClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

fn shortcode_of(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn create_test_profile() -> ProfileRecord {
    ProfileRecord {
        id: "42".to_string(),
        username: "psv".to_string(),
        full_name: Some("PSV".to_string()),
        biography: None,
        external_url: None,
        followers_count: Some(1000),
        following_count: Some(10),
        posts_count: Some(3),
        is_private: Some(false),
        is_verified: Some(true),
        is_business_account: Some(false),
        profile_pic_url: None,
        category_name: None,
    }
}

fn create_test_url(shortcode: &str, taken_at: i64) -> PostUrlRecord {
    PostUrlRecord {
        shortcode: shortcode.to_string(),
        url: format!("https://www.instagram.com/p/{}/", shortcode),
        taken_at: Some(taken_at),
        is_video: Some(false),
    }
}

fn create_test_post(url: &str) -> PostRecord {
    PostRecord {
        shortcode: shortcode_of(url),
        id: None,
        url: url.to_string(),
        post_type: Some("photo".to_string()),
        caption: None,
        hashtags: vec![],
        likes: Some(5),
        comments: Some(1),
        video_view_count: None,
        taken_at: None,
        owner_username: Some("psv".to_string()),
        location: None,
    }
}

fn create_test_comment(id: &str) -> CommentRecord {
    CommentRecord {
        id: id.to_string(),
        text: Some("nice".to_string()),
        created_at: None,
        owner_id: None,
        owner_username: None,
        owner_is_verified: None,
        likes: 0,
        replies: 0,
    }
}

fn create_test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output.checkpoint_dir = dir.path().to_string_lossy().to_string();
    config.pipeline.max_urls = 2;
    config
}

fn create_pipeline(config: Config, factory: FakeFactory) -> Pipeline {
    Pipeline::new(config, Box::new(factory), Box::new(InstantClock::default())).with_seed(1)
}

#[tokio::test]
async fn test_full_pipeline_runs_every_stage() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let pipeline = create_pipeline(create_test_config(&dir), FakeFactory::new(log.clone()));

    let report = pipeline.run("psv").await;

    assert!(report.succeeded());
    assert!(report.finished_at.is_some());
    let statuses: Vec<_> = report.stages.iter().map(|s| (s.stage, s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (Stage::Profile, StageStatus::Completed),
            (Stage::Urls, StageStatus::Completed),
            (Stage::Posts, StageStatus::Completed),
            (Stage::Comments, StageStatus::Completed),
        ]
    );

    // Newest two URLs, newest first
    let log = log.lock().unwrap();
    assert_eq!(
        log.post_urls,
        vec![
            "https://www.instagram.com/p/BBB/".to_string(),
            "https://www.instagram.com/p/CCC/".to_string(),
        ]
    );
    assert_eq!(
        log.calls,
        vec!["profile", "post_urls", "posts", "comments", "comments"]
    );

    assert_eq!(report.stage(Stage::Posts).unwrap().total_records(), 2);
    assert_eq!(report.stage(Stage::Comments).unwrap().sessions.len(), 2);
    assert!(dir.path().join("comments_BBB.json").exists());
    assert!(dir.path().join("posts_psv.json").exists());
}

#[tokio::test]
async fn test_empty_url_stage_stops_pipeline() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let factory = FakeFactory::new(log.clone());
    *factory.urls.lock().unwrap() = Some(Ok(vec![]));
    let pipeline = create_pipeline(create_test_config(&dir), factory);

    let report = pipeline.run("psv").await;

    assert!(!report.succeeded());
    assert_eq!(report.failed_stage().unwrap().stage, Stage::Urls);
    assert_eq!(
        report.stage(Stage::Profile).unwrap().status,
        StageStatus::Completed
    );
    assert_eq!(
        report.stage(Stage::Posts).unwrap().status,
        StageStatus::Skipped
    );
    assert_eq!(
        report.stage(Stage::Comments).unwrap().status,
        StageStatus::Skipped
    );
    assert_eq!(log.lock().unwrap().calls, vec!["profile", "post_urls"]);
}

#[tokio::test]
async fn test_profile_failure_skips_everything() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let factory = FakeFactory::new(log.clone());
    *factory.profile.lock().unwrap() = Some(Err(FetchError::Fatal("HTTP 404".to_string())));
    let pipeline = create_pipeline(create_test_config(&dir), factory);

    let report = pipeline.run("psv").await;

    let profile = report.stage(Stage::Profile).unwrap();
    assert_eq!(profile.status, StageStatus::Failed);
    assert!(profile.message.as_deref().unwrap().contains("HTTP 404"));
    assert_eq!(report.stages.len(), 4);
    assert!(report.stages[1..]
        .iter()
        .all(|s| s.status == StageStatus::Skipped));
    assert_eq!(log.lock().unwrap().calls, vec!["profile"]);
}

#[tokio::test]
async fn test_comment_failure_is_partial() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let factory = FakeFactory::new(log);
    factory
        .comments
        .lock()
        .unwrap()
        .push_back(Err(FetchError::Fatal("HTTP 404".to_string())));
    let pipeline = create_pipeline(create_test_config(&dir), factory);

    let report = pipeline.run("psv").await;

    let comments = report.stage(Stage::Comments).unwrap();
    assert_eq!(comments.status, StageStatus::Partial);
    assert_eq!(comments.failed_sessions, 1);
    assert_eq!(comments.total_records(), 1);
    assert!(report.succeeded());
    assert_eq!(report.itemised_errors().len(), 1);
}

#[tokio::test]
async fn test_tag_stage_runs_when_enabled() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let mut config = create_test_config(&dir);
    config.pipeline.with_tags = true;
    let pipeline = create_pipeline(config, FakeFactory::new(log.clone()));

    let report = pipeline.run("psv").await;

    let tags = report.stage(Stage::Tags).unwrap();
    assert_eq!(tags.status, StageStatus::Completed);
    assert_eq!(tags.total_records(), 2);
    assert_eq!(log.lock().unwrap().calls.last(), Some(&"tags"));
}

#[tokio::test]
async fn test_rerun_resumes_from_checkpoints() {
    let dir = TempDir::new().unwrap();
    let log = Arc::new(Mutex::new(CallLog::default()));
    let pipeline = create_pipeline(create_test_config(&dir), FakeFactory::new(log.clone()));
    pipeline.run("psv").await;

    // The second URL listing is empty, but the first run's URLs are on file
    let factory = FakeFactory::new(log.clone());
    *factory.urls.lock().unwrap() = Some(Ok(vec![]));
    let pipeline = create_pipeline(create_test_config(&dir), factory);

    let report = pipeline.run("psv").await;

    assert!(report.succeeded());
    assert_eq!(report.stage(Stage::Urls).unwrap().total_records(), 3);
}
