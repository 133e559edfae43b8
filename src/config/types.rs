use serde::Deserialize;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Remote source connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SourceConfig {
    /// Base URL for the web API and post pages
    pub base_url: String,

    /// Value sent in the `X-IG-App-ID` header
    pub app_id: String,

    /// User agent presented to the source
    pub user_agent: String,

    /// Items requested per cursor page
    pub page_size: u32,

    /// GraphQL query hash for the comment listing
    pub comments_query_hash: String,

    /// GraphQL query hash for the owner timeline listing
    pub timeline_query_hash: String,

    /// Opaque credential (cookie header value) attached to every request
    pub credential: Option<String>,

    /// Environment variable consulted when `credential` is unset
    pub credential_env: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.instagram.com".to_string(),
            app_id: "936619743392459".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            page_size: 50,
            comments_query_hash: "bc3296d1ce80a24b1b6e40b1e72903f5".to_string(),
            timeline_query_hash: "e769aa130647d2354c40ea6a439bfc08".to_string(),
            credential: None,
            credential_env: "SESSION".to_string(),
        }
    }
}

/// Pacing and backoff policy between fetches
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PacingConfig {
    /// Base delay between pages (milliseconds), jittered by `jitter`
    pub base_delay_ms: u64,

    /// Fractional jitter applied to the base delay (0.5 → [0.5D, 1.5D])
    pub jitter: f64,

    /// Lower bound (inclusive) of the pages-between-long-breaks draw
    pub long_break_every_min: u32,

    /// Upper bound (exclusive) of the pages-between-long-breaks draw
    pub long_break_every_max: u32,

    /// Minimum long break (milliseconds)
    pub long_break_min_ms: u64,

    /// Random span added on top of the minimum long break (milliseconds)
    pub long_break_span_ms: u64,

    /// Backoff tiers applied on consecutive rate-limit events (minutes)
    pub backoff_tiers_minutes: Vec<u64>,

    /// Rate-limit events tolerated in one session before it ends early
    pub max_rate_limit_retries: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 40_000,
            jitter: 0.5,
            long_break_every_min: 15,
            long_break_every_max: 25,
            long_break_min_ms: 3 * 60_000,
            long_break_span_ms: 2 * 60_000,
            backoff_tiers_minutes: vec![2, 5, 10],
            max_rate_limit_retries: 6,
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionSettings {
    /// Save after this many merged records; 0 saves after every page
    pub checkpoint_every_records: usize,

    /// Upper bound on a single fetch attempt (seconds)
    pub fetch_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            checkpoint_every_records: 0,
            fetch_timeout_secs: 90,
        }
    }
}

/// Pipeline stage limits and delays
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PipelineConfig {
    /// Maximum post URLs collected for an account
    pub max_urls: usize,

    /// Maximum comments collected per post
    pub max_comments: usize,

    /// Base delay between post page fetches (milliseconds)
    pub post_delay_ms: u64,

    /// Fixed delay between stages and between per-post comment sessions (milliseconds)
    pub stage_delay_ms: u64,

    /// Whether to collect tagged users after comments
    pub with_tags: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_urls: 12,
            max_comments: 1000,
            post_delay_ms: 3_000,
            stage_delay_ms: 2_000,
            with_tags: false,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputConfig {
    /// Directory holding one checkpoint file per target
    pub checkpoint_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: "./harvest".to_string(),
        }
    }
}
