//! Crawler module for resumable, paced collection
//!
//! This module contains the core collection logic, including:
//! - The cursor fetcher boundary and web backends
//! - Response parsing for the source's JSON payloads and post pages
//! - Pacing, long breaks and rate-limit backoff
//! - The collection session state machine
//! - The multi-stage pipeline for one account

mod fetcher;
pub mod pacer;
mod parser;
mod pipeline;
mod session;
mod sources;

pub use fetcher::{build_http_client, is_throttled, CursorFetcher, FetchError, Page};
pub use pacer::{
    classify, Clock, Outcome, PacingPolicy, Pause, PauseKind, RateController, TokioClock,
};
pub use pipeline::{FetcherFactory, HttpSourceFactory, Pipeline, Stage};
pub use session::{CheckpointCadence, Session, SessionConfig};
pub use sources::{
    CommentFetcher, PostPageFetcher, PostUrlFetcher, ProfileFetcher, SourceContext, TagFetcher,
};

use crate::config::Config;
use crate::output::PipelineReport;
use std::sync::Arc;
use std::time::Duration;

/// Runs the full pipeline for `username` against the web source
///
/// # Arguments
///
/// * `config` - The harvester configuration
/// * `username` - Account to collect
/// * `credential` - Session cookie value sent with every request
///
/// # Returns
///
/// * `Ok(PipelineReport)` - The pipeline ran; check `succeeded()` for the outcome
/// * `Err(FetchError)` - The HTTP client could not be built
pub async fn harvest(
    config: Config,
    username: &str,
    credential: &str,
) -> Result<PipelineReport, FetchError> {
    let timeout = Duration::from_secs(config.session.fetch_timeout_secs);
    let ctx = SourceContext::new(config.source.clone(), credential.to_string(), timeout)?;
    let factory = HttpSourceFactory::new(Arc::new(ctx));
    let pipeline = Pipeline::new(config, Box::new(factory), Box::new(TokioClock));

    Ok(pipeline.run(username).await)
}
