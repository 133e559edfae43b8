//! Web backends for the cursor fetcher
//!
//! Every backend shares one `SourceContext`: the source settings, the
//! credential, and a single HTTP client that `recover()` rebuilds. Backends:
//! - `ProfileFetcher`: one page holding the account profile
//! - `PostUrlFetcher`: the account timeline, keyed by GraphQL cursor
//! - `PostPageFetcher`: post pages for a batch of URLs, one per page
//! - `CommentFetcher`: top-level comments for one post
//! - `TagFetcher`: tagged users for a batch of URLs, one post per page

use crate::config::SourceConfig;
use crate::crawler::parser::{
    find_media_in_page, parse_comments, parse_post, parse_profile, parse_tag_relations,
    parse_timeline,
};
use crate::crawler::{build_http_client, CursorFetcher, FetchError, Page};
use crate::storage::{CommentRecord, PostRecord, PostUrlRecord, ProfileRecord, TagRelationRecord};
use crate::target::extract_shortcode;
use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// Shared execution context for the web backends
///
/// Sessions use it one at a time. `rebuild` swaps in a fresh client, which
/// drops pooled connections and any state the old client carried.
#[derive(Debug)]
pub struct SourceContext {
    config: SourceConfig,
    credential: String,
    timeout: Duration,
    client: RwLock<Client>,
}

impl SourceContext {
    /// Builds the context and its first client
    ///
    /// # Arguments
    ///
    /// * `config` - Source connection settings
    /// * `credential` - Opaque cookie header value, already resolved
    /// * `timeout` - Upper bound on a single request
    pub fn new(
        config: SourceConfig,
        credential: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let credential = credential.into();
        let client = build_http_client(&config, &credential, timeout)?;

        Ok(Self {
            config,
            credential,
            timeout,
            client: RwLock::new(client),
        })
    }

    /// Returns the source settings
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Returns a handle to the current client
    pub fn client(&self) -> Client {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the client with a freshly built one
    pub fn rebuild(&self) -> Result<(), FetchError> {
        let fresh = build_http_client(&self.config, &self.credential, self.timeout)?;
        match self.client.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        tracing::info!("Rebuilt HTTP client");
        Ok(())
    }

    /// Resolves a path against the base URL
    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let base = format!("{}/", self.config.base_url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|b| b.join(path))
            .map_err(|e| FetchError::Fatal(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Sends a GET and returns the body of a usable response
    async fn get_text(&self, url: Url, referer: Option<&str>) -> Result<String, FetchError> {
        let mut request = self.client().get(url.clone());
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&e))?;

        if let Some(error) = FetchError::from_response(status, &body) {
            tracing::debug!("GET {} failed: {}", url, error);
            return Err(error);
        }

        Ok(body)
    }

    /// Sends a GET and decodes the body as JSON
    ///
    /// A body that is not JSON (typically a login interstitial) is transient.
    async fn get_json(&self, url: Url, referer: Option<&str>) -> Result<Value, FetchError> {
        let body = self.get_text(url, referer).await?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::transient(format!("Response was not JSON: {}", e)))
    }

    fn profile_url(&self, username: &str) -> Result<Url, FetchError> {
        let mut url = self.endpoint("api/v1/users/web_profile_info/")?;
        url.query_pairs_mut().append_pair("username", username);
        Ok(url)
    }

    fn graphql_url(&self, query_hash: &str, variables: &Value) -> Result<Url, FetchError> {
        let mut url = self.endpoint("graphql/query/")?;
        url.query_pairs_mut()
            .append_pair("query_hash", query_hash)
            .append_pair("variables", &variables.to_string());
        Ok(url)
    }

    fn page_referer(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

/// Fetches an account profile as a single one-item page
pub struct ProfileFetcher {
    ctx: Arc<SourceContext>,
}

impl ProfileFetcher {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CursorFetcher for ProfileFetcher {
    type Item = ProfileRecord;

    async fn fetch(&mut self, target: &str, _cursor: &str) -> Result<Page<ProfileRecord>, FetchError> {
        let url = self.ctx.profile_url(target)?;
        let referer = self.ctx.page_referer(&format!("{}/", target));
        let body = self.ctx.get_json(url, Some(&referer)).await?;

        let profile = parse_profile(&body).map_err(FetchError::Fatal)?;
        Ok(Page::last(vec![profile]))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.ctx.rebuild()
    }
}

/// Walks an account timeline for post URLs
///
/// The first page comes from the web profile endpoint, which also yields the
/// owner id. Later pages use the GraphQL timeline query keyed by that id.
pub struct PostUrlFetcher {
    ctx: Arc<SourceContext>,
    owner_id: Option<String>,
}

impl PostUrlFetcher {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self {
            ctx,
            owner_id: None,
        }
    }

    async fn fetch_first(&mut self, target: &str) -> Result<Page<PostUrlRecord>, FetchError> {
        let url = self.ctx.profile_url(target)?;
        let referer = self.ctx.page_referer(&format!("{}/", target));
        let body = self.ctx.get_json(url, Some(&referer)).await?;

        let (owner_id, listing) =
            parse_timeline(&body, &self.ctx.config().base_url).map_err(FetchError::Fatal)?;
        if owner_id.is_some() {
            self.owner_id = owner_id;
        }

        Ok(Page::new(listing.items, listing.end_cursor, listing.has_next_page)
            .with_total(listing.count))
    }
}

#[async_trait]
impl CursorFetcher for PostUrlFetcher {
    type Item = PostUrlRecord;

    async fn fetch(&mut self, target: &str, cursor: &str) -> Result<Page<PostUrlRecord>, FetchError> {
        if cursor.is_empty() || self.owner_id.is_none() {
            let page = self.fetch_first(target).await?;
            if cursor.is_empty() {
                return Ok(page);
            }
        }

        let owner_id = self
            .owner_id
            .clone()
            .ok_or_else(|| FetchError::Fatal(format!("No owner id known for {}", target)))?;

        let variables = json!({
            "id": owner_id,
            "first": self.ctx.config().page_size,
            "after": cursor,
        });
        let url = self
            .ctx
            .graphql_url(&self.ctx.config().timeline_query_hash, &variables)?;
        let referer = self.ctx.page_referer(&format!("{}/", target));
        let body = self.ctx.get_json(url, Some(&referer)).await?;

        let (_, listing) =
            parse_timeline(&body, &self.ctx.config().base_url).map_err(FetchError::Fatal)?;

        Ok(Page::new(listing.items, listing.end_cursor, listing.has_next_page)
            .with_total(listing.count))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.ctx.rebuild()
    }
}

/// Fetches top-level comments for one post, keyed by shortcode
pub struct CommentFetcher {
    ctx: Arc<SourceContext>,
}

impl CommentFetcher {
    pub fn new(ctx: Arc<SourceContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CursorFetcher for CommentFetcher {
    type Item = CommentRecord;

    async fn fetch(&mut self, target: &str, cursor: &str) -> Result<Page<CommentRecord>, FetchError> {
        let variables = json!({
            "shortcode": target,
            "first": self.ctx.config().page_size,
            "after": cursor,
        });
        let url = self
            .ctx
            .graphql_url(&self.ctx.config().comments_query_hash, &variables)?;
        let referer = self.ctx.page_referer(&format!("p/{}/", target));
        let body = self.ctx.get_json(url, Some(&referer)).await?;

        let listing = parse_comments(&body).map_err(FetchError::Fatal)?;

        Ok(Page::new(listing.items, listing.end_cursor, listing.has_next_page)
            .with_total(listing.count))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.ctx.rebuild()
    }
}

/// Position in a fixed list of post URLs, skipping shortcodes already collected
///
/// The cursor is the decimal index of the next URL to visit.
#[derive(Debug, Clone)]
struct UrlBatch {
    urls: Vec<String>,
    skip: HashSet<String>,
}

impl UrlBatch {
    fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            skip: HashSet::new(),
        }
    }

    fn parse_cursor(cursor: &str) -> Result<usize, FetchError> {
        if cursor.is_empty() {
            return Ok(0);
        }
        cursor
            .parse()
            .map_err(|_| FetchError::Fatal(format!("Invalid batch cursor: {}", cursor)))
    }

    /// First index at or after `from` whose shortcode is not skipped
    fn next_index(&self, from: usize) -> usize {
        (from..self.urls.len())
            .find(|&i| {
                extract_shortcode(&self.urls[i])
                    .map(|code| !self.skip.contains(&code))
                    .unwrap_or(true)
            })
            .unwrap_or(self.urls.len())
    }

    /// Page metadata for the item at `index`
    fn after(&self, index: usize) -> (Option<String>, bool) {
        let next = self.next_index(index + 1);
        (Some(next.to_string()), next < self.urls.len())
    }

    fn total(&self) -> Option<u64> {
        Some(self.urls.len() as u64)
    }

    fn resume_after(&self, cursor: &str) -> Option<String> {
        let index = Self::parse_cursor(cursor).ok()?;
        Some(self.next_index(self.next_index(index) + 1).to_string())
    }
}

/// Loads a post page and returns the embedded media object
async fn load_media(
    ctx: &SourceContext,
    post_url: &str,
) -> Result<(String, Value), FetchError> {
    let shortcode = extract_shortcode(post_url)
        .map_err(|e| FetchError::transient(format!("Invalid post URL {}: {}", post_url, e)))?;
    let url = Url::parse(post_url)
        .map_err(|e| FetchError::transient(format!("Invalid post URL {}: {}", post_url, e)))?;

    let html = ctx.get_text(url, None).await.map_err(|e| match e {
        // A missing post does not invalidate the rest of the batch
        FetchError::Fatal(reason) => FetchError::transient(format!("{}: {}", post_url, reason)),
        other => other,
    })?;

    let media = find_media_in_page(&html, &shortcode)
        .ok_or_else(|| FetchError::transient(format!("No post data found for {}", post_url)))?;

    Ok((shortcode, media))
}

/// Scrapes post details for a batch of post URLs, one post per page
pub struct PostPageFetcher {
    ctx: Arc<SourceContext>,
    batch: UrlBatch,
}

impl PostPageFetcher {
    pub fn new(ctx: Arc<SourceContext>, urls: Vec<String>) -> Self {
        Self {
            ctx,
            batch: UrlBatch::new(urls),
        }
    }
}

#[async_trait]
impl CursorFetcher for PostPageFetcher {
    type Item = PostRecord;

    async fn fetch(&mut self, _target: &str, cursor: &str) -> Result<Page<PostRecord>, FetchError> {
        let index = self.batch.next_index(UrlBatch::parse_cursor(cursor)?);
        if index >= self.batch.urls.len() {
            return Ok(Page::last(Vec::new()).with_total(self.batch.total()));
        }

        let post_url = self.batch.urls[index].clone();
        let (shortcode, media) = load_media(&self.ctx, &post_url).await?;
        let post = parse_post(&media, &shortcode, &post_url);

        tracing::debug!(
            "Scraped {} ({}, {} likes)",
            shortcode,
            post.post_type.as_deref().unwrap_or("unknown"),
            post.likes.unwrap_or(0)
        );

        let (next, has_more) = self.batch.after(index);
        Ok(Page::new(vec![post], next, has_more).with_total(self.batch.total()))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.ctx.rebuild()
    }

    fn resume_cursor(&self, _target: &str, cursor: &str) -> Option<String> {
        self.batch.resume_after(cursor)
    }

    fn narrow(&mut self, known: &HashSet<String>) {
        self.batch.skip = known.clone();
        if !known.is_empty() {
            tracing::info!("Skipping {} posts already on file", known.len());
        }
    }
}

/// Collects tagged users for a batch of post URLs, one post per page
pub struct TagFetcher {
    ctx: Arc<SourceContext>,
    batch: UrlBatch,
}

impl TagFetcher {
    pub fn new(ctx: Arc<SourceContext>, urls: Vec<String>) -> Self {
        Self {
            ctx,
            batch: UrlBatch::new(urls),
        }
    }
}

#[async_trait]
impl CursorFetcher for TagFetcher {
    type Item = TagRelationRecord;

    async fn fetch(
        &mut self,
        _target: &str,
        cursor: &str,
    ) -> Result<Page<TagRelationRecord>, FetchError> {
        let index = self.batch.next_index(UrlBatch::parse_cursor(cursor)?);
        if index >= self.batch.urls.len() {
            return Ok(Page::last(Vec::new()).with_total(self.batch.total()));
        }

        let post_url = self.batch.urls[index].clone();
        let (shortcode, media) = load_media(&self.ctx, &post_url).await?;
        let tags = parse_tag_relations(&media, &shortcode);

        tracing::debug!("{} has {} tagged users", shortcode, tags.len());

        let (next, has_more) = self.batch.after(index);
        Ok(Page::new(tags, next, has_more).with_total(self.batch.total()))
    }

    async fn recover(&mut self) -> Result<(), FetchError> {
        self.ctx.rebuild()
    }

    fn resume_cursor(&self, _target: &str, cursor: &str) -> Option<String> {
        self.batch.resume_after(cursor)
    }

    /// Known identities are `shortcode:username`; posts with a tag on file are skipped
    fn narrow(&mut self, known: &HashSet<String>) {
        self.batch.skip = known
            .iter()
            .filter_map(|identity| identity.split_once(':').map(|(code, _)| code.to_string()))
            .collect();
    }
}
