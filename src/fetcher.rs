use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{info, warn};

use crate::config::{ProxyConfig, REQUEST_TIMEOUT};
use crate::pacer::Pacer;
use crate::truncate_chars;

/// Hard cap on returned page text; bounds the downstream prompt size.
pub const MAX_CONTENT_CHARS: usize = 20_000;
pub const DEFAULT_RETRIES: u32 = 3;
const RATE_LIMIT_BACKOFF_SECS: u64 = 2;
const TRANSPORT_BACKOFF_SECS: u64 = 1;
const PREVIEW_CHARS: usize = 1000;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// What a single proxy request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(String),
    /// HTTP 429 from the proxy.
    RateLimited,
    /// Any other non-200 status. Never retried.
    Status(u16),
    /// Network failure before a status was seen.
    Transport(String),
}

impl FetchOutcome {
    fn label(&self) -> String {
        match self {
            FetchOutcome::Success(body) if body.trim().is_empty() => "200 OK (empty page)".to_string(),
            FetchOutcome::Success(body) => format!("200 OK ({} chars)", body.chars().count()),
            FetchOutcome::RateLimited => "429 rate limit".to_string(),
            FetchOutcome::Status(code) => format!("HTTP {}", code),
            FetchOutcome::Transport(e) => format!("transport error: {}", e),
        }
    }
}

/// Next move of the retry loop after one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Done(Option<String>),
    Retry(Duration),
}

/// Retry policy. `attempt` is zero-based; `retry_count` is the total attempt budget.
/// A blank page carries no data and ends the loop like a failure.
pub fn next_step(outcome: FetchOutcome, attempt: u32, retry_count: u32) -> Step {
    let last = attempt + 1 >= retry_count;
    match outcome {
        FetchOutcome::Success(body) if body.trim().is_empty() => Step::Done(None),
        FetchOutcome::Success(body) => Step::Done(Some(truncate_chars(&body, MAX_CONTENT_CHARS).to_string())),
        FetchOutcome::Status(_) => Step::Done(None),
        FetchOutcome::RateLimited if !last => {
            Step::Retry(Duration::from_secs(2u64.pow(attempt) * RATE_LIMIT_BACKOFF_SECS))
        }
        FetchOutcome::Transport(_) if !last => {
            Step::Retry(Duration::from_secs(2u64.pow(attempt) * TRANSPORT_BACKOFF_SECS))
        }
        FetchOutcome::RateLimited | FetchOutcome::Transport(_) => Step::Done(None),
    }
}

/// A content-extraction proxy that turns a URL into cleaned Markdown.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    async fn get(&self, url: &str) -> FetchOutcome;

    /// Human-readable description of where a request for `url` goes.
    fn route(&self, url: &str) -> String {
        url.to_string()
    }
}

/// Prefix proxy: `GET {base_url}{target}`, optionally with a bearer credential.
pub struct ReaderSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ReaderSource {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

impl PageSource for ReaderSource {
    async fn get(&self, url: &str) -> FetchOutcome {
        let mut request = self.client.get(self.route(url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Transport(e.to_string()),
        };

        match response.status().as_u16() {
            200 => match response.text().await {
                Ok(body) => FetchOutcome::Success(body),
                Err(e) => FetchOutcome::Transport(e.to_string()),
            },
            429 => FetchOutcome::RateLimited,
            code => FetchOutcome::Status(code),
        }
    }

    fn route(&self, url: &str) -> String {
        format!("{}{}", self.base_url, url)
    }
}

/// spider.cloud scrape API with Markdown output.
pub struct SpiderSource {
    spider: Spider,
}

impl SpiderSource {
    pub fn new(api_key: String) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider })
    }
}

impl PageSource for SpiderSource {
    async fn get(&self, url: &str) -> FetchOutcome {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Markdown)),
            ..Default::default()
        };

        let value = match self.spider.scrape_url(url, Some(params), "application/json").await {
            Ok(v) => v,
            Err(e) => {
                let msg = e.to_string();
                if is_rate_limit_error(&msg) {
                    return FetchOutcome::RateLimited;
                }
                return FetchOutcome::Transport(msg);
            }
        };

        let parsed: serde_json::Value = match value.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
            None => value,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        let content = first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(strip_images);
        let status = first
            .and_then(|obj| obj.get("status"))
            .and_then(|s| s.as_u64())
            .map(|s| s as u16);

        match (content, status) {
            (_, Some(429)) => FetchOutcome::RateLimited,
            (Some(text), None | Some(200)) => FetchOutcome::Success(text),
            (_, Some(code)) => FetchOutcome::Status(code),
            (None, None) => FetchOutcome::Status(204),
        }
    }

    fn route(&self, url: &str) -> String {
        format!("spider.cloud scrape ({})", url)
    }
}

fn is_rate_limit_error(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests")
}

/// Remove markdown image syntax: ![alt](url) and collapse the blank runs it leaves.
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}

/// Either proxy backend, chosen at startup.
pub enum ProxyBackend {
    Reader(ReaderSource),
    Spider(SpiderSource),
}

impl PageSource for ProxyBackend {
    async fn get(&self, url: &str) -> FetchOutcome {
        match self {
            ProxyBackend::Reader(s) => s.get(url).await,
            ProxyBackend::Spider(s) => s.get(url).await,
        }
    }

    fn route(&self, url: &str) -> String {
        match self {
            ProxyBackend::Reader(s) => s.route(url),
            ProxyBackend::Spider(s) => s.route(url),
        }
    }
}

/// Step log of a single un-retried fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchDiagnostics {
    pub steps: Vec<String>,
    pub preview: String,
    pub success: bool,
}

/// The Miner: paced, retried page fetches through a [`PageSource`].
pub struct Fetcher<S> {
    source: S,
    pacer: Pacer,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, pacer: Pacer) -> Self {
        Self { source, pacer }
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn fetch(&self, url: &str) -> Option<String> {
        self.fetch_page_content(url, DEFAULT_RETRIES).await
    }

    /// Fetch cleaned page text, at most [`MAX_CONTENT_CHARS`] characters.
    ///
    /// Returns `None` when the proxy answers with a non-retryable status or the
    /// retry budget runs out; an unreachable page and an empty one look the same.
    pub async fn fetch_page_content(&self, url: &str, retry_count: u32) -> Option<String> {
        let retry_count = retry_count.max(1);

        let mut last_request: Option<tokio::time::Instant> = None;

        for attempt in 0..retry_count {
            self.pacer.wait().await;
            let now = tokio::time::Instant::now();
            if let Some(prev) = last_request {
                info!(
                    "Retrying {} after {:.1}s (attempt {}/{})",
                    url,
                    (now - prev).as_secs_f64(),
                    attempt + 1,
                    retry_count
                );
            }
            last_request = Some(now);

            let outcome = self.source.get(url).await;
            let label = outcome.label();

            match next_step(outcome, attempt, retry_count) {
                Step::Done(Some(text)) => {
                    info!("Fetched {} ({}, attempt {}/{})", url, label, attempt + 1, retry_count);
                    return Some(text);
                }
                Step::Done(None) => {
                    warn!(
                        "Fetch failed for {}: {} (attempt {}/{})",
                        url,
                        label,
                        attempt + 1,
                        retry_count
                    );
                    return None;
                }
                Step::Retry(wait) => {
                    warn!(
                        "Fetch {} got {} - backing off {}s before retry {}/{}",
                        url,
                        label,
                        wait.as_secs(),
                        attempt + 1,
                        retry_count
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        None
    }

    /// One fetch with every step written down, for troubleshooting a board URL.
    pub async fn debug_fetch(&self, url: &str) -> FetchDiagnostics {
        let mut log = FetchDiagnostics::default();
        log.steps.push(format!("1. Routing via {}...", self.source.route(url)));

        self.pacer.wait().await;
        let start = Instant::now();
        let outcome = self.source.get(url).await;
        let secs = start.elapsed().as_secs_f64();

        match outcome {
            FetchOutcome::Success(text) if text.trim().is_empty() => {
                log.steps.push(format!("2. Response: 200 ({:.2}s)", secs));
                log.steps.push("3. Failed. Proxy returned an empty page".to_string());
            }
            FetchOutcome::Success(text) => {
                log.steps.push(format!("2. Response: 200 ({:.2}s)", secs));
                log.steps.push(format!("3. Received {} chars of Markdown", text.chars().count()));
                log.preview = format!("{}...", truncate_chars(&text, PREVIEW_CHARS));
                log.success = true;
            }
            FetchOutcome::RateLimited => {
                log.steps.push(format!("2. Response: 429 ({:.2}s)", secs));
                log.steps.push("3. Failed. Proxy rate limit reached".to_string());
            }
            FetchOutcome::Status(code) => {
                log.steps.push(format!("2. Response: {} ({:.2}s)", code, secs));
                log.steps.push(format!("3. Failed. Proxy status: {}", code));
            }
            FetchOutcome::Transport(e) => {
                log.steps.push(format!("ERROR: {}", e));
            }
        }

        log
    }
}
