use std::collections::HashSet;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{error, info, warn};

use crate::extract::extract_job_title;
use crate::fetcher::{Fetcher, PageSource};
use crate::llm::ChatModel;
use crate::truncate;

/// Stop scanning once this many titles have matched.
pub const MAX_MATCHES: usize = 20;
const MIN_LINK_TEXT: usize = 4;

const EXCLUDED_URL_PARTS: &[&str] = &["mailto", "linkedin"];
const JOB_BOARD_DOMAINS: &[&str] = &["greenhouse.io", "lever.co", "workday.com"];
const KEYWORD_SYNONYMS: &[(&str, &str)] = &[("engineer", "engineering"), ("analyst", "analysis")];

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((http[^)]+)\)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub display_text: String,
    pub url: String,
}

/// Links found on a board page before any title checks.
#[derive(Debug, Clone)]
pub struct BoardInspection {
    pub total_links: usize,
    pub candidates: Vec<CandidateLink>,
}

/// All `[text](http…)` links worth looking at, deduplicated by URL in page order.
pub fn parse_links(markdown: &str) -> Vec<CandidateLink> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for caps in LINK_RE.captures_iter(markdown) {
        let text = &caps[1];
        let url = &caps[2];
        if text.chars().count() < MIN_LINK_TEXT
            || EXCLUDED_URL_PARTS.iter().any(|p| url.contains(p))
        {
            continue;
        }
        if !seen.insert(url.to_string()) {
            continue;
        }
        links.push(CandidateLink {
            display_text: text.to_string(),
            url: url.to_string(),
        });
    }

    links
}

/// Known job-board domain, or link text offering to apply.
pub fn is_job_link(link: &CandidateLink) -> bool {
    let url = link.url.to_lowercase();
    JOB_BOARD_DOMAINS.iter().any(|d| url.contains(d))
        || link.display_text.to_lowercase().contains("apply")
}

pub fn candidate_links(markdown: &str) -> Vec<CandidateLink> {
    parse_links(markdown).into_iter().filter(is_job_link).collect()
}

/// Case-insensitive substring match, plus the fixed synonym pairs in either direction.
pub fn title_matches(title: &str, keyword: &str) -> bool {
    let title = title.to_lowercase();
    let keyword = keyword.trim().to_lowercase();

    if title.contains(&keyword) {
        return true;
    }

    KEYWORD_SYNONYMS.iter().any(|&(a, b)| {
        (keyword == a && title.contains(b)) || (keyword == b && title.contains(a))
    })
}

/// The Scout: finds postings on a careers page whose titles match a role keyword.
pub struct Scout<'a, S, M> {
    fetcher: &'a Fetcher<S>,
    model: Option<&'a M>,
}

impl<'a, S: PageSource, M: ChatModel> Scout<'a, S, M> {
    pub fn new(fetcher: &'a Fetcher<S>, model: Option<&'a M>) -> Self {
        Self { fetcher, model }
    }

    /// Matching job URLs in page order, at most [`MAX_MATCHES`].
    ///
    /// Empty when nothing matched or anything went wrong; callers cannot tell
    /// the two apart.
    pub async fn discover_job_links(&self, board_url: &str, role_keyword: &str) -> Vec<String> {
        match self.try_discover(board_url, role_keyword).await {
            Ok(urls) => urls,
            Err(e) => {
                error!("Discovery error: {:#}", e);
                Vec::new()
            }
        }
    }

    async fn try_discover(&self, board_url: &str, role_keyword: &str) -> Result<Vec<String>> {
        check_board_url(board_url)?;
        if role_keyword.trim().is_empty() {
            bail!("role keyword is empty");
        }

        let Some(model) = self.model else {
            error!("Discovery needs title extraction but OPENAI_API_KEY is not configured");
            return Ok(Vec::new());
        };

        let Some(markdown) = self.fetcher.fetch(board_url).await else {
            warn!("Could not fetch board page {}", board_url);
            return Ok(Vec::new());
        };

        let candidates = candidate_links(&markdown);
        info!("Filtering for keyword: '{}'", role_keyword);
        info!("Found {} candidate job links", candidates.len());

        let mut matched = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let url = &candidate.url;
            info!("Checking job {}/{}: {}", i + 1, candidates.len(), truncate(url, 60));

            match self.check_title(model, url).await {
                Some(title) if title_matches(&title, role_keyword) => {
                    matched.push(url.clone());
                    info!("✓ Matched: '{}' ({}/{})", title, matched.len(), MAX_MATCHES);
                    if matched.len() >= MAX_MATCHES {
                        info!("Found {} matches, stopping early", MAX_MATCHES);
                        break;
                    }
                }
                Some(title) => info!("✗ Skipped: '{}' (doesn't match '{}')", title, role_keyword),
                None => warn!("✗ Failed to extract title from {}", truncate(url, 60)),
            }
        }

        info!("Found {} matching jobs for '{}'", matched.len(), role_keyword);
        Ok(matched)
    }

    async fn check_title(&self, model: &M, url: &str) -> Option<String> {
        let content = self.fetcher.fetch(url).await?;
        extract_job_title(model, &content).await
    }

    /// Fetch a board and report its links without checking any titles.
    pub async fn inspect_board(&self, board_url: &str) -> Result<BoardInspection> {
        check_board_url(board_url)?;
        let markdown = self
            .fetcher
            .fetch(board_url)
            .await
            .context("Could not fetch board page")?;

        let total_links = LINK_RE.captures_iter(&markdown).count();
        let candidates = candidate_links(&markdown);
        Ok(BoardInspection {
            total_links,
            candidates,
        })
    }
}

fn check_board_url(board_url: &str) -> Result<()> {
    let url = reqwest::Url::parse(board_url)
        .with_context(|| format!("invalid board url: {}", board_url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("board url must be http or https: {}", board_url);
    }
    Ok(())
}
