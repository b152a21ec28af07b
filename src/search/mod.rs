//! NZB search and fetch
//!
//! A job query is resolved to a local NZB file in the daemon's scan directory:
//! the query is sent to an RSS search endpoint, the result feed is parsed as
//! RSS 2.0 (falling back to Atom), one item is chosen, and its NZB is
//! downloaded to `<nzb_dir>/<query>.nzb`.
//!
//! Ranking is intentionally simple: the largest `top_items` results are kept
//! and the most recently published of those wins.

use crate::config::{RetryConfig, SearchConfig};
use crate::error::{CollaboratorError, Error, Result};
use crate::retry::with_retry;
use crate::utils::sanitize_file_name;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Resolves a query to a downloaded NZB
#[async_trait]
pub trait SearchAndFetch: Send + Sync {
    /// Search for `query` and store the chosen NZB locally
    async fn search_and_fetch(&self, query: &str) -> Result<PathBuf>;
}

/// One search hit
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    /// Item title
    pub title: String,
    /// NZB download URL
    pub nzb_url: Option<String>,
    /// Size in MB
    pub size_mb: Option<u64>,
    /// Publication date
    pub pub_date: Option<DateTime<Utc>>,
}

static SIZE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(GB|MB)\b").ok());

/// Size in MB from text like `"Size: 1.4 GB<br />"`
pub fn size_from_description(description: &str) -> Option<u64> {
    let caps = SIZE_PATTERN.as_ref()?.captures(description)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let mb = if caps.get(2)?.as_str().eq_ignore_ascii_case("GB") {
        value * 1024.0
    } else {
        value
    };
    Some(mb as u64)
}

/// Parse a search feed, trying RSS first and Atom second
pub fn parse_feed(content: &str) -> Result<Vec<SearchResult>> {
    match parse_as_rss(content) {
        Ok(items) => {
            debug!(count = items.len(), "parsed search results as RSS");
            Ok(items)
        }
        Err(rss_err) => {
            debug!(error = %rss_err, "failed to parse as RSS, trying Atom");
            parse_as_atom(content).map_err(|atom_err| {
                CollaboratorError::Search(format!(
                    "feed is neither RSS ({rss_err}) nor Atom ({atom_err})"
                ))
                .into()
            })
        }
    }
}

fn parse_as_rss(content: &str) -> std::result::Result<Vec<SearchResult>, String> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| e.to_string())?;

    Ok(channel
        .items()
        .iter()
        .map(|item| {
            let pub_date = item.pub_date().and_then(|date| {
                DateTime::parse_from_rfc2822(date)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            });
            let nzb_url = item
                .enclosure()
                .map(|enc| enc.url().to_string())
                .or_else(|| item.link().map(|l| l.to_string()));
            let size_mb = item
                .enclosure()
                .and_then(|enc| enc.length().parse::<u64>().ok())
                .filter(|&bytes| bytes > 0)
                .map(|bytes| bytes / (1024 * 1024))
                .or_else(|| item.description().and_then(size_from_description));

            SearchResult {
                title: item.title().unwrap_or("").to_string(),
                nzb_url,
                size_mb,
                pub_date,
            }
        })
        .collect())
}

fn parse_as_atom(content: &str) -> std::result::Result<Vec<SearchResult>, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes()).map_err(|e| e.to_string())?;

    Ok(feed
        .entries()
        .iter()
        .map(|entry| {
            let pub_date = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .with_timezone(&Utc);
            let nzb_url = entry
                .links()
                .iter()
                .find(|link| {
                    link.rel() == "enclosure"
                        || link.href().ends_with(".nzb")
                        || link.mime_type() == Some("application/x-nzb")
                })
                .or_else(|| entry.links().first())
                .map(|link| link.href().to_string());
            let size_mb = entry
                .links()
                .iter()
                .find(|link| link.rel() == "enclosure")
                .and_then(|link| link.length().and_then(|l| l.parse::<u64>().ok()))
                .map(|bytes| bytes / (1024 * 1024))
                .or_else(|| {
                    entry
                        .summary()
                        .and_then(|s| size_from_description(s.as_str()))
                });

            SearchResult {
                title: entry.title().as_str().to_string(),
                nzb_url,
                size_mb,
                pub_date: Some(pub_date),
            }
        })
        .collect())
}

/// Pick the result to download
///
/// Results without an NZB URL are ignored. The rest are ordered by size,
/// largest first, and cut to `top_items`. With a non-zero tolerance, results
/// more than `size_tolerance_mb` smaller than the largest are dropped. The most
/// recently published survivor wins; ties go to the larger one.
pub fn select_best(
    mut results: Vec<SearchResult>,
    top_items: usize,
    size_tolerance_mb: u64,
) -> Option<SearchResult> {
    results.retain(|r| r.nzb_url.is_some());
    results.sort_by(|a, b| b.size_mb.cmp(&a.size_mb));
    results.truncate(top_items.max(1));

    let largest = results.first()?.size_mb.unwrap_or(0);
    if size_tolerance_mb > 0 {
        results.retain(|r| r.size_mb.unwrap_or(0) + size_tolerance_mb >= largest);
    }

    // max_by_key keeps the last maximum; iterate in reverse so the larger wins ties
    results.into_iter().rev().max_by_key(|r| r.pub_date)
}

/// [`SearchAndFetch`] over an RSS search endpoint
pub struct RssSearcher {
    http_client: reqwest::Client,
    config: SearchConfig,
    retry: RetryConfig,
}

impl RssSearcher {
    /// Create a searcher
    pub fn new(config: SearchConfig, retry: RetryConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            config,
            retry,
        })
    }

    /// Search URL for `query`: spaces become `+`, everything else is percent-encoded
    pub fn search_url(&self, query: &str) -> String {
        let encoded = query
            .split(' ')
            .filter(|part| !part.is_empty())
            .map(|part| urlencoding::encode(part).into_owned())
            .collect::<Vec<_>>()
            .join("+");
        format!("{}{}", self.config.url, encoded)
    }

    /// Run a search and return every parsed result
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let url = self.search_url(query);
        debug!(%url, "searching");
        let content = with_retry(&self.retry, || self.get_text(&url)).await?;
        parse_feed(&content)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Search(format!(
                "HTTP {} from {url}",
                status.as_u16()
            ))
            .into());
        }
        Ok(response.text().await?)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollaboratorError::Search(format!(
                "HTTP {} from {url}",
                status.as_u16()
            ))
            .into());
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SearchAndFetch for RssSearcher {
    async fn search_and_fetch(&self, query: &str) -> Result<PathBuf> {
        let results = self.search(query).await?;
        let found = results.len();
        let best = select_best(results, self.config.top_items, self.config.size_tolerance_mb)
            .ok_or_else(|| CollaboratorError::Search(format!("no usable results for '{query}'")))?;
        let url = best
            .nzb_url
            .clone()
            .ok_or_else(|| CollaboratorError::Search(format!("result '{}' has no NZB link", best.title)))?;

        info!(query, found, title = %best.title, size_mb = ?best.size_mb, "selected search result");
        let nzb = with_retry(&self.retry, || self.get_bytes(&url)).await?;

        tokio::fs::create_dir_all(&self.config.nzb_dir).await?;
        let path = self
            .config
            .nzb_dir
            .join(format!("{}.nzb", sanitize_file_name(query)));
        tokio::fs::write(&path, &nzb).await?;
        info!(path = %path.display(), bytes = nzb.len(), "NZB saved");
        Ok(path)
    }
}
