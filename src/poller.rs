use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use tracing::{info, warn};

use crate::error::{NewsError, Result};
use crate::models::{Source, SourceKind};

/// Total request timeout; a slow source fails alone.
const POLL_TIMEOUT_SECS: u64 = 30;

const USER_AGENT: &str = "Hyperlocal/1.0 (Feed Ingestion)";

/// One normalized entry of a polled feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub published: Option<DateTime<Utc>>,
    pub link: String,
    pub guid: Option<String>,
    /// Full body (`content:encoded`, Atom `content`).
    pub content: Option<String>,
    /// Short body (`description`, Atom `summary`).
    pub summary: Option<String>,
    /// URL from an attached media descriptor.
    pub media_url: Option<String>,
}

impl FeedItem {
    /// Markup to extract the teaser from: full content, else summary.
    pub fn markup(&self) -> Option<&str> {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.summary.as_deref())
    }
}

pub struct SourcePoller {
    client: Client,
}

impl SourcePoller {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| NewsError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch and parse one RSS source.
    pub async fn poll(&self, source: &Source) -> Result<Vec<FeedItem>> {
        if source.kind() != SourceKind::Rss {
            return Err(NewsError::UnsupportedSource(source.source_type.clone()));
        }

        info!("Polling source: {} ({})", source.name, source.url);

        let unreachable = |reason: String| NewsError::SourceUnreachable {
            url: source.url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unreachable(format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        Self::parse_items(&bytes, &source.url)
    }

    /// Parse a feed document into items, in document order.
    pub fn parse_items(bytes: &[u8], url: &str) -> Result<Vec<FeedItem>> {
        let parsed = parser::parse(bytes).map_err(|e| NewsError::FeedParse {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut items = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            match Self::item_from_entry(entry) {
                Some(item) => items.push(item),
                None => warn!("Skipping entry with no link in {}", url),
            }
        }
        Ok(items)
    }

    fn item_from_entry(entry: Entry) -> Option<FeedItem> {
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|l| !l.is_empty())?;

        let media_url = Self::media_url(&entry);

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

        Some(FeedItem {
            title,
            published: entry.published.or(entry.updated),
            link,
            guid,
            content: entry.content.and_then(|c| c.body),
            summary: entry.summary.map(|s| s.content),
            media_url,
        })
    }

    fn media_url(entry: &Entry) -> Option<String> {
        entry.media.iter().find_map(|media| {
            media
                .content
                .iter()
                .find_map(|content| content.url.as_ref().map(|u| u.to_string()))
                .or_else(|| media.thumbnails.first().map(|t| t.image.uri.clone()))
        })
    }
}
