use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::extractor;
use crate::models::{NewArticle, Source, SourceKind};
use crate::poller::{FeedItem, SourcePoller};

/// What happened to a single polled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Inserted, or merged into the row holding its link. `degraded` is set
    /// when the item had no content and the teaser was left empty.
    Stored { degraded: bool },
    /// The source already has an article with this guid.
    Skipped,
    /// Rejected by the source's keyword filter.
    Filtered,
    /// Storage rejected the item; the rest of its source is unaffected.
    Failed,
}

/// Tally of one ingestion cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pollable sources visited, failed ones included.
    pub sources_polled: usize,
    /// Sources that could not be fetched or parsed.
    pub sources_failed: usize,
    /// Items inserted or merged by link.
    pub stored: usize,
    /// Stored items that had no content to build a teaser from.
    pub degraded: usize,
    /// Items whose guid was already known for their source.
    pub skipped: usize,
    /// Items rejected by a keyword filter.
    pub filtered: usize,
    /// Items that storage rejected.
    pub failed: usize,
}

impl CycleReport {
    fn record_source(&mut self, outcome: &Result<Vec<ItemOutcome>>) {
        self.sources_polled += 1;
        match outcome {
            Ok(items) => {
                for item in items {
                    match item {
                        ItemOutcome::Stored { degraded } => {
                            self.stored += 1;
                            if *degraded {
                                self.degraded += 1;
                            }
                        }
                        ItemOutcome::Skipped => self.skipped += 1,
                        ItemOutcome::Filtered => self.filtered += 1,
                        ItemOutcome::Failed => self.failed += 1,
                    }
                }
            }
            Err(_) => self.sources_failed += 1,
        }
    }
}

/// Drives ingestion cycles over every pollable source.
pub struct Ingestor {
    db: Arc<Database>,
    poller: SourcePoller,
    max_concurrent: usize,
    refreshing: Arc<RwLock<bool>>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>, poller: SourcePoller, max_concurrent: usize) -> Self {
        Self {
            db,
            poller,
            max_concurrent: max_concurrent.max(1),
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Run one full cycle. Returns an empty report when a cycle is already
    /// running in this process.
    pub async fn run_ingestion_cycle(&self) -> Result<CycleReport> {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Ingestion already in progress, skipping");
                return Ok(CycleReport::default());
            }
            *refreshing = true;
        }

        let result = self.ingest_all().await;

        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        result
    }

    async fn ingest_all(&self) -> Result<CycleReport> {
        let sources: Vec<Source> = self
            .db
            .get_all_sources()
            .await?
            .into_iter()
            .filter(|s| s.kind() != SourceKind::Local)
            .collect();
        info!(
            "Ingesting {} sources ({} at a time)",
            sources.len(),
            self.max_concurrent
        );

        let outcomes: Vec<Result<Vec<ItemOutcome>>> = stream::iter(sources)
            .map(|source| async move { self.ingest_source(&source).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = CycleReport::default();
        for outcome in &outcomes {
            report.record_source(outcome);
        }

        info!(
            "Ingestion complete: {} stored ({} degraded), {} skipped, {} filtered, \
             {} failed items; {}/{} sources failed",
            report.stored,
            report.degraded,
            report.skipped,
            report.filtered,
            report.failed,
            report.sources_failed,
            report.sources_polled
        );
        Ok(report)
    }

    /// Poll one source and ingest its items, recording the fetch status.
    async fn ingest_source(&self, source: &Source) -> Result<Vec<ItemOutcome>> {
        let items = match self.poller.poll(source).await {
            Ok(items) => items,
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        "Failed to poll source '{}', retrying next cycle: {}",
                        source.name, e
                    );
                } else {
                    error!("Cannot poll source '{}': {}", source.name, e);
                }
                if let Err(db_err) = self
                    .db
                    .update_source_fetched(source.id, Some(&e.to_string()))
                    .await
                {
                    warn!("Could not record failure for '{}': {}", source.name, db_err);
                }
                return Err(e);
            }
        };

        let mut outcomes = Vec::with_capacity(items.len());
        for item in &items {
            let outcome = match self.ingest_item(source, item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to ingest '{}' from '{}': {}", item.link, source.name, e);
                    ItemOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }

        if let Err(e) = self.db.update_source_fetched(source.id, None).await {
            warn!("Could not record fetch for '{}': {}", source.name, e);
        }

        let stored = outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Stored { .. }))
            .count();
        info!("Stored {} of {} items for '{}'", stored, items.len(), source.name);
        Ok(outcomes)
    }

    async fn ingest_item(&self, source: &Source, item: &FeedItem) -> Result<ItemOutcome> {
        if let Some(guid) = &item.guid {
            if self.db.article_exists(source.id, guid).await? {
                return Ok(ItemOutcome::Skipped);
            }
        }

        let (candidate, degraded) = build_candidate(source, item);
        if !source.admits(&candidate.title, &candidate.teaser) {
            debug!("Filtered '{}' for '{}'", candidate.title, source.name);
            return Ok(ItemOutcome::Filtered);
        }

        self.db.upsert_article(&candidate).await?;
        if degraded {
            debug!("No content for '{}'; stored with an empty teaser", item.link);
        }
        Ok(ItemOutcome::Stored { degraded })
    }
}

/// Turn a polled item into an article candidate for `source`. The flag is
/// set when the item carried no markup to extract a teaser from.
pub fn build_candidate(source: &Source, item: &FeedItem) -> (NewArticle, bool) {
    let extracted = extractor::extract(item.markup(), item.media_url.as_deref());

    let candidate = NewArticle {
        source_id: source.id,
        date: item.published,
        title: item.title.clone(),
        teaser: extracted.text,
        image_url: extracted.image_url,
        link: item.link.clone(),
        guid: item.guid.clone(),
        published: true,
    };
    (candidate, extracted.degraded)
}

pub async fn start_background_refresh(ingestor: Arc<Ingestor>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial ingestion cycle");
    if let Err(e) = ingestor.run_ingestion_cycle().await {
        error!("Initial ingestion cycle failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled ingestion cycle");
        if let Err(e) = ingestor.run_ingestion_cycle().await {
            error!("Scheduled ingestion cycle failed: {}", e);
        }
    }
}
