use anyhow::{Context, Result};
use harvest_config::HarvestConfig;
use harvest_ingest::{
    BatchReport, Category, IngestPipeline, PipelineOptions, RateGate, SqliteDocumentStore,
    TwitterSource,
};
use harvest_social::twitter::{TimelineKind, TwitterApi, TwitterCookies};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fully wired ingest run: limiter actor, store, source and pipeline.
pub struct Harvest {
    pipeline: IngestPipeline<TwitterSource, SqliteDocumentStore>,
    limiter: JoinHandle<Result<()>>,
    limiter_stop: CancellationToken,
    subjects: Vec<String>,
    categories: Vec<Category>,
    budget: usize,
}

/// Canonical labels, so stored documents use one spelling per category.
pub fn categories(labels: &[String]) -> Result<Vec<Category>> {
    labels
        .iter()
        .map(|raw| {
            let kind: TimelineKind = raw.parse()?;
            Ok(Category::from(kind.label()))
        })
        .collect()
}

impl Harvest {
    /// Everything here is startup-fatal: unreadable cookies, a bad base URL
    /// or an unreachable database abort before any request is made.
    pub async fn build(cfg: &HarvestConfig, cancel: CancellationToken) -> Result<Self> {
        let cookie_file = &cfg.credentials.cookie_file;
        let cookies = TwitterCookies::load(cookie_file)
            .with_context(|| format!("loading cookies from {}", cookie_file.display()))?;
        tracing::info!(cookies = cookies.len(), path = %cookie_file.display(), "cookies.loaded");

        let store = SqliteDocumentStore::connect(&cfg.store.database_url).await?;

        let limiter_stop = CancellationToken::new();
        let (gate, limiter) = RateGate::spawn(
            cfg.rate_limit.requests_per_window,
            Duration::from_secs(cfg.rate_limit.window_secs),
            limiter_stop.clone(),
        );

        let api = TwitterApi::with_base_url(&cfg.twitter.base_url, cookies)?
            .with_timeout(Duration::from_secs(cfg.twitter.timeout_secs))
            .with_retries(cfg.twitter.retries)
            .with_retry_gate(gate.retry_gate(cancel.clone()));

        let pipeline = IngestPipeline::new(
            TwitterSource::new(api),
            store,
            gate,
            PipelineOptions {
                page_size_cap: cfg.ingest.page_size_cap,
                collection: cfg.store.collection.clone(),
            },
        )
        .with_cancellation(cancel);

        Ok(Self {
            pipeline,
            limiter,
            limiter_stop,
            subjects: cfg.ingest.subjects.clone(),
            categories: categories(&cfg.ingest.categories)?,
            budget: cfg.ingest.max_items_per_category,
        })
    }

    pub async fn run(self) -> Result<BatchReport> {
        let report = self
            .pipeline
            .run_batch(&self.subjects, &self.categories, self.budget)
            .await;

        self.limiter_stop.cancel();
        self.limiter.await.context("rate limiter task panicked")??;
        self.pipeline.store().close().await;
        Ok(report)
    }
}
