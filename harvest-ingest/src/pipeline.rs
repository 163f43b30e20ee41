//! Per-subject, per-category page loop.
//!
//! Every remote call and every store write goes through the shared
//! [`RateGate`] first. Categories of a subject run one after another; the first
//! failure aborts the rest of that subject and is reported, not propagated,
//! by [`IngestPipeline::run_batch`]. A failed subject still reports what it
//! stored before the failure.
use crate::{
    error::IngestError,
    rate::RateGate,
    source::{Source, SubjectHandle},
    store::DocumentStore,
    Category, Cursor, IngestedItem, Page,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    /// Upper bound on the page size requested from the source.
    pub page_size_cap: usize,
    /// Store collection every item is written to.
    pub collection: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            page_size_cap: 20,
            collection: "tweets".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    BudgetReached,
    EmptyPage,
    EndOfData,
    /// The category was interrupted by an error or cancellation.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    /// Items stored for this category.
    pub items: usize,
    /// Non-empty pages received.
    pub pages: usize,
    pub stop: StopReason,
}

impl CategorySummary {
    fn started(category: &Category) -> Self {
        Self {
            category: category.clone(),
            items: 0,
            pages: 0,
            stop: StopReason::Failed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub subject: String,
    pub subject_id: String,
    pub categories: Vec<CategorySummary>,
}

impl SubjectSummary {
    pub fn items(&self) -> usize {
        self.categories.iter().map(|c| c.items).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubjectStatus {
    Completed {
        summary: SubjectSummary,
    },
    Failed {
        reason: String,
        /// Categories attempted before the failure, the failing one last.
        /// `None` when the subject could not be resolved.
        #[serde(skip_serializing_if = "Option::is_none")]
        partial: Option<SubjectSummary>,
    },
    /// Not attempted because the run was cancelled first.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubjectOutcome {
    pub subject: String,
    #[serde(flatten)]
    pub status: SubjectStatus,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SubjectStatus::Completed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SubjectStatus::Failed { .. }))
            .count()
    }

    /// Items stored across the batch, including those of failed subjects.
    pub fn items_total(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match &o.status {
                SubjectStatus::Completed { summary } => summary.items(),
                SubjectStatus::Failed {
                    partial: Some(summary),
                    ..
                } => summary.items(),
                _ => 0,
            })
            .sum()
    }
}

pub struct IngestPipeline<S, D> {
    source: S,
    store: D,
    gate: RateGate,
    opts: PipelineOptions,
    cancel: CancellationToken,
}

impl<S: Source, D: DocumentStore> IngestPipeline<S, D> {
    pub fn new(source: S, store: D, gate: RateGate, opts: PipelineOptions) -> Self {
        Self {
            source,
            store,
            gate,
            opts,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next suspension point once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    /// Ingest up to `budget` items per category for one subject.
    pub async fn run(
        &self,
        subject: &str,
        categories: &[Category],
        budget: usize,
    ) -> Result<SubjectSummary, IngestError> {
        let mut progress = None;
        self.run_tracked(subject, categories, budget, &mut progress).await
    }

    /// [`Self::run`], leaving whatever was stored so far in `progress` when an
    /// error cuts the subject short.
    async fn run_tracked(
        &self,
        subject: &str,
        categories: &[Category],
        budget: usize,
        progress: &mut Option<SubjectSummary>,
    ) -> Result<SubjectSummary, IngestError> {
        self.gate.acquire(&self.cancel).await?;
        let handle = self
            .or_cancel(self.source.resolve_subject(subject))
            .await?
            .map_err(|source| IngestError::Resolve {
                subject: subject.to_string(),
                source,
            })?;
        debug!(subject, subject_id = %handle.id, "ingest.subject.resolved");

        let summary = progress.insert(SubjectSummary {
            subject: handle.name.clone(),
            subject_id: handle.id.clone(),
            categories: Vec::with_capacity(categories.len()),
        });
        for category in categories {
            let mut current = CategorySummary::started(category);
            let result = self.run_category(&handle, category, budget, &mut current).await;
            summary.categories.push(current);
            result?;
        }
        Ok(summary.clone())
    }

    /// Page through one category, counting into `summary` as items are
    /// stored. `summary.stop` is only set once the loop ends without error.
    async fn run_category(
        &self,
        subject: &SubjectHandle,
        category: &Category,
        budget: usize,
        summary: &mut CategorySummary,
    ) -> Result<(), IngestError> {
        let mut cursor: Option<Cursor> = None;

        let stop = loop {
            if summary.items >= budget {
                break StopReason::BudgetReached;
            }
            let remaining = budget - summary.items;
            let page_size = self.opts.page_size_cap.min(remaining);

            self.gate.acquire(&self.cancel).await?;
            let page = self
                .or_cancel(
                    self.source
                        .fetch_page(subject, category, page_size, cursor.as_ref()),
                )
                .await?
                .map_err(|source| IngestError::Fetch {
                    subject: subject.name.clone(),
                    category: category.clone(),
                    source,
                })?;

            let Page {
                mut items,
                next_cursor,
            } = page;
            if items.is_empty() {
                break StopReason::EmptyPage;
            }
            summary.pages += 1;
            if items.len() > remaining {
                debug!(
                    subject = %subject.name,
                    %category,
                    received = items.len(),
                    kept = remaining,
                    "ingest.page.truncated"
                );
                items.truncate(remaining);
            }

            let scraped_at = Utc::now();
            let stored = items.len();
            for item in items {
                let record = IngestedItem::new(item, category, scraped_at);
                let doc = record.to_document().map_err(|source| IngestError::Encode {
                    subject: subject.name.clone(),
                    category: category.clone(),
                    id: record.id.clone(),
                    source,
                })?;

                self.gate.acquire(&self.cancel).await?;
                self.or_cancel(self.store.upsert(&self.opts.collection, &record.id, &doc))
                    .await?
                    .map_err(|source| IngestError::Store {
                        subject: subject.name.clone(),
                        category: category.clone(),
                        id: record.id.clone(),
                        source,
                    })?;
                summary.items += 1;
            }
            info!(
                subject = %subject.name,
                %category,
                items = stored,
                total = summary.items,
                "ingest.page.stored"
            );

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => break StopReason::EndOfData,
            }
        };

        summary.stop = stop;
        info!(
            subject = %subject.name,
            %category,
            items = summary.items,
            pages = summary.pages,
            stop = ?stop,
            "ingest.category.done"
        );
        Ok(())
    }

    /// Run every subject in order. A failing subject is recorded and the batch
    /// moves on; once cancelled, the remaining subjects are marked skipped.
    pub async fn run_batch(
        &self,
        subjects: &[String],
        categories: &[Category],
        budget: usize,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, subjects = subjects.len(), budget, "ingest.batch.start");

        let mut outcomes = Vec::with_capacity(subjects.len());
        for subject in subjects {
            if self.cancel.is_cancelled() {
                outcomes.push(SubjectOutcome {
                    subject: subject.clone(),
                    status: SubjectStatus::Skipped,
                });
                continue;
            }

            let span = info_span!("subject", %run_id, subject = %subject);
            let mut progress = None;
            let result = self
                .run_tracked(subject, categories, budget, &mut progress)
                .instrument(span)
                .await;
            let status = match result {
                Ok(summary) => SubjectStatus::Completed { summary },
                Err(err) => {
                    let stored = progress.as_ref().map_or(0, SubjectSummary::items);
                    if matches!(err, IngestError::Cancelled) {
                        warn!(subject = %subject, stored, "ingest.subject.cancelled");
                    } else {
                        error!(
                            subject = %subject,
                            stored,
                            error = %err,
                            "ingest.subject.failed"
                        );
                    }
                    SubjectStatus::Failed {
                        reason: err.to_string(),
                        partial: progress,
                    }
                }
            };
            outcomes.push(SubjectOutcome {
                subject: subject.clone(),
                status,
            });
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            outcomes,
        };
        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            items = report.items_total(),
            cancelled = report.cancelled,
            "ingest.batch.done"
        );
        report
    }

    async fn or_cancel<T>(&self, fut: impl Future<Output = T>) -> Result<T, IngestError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestError::Cancelled),
            out = fut => Ok(out),
        }
    }
}
