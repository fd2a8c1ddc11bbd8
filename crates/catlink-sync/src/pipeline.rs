//! Chunked, checkpointed ingestion of one source into the link graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catlink_adapters::{ColumnMapping, Normalizer, SourceCollaborator, SourceError, SourceRow};
use catlink_core::{
    IngestionPolicy, JobCheckpoint, JobCounts, JobSpec, JobStatus, PendingSuggestion, ReconcileError,
    Resolution, SuggestionStatus,
};
use catlink_storage::ReconcileStore;
use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};

use crate::graph::{ApplyContext, LinkGraphManager};
use crate::matcher::{CatalogSnapshot, MatcherCascade};

pub const MAX_ERROR_SAMPLES: usize = 10;
/// Lexical alternatives stored with each suggestion.
pub const SUGGESTION_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub max_scan: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            max_scan: 10_000,
        }
    }
}

/// Cooperative pause request, observed at chunk boundaries only.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Continued,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Matched,
    Created,
    Suggested,
    Skipped,
}

/// A job opened at its last durable checkpoint.
pub struct JobRun {
    spec: JobSpec,
    source: Arc<dyn SourceCollaborator>,
    normalizer: Normalizer,
    checkpoint: JobCheckpoint,
}

impl JobRun {
    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn checkpoint(&self) -> &JobCheckpoint {
        &self.checkpoint
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn ReconcileStore>,
    matcher: Arc<MatcherCascade>,
    graph: Arc<LinkGraphManager>,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ReconcileStore>,
        matcher: Arc<MatcherCascade>,
        graph: Arc<LinkGraphManager>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            matcher,
            graph,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReconcileStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<LinkGraphManager> {
        &self.graph
    }

    pub fn validate(spec: &JobSpec, source: &dyn SourceCollaborator) -> Result<(), ReconcileError> {
        if spec.chunk_size == 0 {
            return Err(ReconcileError::FatalConfig("chunk size must be positive".to_string()));
        }
        if spec.lexical_threshold > 100 {
            return Err(ReconcileError::FatalConfig(format!(
                "lexical threshold {} exceeds 100",
                spec.lexical_threshold
            )));
        }
        if spec.source_domain == spec.target_domain {
            return Err(ReconcileError::FatalConfig(format!(
                "source and target domain are both {}",
                spec.source_domain
            )));
        }
        if source.source_id() != spec.source_id {
            return Err(ReconcileError::FatalConfig(format!(
                "job expects source {} but got {}",
                spec.source_id,
                source.source_id()
            )));
        }
        Ok(())
    }

    /// Persist the job if new and position it at its latest checkpoint.
    pub async fn open(
        &self,
        spec: JobSpec,
        source: Arc<dyn SourceCollaborator>,
        mapping: ColumnMapping,
    ) -> Result<JobRun, ReconcileError> {
        Self::validate(&spec, source.as_ref())?;
        if self.store.get_job(spec.job_id).await?.is_none() {
            self.store.save_job(&spec).await?;
        }
        let checkpoint = match self.store.latest_checkpoint(spec.job_id).await? {
            Some(checkpoint) => checkpoint,
            None => {
                let initial = JobCheckpoint::initial(&spec, Utc::now());
                self.store.append_checkpoint(&initial).await?;
                initial
            }
        };
        let normalizer = Normalizer::new(spec.tenant_id, source.kind(), spec.source_id.clone()).with_mapping(mapping);
        Ok(JobRun {
            spec,
            source,
            normalizer,
            checkpoint,
        })
    }

    /// Process chunks until the source is exhausted, a pause is requested or a chunk fails.
    pub async fn run_to_completion(
        &self,
        run: &mut JobRun,
        pause: &PauseFlag,
        observer: &(dyn Fn(&JobCheckpoint) + Send + Sync),
    ) -> Result<JobStatus, ReconcileError> {
        let span = info_span!("ingest_job", job_id = %run.spec.job_id, tenant_id = %run.spec.tenant_id);
        async {
            if run.checkpoint.status == JobStatus::Completed {
                return Ok(JobStatus::Completed);
            }
            self.transition(run, JobStatus::Running).await?;
            observer(&run.checkpoint);

            loop {
                if pause.is_requested() {
                    self.transition(run, JobStatus::Paused).await?;
                    observer(&run.checkpoint);
                    info!(offset = run.checkpoint.source_offset, "job paused");
                    return Ok(JobStatus::Paused);
                }
                let outcome = self.run_chunk(run).await;
                observer(&run.checkpoint);
                if outcome? == ChunkOutcome::Completed {
                    info!(seen = run.checkpoint.counts.seen, "job completed");
                    return Ok(JobStatus::Completed);
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn transition(&self, run: &mut JobRun, status: JobStatus) -> Result<(), ReconcileError> {
        run.checkpoint.status = status;
        run.checkpoint.recorded_at = Utc::now();
        self.store.append_checkpoint(&run.checkpoint).await?;
        Ok(())
    }

    async fn fail(&self, run: &mut JobRun, err: ReconcileError) -> Result<ChunkOutcome, ReconcileError> {
        warn!(error = %err, offset = run.checkpoint.source_offset, "chunk failed");
        run.checkpoint.last_error = Some(err.to_string());
        if let Err(store_err) = self.transition(run, JobStatus::Failed).await {
            warn!(error = %store_err, "could not record failed checkpoint");
        }
        Err(err)
    }

    /// Fetch, reconcile and checkpoint exactly one chunk.
    pub async fn run_chunk(&self, run: &mut JobRun) -> Result<ChunkOutcome, ReconcileError> {
        let offset = run.checkpoint.source_offset;
        let span = info_span!(
            "chunk",
            job_id = %run.spec.job_id,
            tenant_id = %run.spec.tenant_id,
            offset
        );
        async {
            let fetch = run.source.fetch_page(offset, run.spec.chunk_size);
            let page = match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
                Ok(Ok(page)) => page,
                Ok(Err(err)) => return self.fail(run, err.into()).await,
                Err(_) => return self.fail(run, SourceError::Timeout(self.settings.fetch_timeout).into()).await,
            };

            if page.rows.is_empty() {
                run.checkpoint.total = page.total_count.or(run.checkpoint.total);
                run.checkpoint.last_error = None;
                self.transition(run, JobStatus::Completed).await?;
                return Ok(ChunkOutcome::Completed);
            }

            let snapshot = match CatalogSnapshot::load(
                self.store.clone(),
                run.spec.tenant_id,
                run.spec.target_domain,
                self.settings.max_scan,
            )
            .await
            {
                Ok(snapshot) => snapshot,
                Err(err) => return self.fail(run, err.into()).await,
            };
            run.checkpoint.catalog_truncated |= snapshot.is_truncated();

            let mut counts = JobCounts::default();
            for (idx, row) in page.rows.iter().enumerate() {
                let ordinal = offset + idx as u64;
                counts.seen += 1;
                match self.process_row(run, row, ordinal, &snapshot).await {
                    Ok(RowOutcome::Matched) => counts.matched += 1,
                    Ok(RowOutcome::Created) => counts.created += 1,
                    Ok(RowOutcome::Suggested) => counts.suggested += 1,
                    Ok(RowOutcome::Skipped) => counts.skipped += 1,
                    Err(err) => {
                        counts.errored += 1;
                        warn!(ordinal, error = %err, "row failed");
                        if run.checkpoint.error_samples.len() < MAX_ERROR_SAMPLES {
                            run.checkpoint.error_samples.push(format!("row {ordinal}: {err}"));
                        }
                    }
                }
            }

            // Link writes for the chunk are done; only now does the offset move.
            run.checkpoint.source_offset = offset + page.rows.len() as u64;
            run.checkpoint.counts.absorb(&counts);
            run.checkpoint.total = page.total_count.or(run.checkpoint.total);
            run.checkpoint.last_error = None;
            let status = if page.has_more {
                JobStatus::Running
            } else {
                JobStatus::Completed
            };
            self.transition(run, status).await?;
            info!(
                rows = page.rows.len(),
                matched = counts.matched,
                created = counts.created,
                suggested = counts.suggested,
                errored = counts.errored,
                "chunk committed"
            );

            Ok(if page.has_more {
                ChunkOutcome::Continued
            } else {
                ChunkOutcome::Completed
            })
        }
        .instrument(span)
        .await
    }

    async fn process_row(
        &self,
        run: &JobRun,
        row: &SourceRow,
        ordinal: u64,
        snapshot: &CatalogSnapshot,
    ) -> Result<RowOutcome, ReconcileError> {
        let spec = &run.spec;
        let candidate = run.normalizer.normalize(row, ordinal)?;
        let resolution = self
            .matcher
            .resolve(&candidate, snapshot, spec.lexical_threshold)
            .await?;

        match (spec.policy, resolution) {
            (IngestionPolicy::Strict, Resolution::Matched(result)) => {
                let ctx = ApplyContext {
                    tenant_id: spec.tenant_id,
                    source_domain: spec.source_domain,
                    run_started_at: spec.created_at,
                };
                let outcome = self.graph.apply(&ctx, &result, &candidate).await?;
                Ok(if outcome.is_linked() {
                    RowOutcome::Matched
                } else {
                    RowOutcome::Skipped
                })
            }
            (IngestionPolicy::Strict, Resolution::NoMatch) => {
                let upsert = self.graph.upsert_subject(&candidate, spec.source_domain).await?;
                Ok(if upsert.created {
                    RowOutcome::Created
                } else {
                    RowOutcome::Skipped
                })
            }
            (IngestionPolicy::Suggestion, Resolution::Matched(result)) => {
                let subject_id = candidate.subject_id(spec.source_domain);
                let alternatives = self
                    .matcher
                    .rank(&candidate, snapshot, result.target_id, SUGGESTION_ALTERNATIVES);
                let suggestion = PendingSuggestion {
                    id: PendingSuggestion::deterministic_id(spec.job_id, subject_id, result.target_id),
                    tenant_id: spec.tenant_id,
                    job_id: spec.job_id,
                    subject_domain: spec.source_domain,
                    candidate,
                    result,
                    alternatives,
                    status: SuggestionStatus::Pending,
                    created_at: Utc::now(),
                };
                Ok(if self.store.insert_suggestion(suggestion).await? {
                    RowOutcome::Suggested
                } else {
                    RowOutcome::Skipped
                })
            }
            (IngestionPolicy::Suggestion, Resolution::NoMatch) => Ok(RowOutcome::Skipped),
        }
    }
}
