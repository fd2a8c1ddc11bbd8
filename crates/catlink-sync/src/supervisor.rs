//! Live job registry: one pipeline task per job, pause/resume, watch feeds.

use std::collections::HashMap;
use std::sync::Arc;

use catlink_adapters::{ColumnMapping, SourceCollaborator};
use catlink_core::{JobCheckpoint, JobCounts, JobSpec, JobStatus, ReconcileError, TenantId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::{IngestionPipeline, PauseFlag};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobState {
    pub spec: JobSpec,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub total: Option<u64>,
    pub source_offset: u64,
    pub last_error: Option<String>,
    pub error_samples: Vec<String>,
    pub catalog_truncated: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    fn from_checkpoint(spec: JobSpec, checkpoint: &JobCheckpoint, started_at: DateTime<Utc>) -> Self {
        let mut state = Self {
            spec,
            status: checkpoint.status,
            counts: JobCounts::default(),
            total: None,
            source_offset: 0,
            last_error: None,
            error_samples: Vec::new(),
            catalog_truncated: false,
            started_at,
            updated_at: checkpoint.recorded_at,
        };
        state.observe(checkpoint);
        state
    }

    fn observe(&mut self, checkpoint: &JobCheckpoint) {
        self.status = checkpoint.status;
        self.counts = checkpoint.counts;
        self.total = checkpoint.total;
        self.source_offset = checkpoint.source_offset;
        self.last_error = checkpoint.last_error.clone();
        self.error_samples = checkpoint.error_samples.clone();
        self.catalog_truncated = checkpoint.catalog_truncated;
        self.updated_at = checkpoint.recorded_at;
    }

    /// `seen / total`, when the source reports a total.
    pub fn progress(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.counts.seen as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.status, JobStatus::Queued | JobStatus::Running)
    }
}

struct JobEntry {
    tenant_id: TenantId,
    state: Arc<watch::Sender<JobState>>,
    pause: PauseFlag,
    task: JoinHandle<()>,
}

impl JobEntry {
    fn is_active(&self) -> bool {
        !self.task.is_finished() && !self.state.borrow().is_settled()
    }
}

pub struct JobSupervisor {
    pipeline: Arc<IngestionPipeline>,
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
}

impl JobSupervisor {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pipeline,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    /// Register the job and spawn its task.
    pub async fn start(
        &self,
        spec: JobSpec,
        source: Arc<dyn SourceCollaborator>,
        mapping: ColumnMapping,
    ) -> Result<JobState, ReconcileError> {
        self.launch(spec, source, mapping).await
    }

    /// Re-enter a paused or failed job at its checkpointed offset.
    pub async fn resume(
        &self,
        tenant_id: TenantId,
        job_id: Uuid,
        source: Arc<dyn SourceCollaborator>,
        mapping: ColumnMapping,
    ) -> Result<JobState, ReconcileError> {
        let store = self.pipeline.store();
        let spec = store
            .get_job(job_id)
            .await?
            .filter(|spec| spec.tenant_id == tenant_id)
            .ok_or_else(|| ReconcileError::NotFound(format!("job {job_id}")))?;
        let status = store
            .latest_checkpoint(job_id)
            .await?
            .map(|cp| cp.status)
            .unwrap_or(JobStatus::Queued);
        // A `running` checkpoint with no live task was left by a crashed process.
        if !status.is_resumable() && status != JobStatus::Running {
            return Err(ReconcileError::ConstraintViolation(format!(
                "job {job_id} is {status} and cannot resume"
            )));
        }
        self.launch(spec, source, mapping).await
    }

    async fn launch(
        &self,
        spec: JobSpec,
        source: Arc<dyn SourceCollaborator>,
        mapping: ColumnMapping,
    ) -> Result<JobState, ReconcileError> {
        let job_id = spec.job_id;
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.remove(&job_id) {
            if previous.is_active() {
                jobs.insert(job_id, previous);
                return Err(ReconcileError::ConstraintViolation(format!("job {job_id} is already running")));
            }
            // A settled task exits right after publishing its final state.
            if let Err(err) = previous.task.await {
                warn!(%job_id, error = %err, "previous job task ended abnormally");
            }
        }

        let mut run = self.pipeline.open(spec.clone(), source, mapping).await?;
        let mut state = JobState::from_checkpoint(spec.clone(), run.checkpoint(), Utc::now());
        if state.status != JobStatus::Completed {
            state.status = JobStatus::Queued;
        }
        let (tx, _rx) = watch::channel(state.clone());
        let tx = Arc::new(tx);
        let pause = PauseFlag::default();

        let task = {
            let pipeline = self.pipeline.clone();
            let tx = tx.clone();
            let pause = pause.clone();
            tokio::spawn(async move {
                let observer = {
                    let tx = tx.clone();
                    move |cp: &JobCheckpoint| {
                        tx.send_modify(|state| state.observe(cp));
                    }
                };
                match pipeline.run_to_completion(&mut run, &pause, &observer).await {
                    Ok(status) => info!(%job_id, %status, "job task finished"),
                    Err(err) => {
                        warn!(%job_id, error = %err, "job task failed");
                        tx.send_modify(|state| {
                            state.status = JobStatus::Failed;
                            state.last_error = Some(err.to_string());
                            state.updated_at = Utc::now();
                        });
                    }
                }
            })
        };

        info!(%job_id, tenant_id = %spec.tenant_id, source_id = %spec.source_id, "job queued");
        jobs.insert(
            job_id,
            JobEntry {
                tenant_id: spec.tenant_id,
                state: tx,
                pause,
                task,
            },
        );
        Ok(state)
    }

    /// Ask a live job to stop at its next chunk boundary.
    pub async fn pause(&self, tenant_id: TenantId, job_id: Uuid) -> Result<JobState, ReconcileError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs
            .get(&job_id)
            .filter(|entry| entry.tenant_id == tenant_id)
            .ok_or_else(|| ReconcileError::NotFound(format!("job {job_id}")))?;
        if !entry.is_active() {
            return Err(ReconcileError::ConstraintViolation(format!("job {job_id} is not running")));
        }
        entry.pause.request();
        info!(%job_id, "pause requested");
        let state = entry.state.borrow().clone();
        Ok(state)
    }

    pub async fn status(&self, tenant_id: TenantId, job_id: Uuid) -> Result<Option<JobState>, ReconcileError> {
        {
            let jobs = self.jobs.lock().await;
            if let Some(entry) = jobs.get(&job_id) {
                if entry.tenant_id != tenant_id {
                    return Ok(None);
                }
                return Ok(Some(entry.state.borrow().clone()));
            }
        }
        let store = self.pipeline.store();
        let Some(spec) = store.get_job(job_id).await?.filter(|spec| spec.tenant_id == tenant_id) else {
            return Ok(None);
        };
        let started_at = spec.created_at;
        let state = match store.latest_checkpoint(job_id).await? {
            Some(cp) => JobState::from_checkpoint(spec, &cp, started_at),
            None => JobState::from_checkpoint(spec.clone(), &JobCheckpoint::initial(&spec, started_at), started_at),
        };
        Ok(Some(state))
    }

    pub async fn list(&self, tenant_id: TenantId) -> Result<Vec<JobState>, ReconcileError> {
        let specs = self.pipeline.store().list_jobs(tenant_id).await?;
        let mut states = Vec::with_capacity(specs.len());
        for spec in specs {
            if let Some(state) = self.status(tenant_id, spec.job_id).await? {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// True when a live task for `source_id` exists for the tenant.
    pub async fn has_active_job(&self, tenant_id: TenantId, source_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        jobs.values().any(|entry| {
            entry.tenant_id == tenant_id && entry.is_active() && entry.state.borrow().spec.source_id == source_id
        })
    }

    pub async fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<JobState>> {
        self.jobs.lock().await.get(&job_id).map(|entry| entry.state.subscribe())
    }

    /// Wait until the job is paused, completed or failed.
    pub async fn wait(&self, job_id: Uuid) -> Option<JobState> {
        let mut rx = self.subscribe(job_id).await?;
        let settled = rx.wait_for(JobState::is_settled).await.ok()?.clone();
        Some(settled)
    }
}
