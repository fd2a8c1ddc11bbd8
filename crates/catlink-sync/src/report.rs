//! Per-job report export: JSON summary plus parquet snapshots of the link graph.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use catlink_core::{JobCheckpoint, JobSpec, LinkEdge, PendingSuggestion, SuggestionStatus};
use catlink_storage::ReconcileStore;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct JobReportSummary {
    pub job: JobSpec,
    pub checkpoint: Option<JobCheckpoint>,
    pub progress: Option<f64>,
    /// Fuzzy matching saw only part of the target catalog in at least one chunk.
    pub catalog_truncated: bool,
    pub edge_count: usize,
    pub pending_suggestions: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub report_dir: PathBuf,
    pub summary_path: PathBuf,
    pub manifest_path: PathBuf,
    pub summary: JobReportSummary,
}

/// Writes `reports/<job_id>/` under `workspace_root` and returns where it landed.
pub async fn write_job_report(
    store: Arc<dyn ReconcileStore>,
    workspace_root: &Path,
    job_id: Uuid,
) -> Result<JobReport> {
    let job = store
        .get_job(job_id)
        .await
        .context("loading job spec")?
        .with_context(|| format!("unknown job {job_id}"))?;
    let checkpoint = store.latest_checkpoint(job_id).await.context("loading checkpoint")?;
    let edges = store.list_edges(job.tenant_id).await.context("loading link edges")?;
    let suggestions = store
        .list_suggestions(job.tenant_id, Some(SuggestionStatus::Pending))
        .await
        .context("loading suggestions")?
        .into_iter()
        .filter(|s| s.job_id == job_id)
        .collect::<Vec<_>>();

    let report_dir = workspace_root.join("reports").join(job_id.to_string());
    let snapshot_dir = report_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let summary = JobReportSummary {
        progress: checkpoint.as_ref().and_then(JobCheckpoint::progress),
        catalog_truncated: checkpoint.as_ref().is_some_and(|cp| cp.catalog_truncated),
        job,
        checkpoint,
        edge_count: edges.len(),
        pending_suggestions: suggestions.len(),
        generated_at: Utc::now(),
    };
    let summary_path = report_dir.join("summary.json");
    let bytes = serde_json::to_vec_pretty(&summary).context("serializing job summary")?;
    fs::write(&summary_path, bytes)
        .await
        .with_context(|| format!("writing {}", summary_path.display()))?;

    let links_path = snapshot_dir.join("links.parquet");
    let suggestions_path = snapshot_dir.join("suggestions.parquet");
    write_links_parquet(&links_path, &edges)?;
    write_suggestions_parquet(&suggestions_path, &suggestions)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("links", &report_dir, &links_path)?,
            manifest_entry("suggestions", &report_dir, &suggestions_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    info!(%job_id, report_dir = %report_dir.display(), edges = summary.edge_count, "job report written");
    Ok(JobReport {
        report_dir,
        summary_path,
        manifest_path,
        summary,
    })
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_links_parquet(path: &Path, edges: &[LinkEdge]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("edge_id", DataType::Utf8, false),
        ArrowField::new("left_id", DataType::Utf8, false),
        ArrowField::new("right_id", DataType::Utf8, false),
        ArrowField::new("strategy", DataType::Utf8, false),
        ArrowField::new("confidence", DataType::UInt32, false),
        ArrowField::new("created_at", DataType::Utf8, false),
        ArrowField::new("updated_at", DataType::Utf8, false),
    ]));

    let ids = StringArray::from(edges.iter().map(|e| e.id.to_string()).collect::<Vec<_>>());
    let lefts = StringArray::from(edges.iter().map(|e| e.left_id.to_string()).collect::<Vec<_>>());
    let rights = StringArray::from(edges.iter().map(|e| e.right_id.to_string()).collect::<Vec<_>>());
    let strategies = StringArray::from(edges.iter().map(|e| e.strategy.as_str()).collect::<Vec<_>>());
    let confidences = UInt32Array::from(edges.iter().map(|e| u32::from(e.confidence)).collect::<Vec<_>>());
    let created = StringArray::from(edges.iter().map(|e| e.created_at.to_rfc3339()).collect::<Vec<_>>());
    let updated = StringArray::from(edges.iter().map(|e| e.updated_at.to_rfc3339()).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(lefts),
            Arc::new(rights),
            Arc::new(strategies),
            Arc::new(confidences),
            Arc::new(created),
            Arc::new(updated),
        ],
    )
    .context("building links record batch")?;
    write_parquet(path, batch)
}

fn write_suggestions_parquet(path: &Path, suggestions: &[PendingSuggestion]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("suggestion_id", DataType::Utf8, false),
        ArrowField::new("source_ref", DataType::Utf8, false),
        ArrowField::new("candidate_name", DataType::Utf8, false),
        ArrowField::new("target_id", DataType::Utf8, false),
        ArrowField::new("strategy", DataType::Utf8, false),
        ArrowField::new("confidence", DataType::UInt32, false),
        ArrowField::new("alternative_ids", DataType::Utf8, false),
    ]));

    let ids = StringArray::from(suggestions.iter().map(|s| s.id.to_string()).collect::<Vec<_>>());
    let refs = StringArray::from(
        suggestions
            .iter()
            .map(|s| s.candidate.source_ref.as_str())
            .collect::<Vec<_>>(),
    );
    let names = StringArray::from(suggestions.iter().map(|s| s.candidate.name.as_str()).collect::<Vec<_>>());
    let targets = StringArray::from(
        suggestions
            .iter()
            .map(|s| s.result.target_id.to_string())
            .collect::<Vec<_>>(),
    );
    let strategies = StringArray::from(
        suggestions
            .iter()
            .map(|s| s.result.strategy.as_str())
            .collect::<Vec<_>>(),
    );
    let confidences = UInt32Array::from(
        suggestions
            .iter()
            .map(|s| u32::from(s.result.confidence))
            .collect::<Vec<_>>(),
    );
    let alternatives = StringArray::from(
        suggestions
            .iter()
            .map(|s| {
                s.alternatives
                    .iter()
                    .map(|alt| alt.product_id.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(ids),
            Arc::new(refs),
            Arc::new(names),
            Arc::new(targets),
            Arc::new(strategies),
            Arc::new(confidences),
            Arc::new(alternatives),
        ],
    )
    .context("building suggestions record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, report_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path.strip_prefix(report_dir).unwrap_or(path).display().to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}
