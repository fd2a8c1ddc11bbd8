use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catlink_core::{IngestionPolicy, JobStatus, TenantId};
use catlink_storage::PgStore;
use catlink_sync::{write_job_report, Engine, JobRequest, SyncConfig};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "catlink-cli")]
#[command(about = "Catalog reconciliation engine command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP control surface (and the scheduler when enabled).
    Serve,
    /// Apply database migrations.
    Migrate,
    /// Run one ingestion job to completion and print its summary.
    Ingest {
        #[arg(long)]
        source: String,
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        policy: Option<IngestionPolicy>,
        #[arg(long)]
        chunk_size: Option<u32>,
    },
    /// Write the report for an existing job.
    Report {
        #[arg(long)]
        job: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("catlink=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    tracing::debug!(command = ?cli.command, workspace = %config.workspace_root.display(), "catlink-cli starting");

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let engine = Engine::from_config(config).await?;
            catlink_web::serve(Arc::new(engine)).await?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Ingest {
            source,
            tenant,
            policy,
            chunk_size,
        } => {
            let engine = Engine::from_config(config).await?.with_completion_reports(false);
            let request = JobRequest {
                policy,
                chunk_size,
                ..JobRequest::for_source(source)
            };
            let queued = engine.start_job(tenant, &request).await?;
            let job_id = queued.spec.job_id;
            let state = engine
                .supervisor()
                .wait(job_id)
                .await
                .context("job state feed closed")?;
            let counts = state.counts;
            println!(
                "job {job_id} {}: seen={} matched={} created={} suggested={} skipped={} errored={}",
                state.status,
                counts.seen,
                counts.matched,
                counts.created,
                counts.suggested,
                counts.skipped,
                counts.errored
            );
            for sample in &state.error_samples {
                println!("  error: {sample}");
            }
            if state.status != JobStatus::Completed {
                bail!(
                    "job {job_id} ended {}: {}",
                    state.status,
                    state.last_error.unwrap_or_default()
                );
            }
            let report = write_job_report(engine.store().clone(), &engine.config().workspace_root, job_id).await?;
            println!("report written to {}", report.report_dir.display());
        }
        Commands::Report { job } => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to postgres")?;
            let report = write_job_report(Arc::new(store), &config.workspace_root, job).await?;
            println!(
                "report for job {job}: edges={} pending_suggestions={} manifest={}",
                report.summary.edge_count,
                report.summary.pending_suggestions,
                report.manifest_path.display()
            );
        }
    }

    Ok(())
}
