use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use catlink_core::{
    Gtin, IngestionPolicy, JobCheckpoint, JobCounts, JobSpec, JobStatus, LinkEdge,
    MatchStrategyKind, PairKey, PendingSuggestion, ProductDomain, ProductPatch, ResolvedProduct,
    SuggestionStatus, TenantId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::{EdgeUpsert, FieldUpdate, ProductUpsert, ReconcileStore, StoreError, StoreResult};

const EDGE_UPSERT_ATTEMPTS: u32 = 3;
const PRODUCT_COLUMNS: &str = "id, tenant_id, domain, source_id, reference_code, ean, name, brand, price, stock, created_at, updated_at";
const EDGE_COLUMNS: &str = "id, tenant_id, left_id, right_id, strategy, confidence, created_at, updated_at";
const SUGGESTION_COLUMNS: &str = "id, tenant_id, job_id, subject_domain, candidate_json, result_json, alternatives_json, status, created_at";
const JOB_COLUMNS: &str = "job_id, tenant_id, source_id, source_domain, target_domain, policy, chunk_size, lexical_threshold, created_at";
const CHECKPOINT_COLUMNS: &str = "job_id, tenant_id, source_offset, chunk_size, status, counts_json, total, last_error, error_samples, catalog_truncated, recorded_at";

/// Postgres-backed store. Edge uniqueness is enforced by the
/// `(tenant_id, left_id, right_id)` constraint and every edge write is an upsert.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_upsert_edge(&self, edge: &LinkEdge) -> StoreResult<EdgeAttempt> {
        let pair = edge.pair();
        // `exclusive_supplier_id` feeds the partial unique index that keeps
        // one automatic catalog edge per supplier product across processes.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO link_edges (id, tenant_id, left_id, right_id, strategy, confidence,
                                    exclusive_supplier_id, created_at, updated_at)
            SELECT $1::uuid, $2::uuid, $3::uuid, $4::uuid, $5::text, $6::smallint,
                   CASE
                       WHEN $5::text = 'manual' THEN NULL
                       WHEN l.domain = 'supplier_product' AND r.domain = 'catalog_analysis' THEN l.id
                       WHEN l.domain = 'catalog_analysis' AND r.domain = 'supplier_product' THEN r.id
                   END,
                   $7::timestamptz, $8::timestamptz
              FROM (SELECT 1) AS one
              LEFT JOIN products l ON l.tenant_id = $2::uuid AND l.id = $3::uuid
              LEFT JOIN products r ON r.tenant_id = $2::uuid AND r.id = $4::uuid
            ON CONFLICT (tenant_id, left_id, right_id) DO UPDATE SET
                strategy = EXCLUDED.strategy,
                confidence = EXCLUDED.confidence,
                exclusive_supplier_id = EXCLUDED.exclusive_supplier_id,
                updated_at = EXCLUDED.updated_at
            WHERE link_edges.confidence <= EXCLUDED.confidence
              AND (link_edges.strategy <> 'manual' OR EXCLUDED.strategy = 'manual')
            RETURNING {EDGE_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(edge.id)
        .bind(edge.tenant_id.as_uuid())
        .bind(pair.low)
        .bind(pair.high)
        .bind(edge.strategy.as_str())
        .bind(i16::from(edge.confidence))
        .bind(edge.created_at)
        .bind(edge.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?;

        if let Some(row) = row {
            let inserted: bool = row.try_get("inserted")?;
            let stored = edge_from_row(&row)?;
            return Ok(EdgeAttempt::Settled(if inserted {
                EdgeUpsert::Created(stored)
            } else {
                EdgeUpsert::Updated(stored)
            }));
        }

        let row = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM link_edges WHERE tenant_id = $1 AND left_id = $2 AND right_id = $3"
        ))
        .bind(edge.tenant_id.as_uuid())
        .bind(pair.low)
        .bind(pair.high)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                debug!(edge_id = %edge.id, "edge upsert suppressed by stronger stored edge");
                Ok(EdgeAttempt::Settled(EdgeUpsert::Unchanged(edge_from_row(&row)?)))
            }
            None => Ok(EdgeAttempt::Vanished),
        }
    }
}

/// One conditional edge upsert. `Vanished` means the upsert was suppressed by a
/// stored edge that was deleted before it could be read back.
enum EdgeAttempt {
    Settled(EdgeUpsert),
    Vanished,
}

async fn retry_vanished<F, Fut>(edge_id: Uuid, mut attempt: F) -> StoreResult<EdgeUpsert>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<EdgeAttempt>>,
{
    for n in 1..=EDGE_UPSERT_ATTEMPTS {
        match attempt().await? {
            EdgeAttempt::Settled(outcome) => return Ok(outcome),
            EdgeAttempt::Vanished => debug!(%edge_id, attempt = n, "stored edge deleted mid-upsert, retrying"),
        }
    }
    Err(StoreError::Conflict(format!("edge {edge_id} kept changing during upsert")))
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(err)
}

fn parse_text<T: FromStr>(row: &PgRow, column: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn product_from_row(row: &PgRow) -> StoreResult<ResolvedProduct> {
    Ok(ResolvedProduct {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        domain: parse_text(row, "domain")?,
        source_id: row.try_get("source_id")?,
        reference_code: row.try_get("reference_code")?,
        ean: row.try_get("ean")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        price: row.try_get("price")?,
        stock: row.try_get("stock")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn edge_from_row(row: &PgRow) -> StoreResult<LinkEdge> {
    let confidence: i16 = row.try_get("confidence")?;
    Ok(LinkEdge {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        left_id: row.try_get("left_id")?,
        right_id: row.try_get("right_id")?,
        strategy: parse_text::<MatchStrategyKind>(row, "strategy")?,
        confidence: confidence.clamp(0, 100) as u8,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn suggestion_from_row(row: &PgRow) -> StoreResult<PendingSuggestion> {
    let candidate: serde_json::Value = row.try_get("candidate_json")?;
    let result: serde_json::Value = row.try_get("result_json")?;
    let alternatives: serde_json::Value = row.try_get("alternatives_json")?;
    Ok(PendingSuggestion {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        job_id: row.try_get("job_id")?,
        subject_domain: parse_text(row, "subject_domain")?,
        candidate: serde_json::from_value(candidate)
            .map_err(|e| StoreError::Decode(format!("candidate_json: {e}")))?,
        result: serde_json::from_value(result)
            .map_err(|e| StoreError::Decode(format!("result_json: {e}")))?,
        alternatives: serde_json::from_value(alternatives)
            .map_err(|e| StoreError::Decode(format!("alternatives_json: {e}")))?,
        status: parse_text::<SuggestionStatus>(row, "status")?,
        created_at: row.try_get("created_at")?,
    })
}

fn job_from_row(row: &PgRow) -> StoreResult<JobSpec> {
    let chunk_size: i32 = row.try_get("chunk_size")?;
    let threshold: i16 = row.try_get("lexical_threshold")?;
    Ok(JobSpec {
        job_id: row.try_get("job_id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        source_id: row.try_get("source_id")?,
        source_domain: parse_text(row, "source_domain")?,
        target_domain: parse_text(row, "target_domain")?,
        policy: parse_text::<IngestionPolicy>(row, "policy")?,
        chunk_size: chunk_size.max(1) as u32,
        lexical_threshold: threshold.clamp(0, 100) as u8,
        created_at: row.try_get("created_at")?,
    })
}

fn checkpoint_from_row(row: &PgRow) -> StoreResult<JobCheckpoint> {
    let offset: i64 = row.try_get("source_offset")?;
    let chunk_size: i32 = row.try_get("chunk_size")?;
    let total: Option<i64> = row.try_get("total")?;
    let counts: serde_json::Value = row.try_get("counts_json")?;
    let samples: serde_json::Value = row.try_get("error_samples")?;
    Ok(JobCheckpoint {
        job_id: row.try_get("job_id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        source_offset: offset.max(0) as u64,
        chunk_size: chunk_size.max(1) as u32,
        status: parse_text::<JobStatus>(row, "status")?,
        counts: serde_json::from_value::<JobCounts>(counts)
            .map_err(|e| StoreError::Decode(format!("counts_json: {e}")))?,
        total: total.map(|t| t.max(0) as u64),
        last_error: row.try_get("last_error")?,
        error_samples: serde_json::from_value(samples)
            .map_err(|e| StoreError::Decode(format!("error_samples: {e}")))?,
        catalog_truncated: row.try_get("catalog_truncated")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Decode(format!("{what}: {e}")))
}

#[async_trait]
impl ReconcileStore for PgStore {
    async fn get_product(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<ResolvedProduct>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        gtin: &Gtin,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
              WHERE tenant_id = $1 AND domain = $2 AND ean IS NOT NULL
                AND lpad(ean, 14, '0') = $3
              ORDER BY id"
        ))
        .bind(tenant.as_uuid())
        .bind(domain.as_str())
        .bind(gtin.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let product = product_from_row(row)?;
            // The checksum is validated in Rust; the SQL filter only narrows by digits.
            if product.gtin().as_ref() == Some(gtin) {
                out.push(product);
            }
        }
        Ok(out)
    }

    async fn find_by_reference(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        source_id: &str,
        code: &str,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
              WHERE tenant_id = $1 AND domain = $2 AND source_id = $3
                AND btrim(reference_code) = $4
              ORDER BY id"
        ))
        .bind(tenant.as_uuid())
        .bind(domain.as_str())
        .bind(source_id)
        .bind(code.trim())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn list_products(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
              WHERE tenant_id = $1 AND domain = $2
              ORDER BY id
              OFFSET $3 LIMIT $4"
        ))
        .bind(tenant.as_uuid())
        .bind(domain.as_str())
        .bind(offset as i64)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    async fn upsert_product(&self, product: ResolvedProduct) -> StoreResult<ProductUpsert> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products ({PRODUCT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                brand = EXCLUDED.brand,
                ean = EXCLUDED.ean,
                reference_code = EXCLUDED.reference_code,
                price = COALESCE(EXCLUDED.price, products.price),
                stock = COALESCE(EXCLUDED.stock, products.stock),
                updated_at = CASE
                    WHEN (products.name, products.brand, products.ean, products.reference_code,
                          products.price, products.stock)
                         IS DISTINCT FROM
                         (EXCLUDED.name, EXCLUDED.brand, EXCLUDED.ean, EXCLUDED.reference_code,
                          COALESCE(EXCLUDED.price, products.price), COALESCE(EXCLUDED.stock, products.stock))
                    THEN EXCLUDED.updated_at
                    ELSE products.updated_at
                END
            WHERE products.tenant_id = EXCLUDED.tenant_id
            RETURNING {PRODUCT_COLUMNS}, (xmax = 0) AS inserted
            "#
        ))
        .bind(product.id)
        .bind(product.tenant_id.as_uuid())
        .bind(product.domain.as_str())
        .bind(&product.source_id)
        .bind(&product.reference_code)
        .bind(&product.ean)
        .bind(&product.name)
        .bind(&product.brand)
        .bind(product.price)
        .bind(product.stock)
        .bind(product.created_at)
        .bind(product.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?;

        let row = row.ok_or_else(|| {
            StoreError::Conflict(format!("product {} belongs to another tenant", product.id))
        })?;
        Ok(ProductUpsert {
            created: row.try_get("inserted")?,
            product: product_from_row(&row)?,
        })
    }

    async fn update_product_fields(
        &self,
        tenant: TenantId,
        id: Uuid,
        patch: &ProductPatch,
    ) -> StoreResult<Option<FieldUpdate>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(tenant.as_uuid())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let before = product_from_row(&row)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE products
               SET price = COALESCE($3, price),
                   stock = COALESCE($4, stock),
                   updated_at = CASE
                       WHEN (COALESCE($3, price), COALESCE($4, stock)) IS DISTINCT FROM (price, stock)
                       THEN NOW()
                       ELSE updated_at
                   END
             WHERE tenant_id = $1 AND id = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(tenant.as_uuid())
        .bind(id)
        .bind(patch.price)
        .bind(patch.stock)
        .fetch_one(&mut *tx)
        .await?;
        let after = product_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(FieldUpdate { before, after }))
    }

    async fn upsert_edge(&self, edge: LinkEdge) -> StoreResult<EdgeUpsert> {
        retry_vanished(edge.id, || self.try_upsert_edge(&edge)).await
    }

    async fn get_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>> {
        let row = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM link_edges WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(edge_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(edge_from_row).transpose()
    }

    async fn edges_for_product(&self, tenant: TenantId, product_id: Uuid) -> StoreResult<Vec<LinkEdge>> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM link_edges
              WHERE tenant_id = $1 AND (left_id = $2 OR right_id = $2)
              ORDER BY id"
        ))
        .bind(tenant.as_uuid())
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn list_edges(&self, tenant: TenantId) -> StoreResult<Vec<LinkEdge>> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM link_edges WHERE tenant_id = $1 ORDER BY left_id, right_id"
        ))
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn delete_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "DELETE FROM link_edges WHERE tenant_id = $1 AND id = $2 RETURNING {EDGE_COLUMNS}"
        ))
        .bind(tenant.as_uuid())
        .bind(edge_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let edge = edge_from_row(&row)?;
        sqlx::query(
            r#"
            INSERT INTO link_tombstones (tenant_id, left_id, right_id, unlinked_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tenant_id, left_id, right_id) DO UPDATE SET unlinked_at = EXCLUDED.unlinked_at
            "#,
        )
        .bind(tenant.as_uuid())
        .bind(edge.left_id)
        .bind(edge.right_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(edge))
    }

    async fn unlinked_at(&self, tenant: TenantId, pair: PairKey) -> StoreResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT unlinked_at FROM link_tombstones WHERE tenant_id = $1 AND left_id = $2 AND right_id = $3",
        )
        .bind(tenant.as_uuid())
        .bind(pair.low)
        .bind(pair.high)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get::<DateTime<Utc>, _>("unlinked_at")).transpose().map_err(Into::into)
    }

    async fn insert_suggestion(&self, suggestion: PendingSuggestion) -> StoreResult<bool> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO suggestions ({SUGGESTION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#
        ))
        .bind(suggestion.id)
        .bind(suggestion.tenant_id.as_uuid())
        .bind(suggestion.job_id)
        .bind(suggestion.subject_domain.as_str())
        .bind(to_json(&suggestion.candidate, "candidate")?)
        .bind(to_json(&suggestion.result, "result")?)
        .bind(to_json(&suggestion.alternatives, "alternatives")?)
        .bind(suggestion.status.as_str())
        .bind(suggestion.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_suggestion(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<PendingSuggestion>> {
        let row = sqlx::query(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(suggestion_from_row).transpose()
    }

    async fn list_suggestions(
        &self,
        tenant: TenantId,
        status: Option<SuggestionStatus>,
    ) -> StoreResult<Vec<PendingSuggestion>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM suggestions
              WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
              ORDER BY created_at, id"
        ))
        .bind(tenant.as_uuid())
        .bind(status.map(SuggestionStatus::as_str))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(suggestion_from_row).collect()
    }

    async fn set_suggestion_status(
        &self,
        tenant: TenantId,
        id: Uuid,
        status: SuggestionStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE suggestions SET status = $3 WHERE tenant_id = $1 AND id = $2")
            .bind(tenant.as_uuid())
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("suggestion {id}")));
        }
        Ok(())
    }

    async fn save_job(&self, spec: &JobSpec) -> StoreResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO ingestion_jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_id) DO NOTHING
            "#
        ))
        .bind(spec.job_id)
        .bind(spec.tenant_id.as_uuid())
        .bind(&spec.source_id)
        .bind(spec.source_domain.as_str())
        .bind(spec.target_domain.as_str())
        .bind(match spec.policy {
            IngestionPolicy::Strict => "strict",
            IngestionPolicy::Suggestion => "suggestion",
        })
        .bind(spec.chunk_size as i32)
        .bind(i16::from(spec.lexical_threshold))
        .bind(spec.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobSpec>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE job_id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, tenant: TenantId) -> StoreResult<Vec<JobSpec>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE tenant_id = $1 ORDER BY created_at DESC"
        ))
        .bind(tenant.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn append_checkpoint(&self, checkpoint: &JobCheckpoint) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO job_checkpoints ({CHECKPOINT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(checkpoint.job_id)
        .bind(checkpoint.tenant_id.as_uuid())
        .bind(checkpoint.source_offset as i64)
        .bind(checkpoint.chunk_size as i32)
        .bind(checkpoint.status.as_str())
        .bind(to_json(&checkpoint.counts, "counts")?)
        .bind(checkpoint.total.map(|t| t as i64))
        .bind(&checkpoint.last_error)
        .bind(to_json(&checkpoint.error_samples, "error_samples")?)
        .bind(checkpoint.catalog_truncated)
        .bind(checkpoint.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_checkpoint(&self, job_id: Uuid) -> StoreResult<Option<JobCheckpoint>> {
        let row = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM job_checkpoints WHERE job_id = $1 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn checkpoint_history(&self, job_id: Uuid) -> StoreResult<Vec<JobCheckpoint>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM job_checkpoints WHERE job_id = $1 ORDER BY seq"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(checkpoint_from_row).collect()
    }
}
