//! Persistence boundary for the reconciliation engine plus shared HTTP utilities.

use async_trait::async_trait;
use catlink_core::{
    Gtin, JobCheckpoint, JobSpec, LinkEdge, PairKey, PendingSuggestion, ProductDomain,
    ProductPatch, ReconcileError, ResolvedProduct, SuggestionStatus, TenantId,
};
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

mod http;
mod memory;
mod postgres;

pub use http::{HttpClientConfig, HttpError, JsonHttpClient, RetrySchedule};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "catlink-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflicting concurrent write: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("undecodable row: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => ReconcileError::ConstraintViolation(msg),
            StoreError::NotFound(msg) => ReconcileError::NotFound(msg),
            other => ReconcileError::Storage(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ProductUpsert {
    pub product: ResolvedProduct,
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub before: ResolvedProduct,
    pub after: ResolvedProduct,
}

impl FieldUpdate {
    pub fn changed(&self) -> bool {
        self.before.price != self.after.price || self.before.stock != self.after.stock
    }
}

/// Result of an edge upsert. The store decides atomically which branch applies.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeUpsert {
    Created(LinkEdge),
    Updated(LinkEdge),
    /// The stored edge outranks the incoming one (higher confidence, or manual).
    Unchanged(LinkEdge),
}

impl EdgeUpsert {
    pub fn edge(&self) -> &LinkEdge {
        match self {
            EdgeUpsert::Created(edge) | EdgeUpsert::Updated(edge) | EdgeUpsert::Unchanged(edge) => edge,
        }
    }
}

/// Whether `incoming` may replace `existing` on the same pair.
///
/// Confidence never decreases, and automatic strategies never overwrite a manual edge.
pub fn edge_replaces(existing: &LinkEdge, incoming: &LinkEdge) -> bool {
    if !existing.strategy.is_automatic() && incoming.strategy.is_automatic() {
        return false;
    }
    incoming.confidence >= existing.confidence
}

/// Storage contract required by the engine. All reads and writes are tenant scoped.
#[async_trait]
pub trait ReconcileStore: Send + Sync {
    async fn get_product(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<ResolvedProduct>>;

    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        gtin: &Gtin,
    ) -> StoreResult<Vec<ResolvedProduct>>;

    async fn find_by_reference(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        source_id: &str,
        code: &str,
    ) -> StoreResult<Vec<ResolvedProduct>>;

    /// Bounded page of products ordered by id, for fuzzy scans.
    async fn list_products(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<ResolvedProduct>>;

    /// Insert the product, or refresh descriptive fields of the stored one.
    async fn upsert_product(&self, product: ResolvedProduct) -> StoreResult<ProductUpsert>;

    async fn update_product_fields(
        &self,
        tenant: TenantId,
        id: Uuid,
        patch: &ProductPatch,
    ) -> StoreResult<Option<FieldUpdate>>;

    /// Insert or update the edge for its pair; unique on (tenant, pair).
    async fn upsert_edge(&self, edge: LinkEdge) -> StoreResult<EdgeUpsert>;

    async fn get_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>>;

    async fn edges_for_product(&self, tenant: TenantId, product_id: Uuid) -> StoreResult<Vec<LinkEdge>>;

    async fn list_edges(&self, tenant: TenantId) -> StoreResult<Vec<LinkEdge>>;

    /// Delete the edge and remember when its pair was unlinked.
    async fn delete_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>>;

    async fn unlinked_at(&self, tenant: TenantId, pair: PairKey) -> StoreResult<Option<DateTime<Utc>>>;

    /// Returns false when a suggestion with the same id already exists.
    async fn insert_suggestion(&self, suggestion: PendingSuggestion) -> StoreResult<bool>;

    async fn get_suggestion(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<PendingSuggestion>>;

    async fn list_suggestions(
        &self,
        tenant: TenantId,
        status: Option<SuggestionStatus>,
    ) -> StoreResult<Vec<PendingSuggestion>>;

    async fn set_suggestion_status(
        &self,
        tenant: TenantId,
        id: Uuid,
        status: SuggestionStatus,
    ) -> StoreResult<()>;

    async fn save_job(&self, spec: &JobSpec) -> StoreResult<()>;

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobSpec>>;

    async fn list_jobs(&self, tenant: TenantId) -> StoreResult<Vec<JobSpec>>;

    async fn append_checkpoint(&self, checkpoint: &JobCheckpoint) -> StoreResult<()>;

    async fn latest_checkpoint(&self, job_id: Uuid) -> StoreResult<Option<JobCheckpoint>>;

    async fn checkpoint_history(&self, job_id: Uuid) -> StoreResult<Vec<JobCheckpoint>>;
}
