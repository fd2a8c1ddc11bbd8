use std::collections::HashMap;

use async_trait::async_trait;
use catlink_core::{
    Gtin, JobCheckpoint, JobSpec, LinkEdge, PairKey, PendingSuggestion, ProductDomain,
    ProductPatch, ResolvedProduct, SuggestionStatus, TenantId,
};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    edge_replaces, EdgeUpsert, FieldUpdate, ProductUpsert, ReconcileStore, StoreError,
    StoreResult,
};

/// Process-local store. A single mutex serializes every write, which gives the
/// same convergence guarantees as the unique constraint in Postgres.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<(TenantId, Uuid), ResolvedProduct>,
    edges: HashMap<(TenantId, PairKey), LinkEdge>,
    tombstones: HashMap<(TenantId, PairKey), DateTime<Utc>>,
    suggestions: HashMap<(TenantId, Uuid), PendingSuggestion>,
    jobs: HashMap<Uuid, JobSpec>,
    checkpoints: HashMap<Uuid, Vec<JobCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed products directly, bypassing upsert semantics.
    pub async fn seed_products(&self, products: impl IntoIterator<Item = ResolvedProduct>) {
        let mut state = self.state.lock().await;
        for product in products {
            state.products.insert((product.tenant_id, product.id), product);
        }
    }
}

impl MemoryState {
    /// Supplier end of an automatic supplier/catalog edge, mirroring the
    /// `link_edges_supplier_exclusive_idx` partial index.
    fn exclusive_supplier(&self, edge: &LinkEdge) -> Option<Uuid> {
        if !edge.strategy.is_automatic() {
            return None;
        }
        let left = self.products.get(&(edge.tenant_id, edge.left_id))?;
        let right = self.products.get(&(edge.tenant_id, edge.right_id))?;
        match (left.domain, right.domain) {
            (ProductDomain::SupplierProduct, ProductDomain::CatalogAnalysis) => Some(left.id),
            (ProductDomain::CatalogAnalysis, ProductDomain::SupplierProduct) => Some(right.id),
            _ => None,
        }
    }
}

fn sorted_by_id(mut products: Vec<ResolvedProduct>) -> Vec<ResolvedProduct> {
    products.sort_by_key(|p| p.id);
    products
}

#[async_trait]
impl ReconcileStore for MemoryStore {
    async fn get_product(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<ResolvedProduct>> {
        Ok(self.state.lock().await.products.get(&(tenant, id)).cloned())
    }

    async fn find_by_identifier(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        gtin: &Gtin,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let state = self.state.lock().await;
        Ok(sorted_by_id(
            state
                .products
                .values()
                .filter(|p| p.tenant_id == tenant && p.domain == domain)
                .filter(|p| p.gtin().as_ref() == Some(gtin))
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_reference(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        source_id: &str,
        code: &str,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let state = self.state.lock().await;
        Ok(sorted_by_id(
            state
                .products
                .values()
                .filter(|p| p.tenant_id == tenant && p.domain == domain)
                .filter(|p| p.source_id.as_deref() == Some(source_id))
                .filter(|p| p.reference_code.as_deref().map(str::trim) == Some(code.trim()))
                .cloned()
                .collect(),
        ))
    }

    async fn list_products(
        &self,
        tenant: TenantId,
        domain: ProductDomain,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<ResolvedProduct>> {
        let state = self.state.lock().await;
        let all = sorted_by_id(
            state
                .products
                .values()
                .filter(|p| p.tenant_id == tenant && p.domain == domain)
                .cloned()
                .collect(),
        );
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn upsert_product(&self, product: ResolvedProduct) -> StoreResult<ProductUpsert> {
        let mut state = self.state.lock().await;
        let key = (product.tenant_id, product.id);
        match state.products.get_mut(&key) {
            Some(existing) => {
                let refreshed = existing.name != product.name
                    || existing.brand != product.brand
                    || existing.ean != product.ean
                    || existing.reference_code != product.reference_code
                    || (product.price.is_some() && existing.price != product.price)
                    || (product.stock.is_some() && existing.stock != product.stock);
                if refreshed {
                    existing.name = product.name;
                    existing.brand = product.brand;
                    existing.ean = product.ean;
                    existing.reference_code = product.reference_code;
                    existing.price = product.price.or(existing.price);
                    existing.stock = product.stock.or(existing.stock);
                    existing.updated_at = product.updated_at;
                }
                Ok(ProductUpsert {
                    product: existing.clone(),
                    created: false,
                })
            }
            None => {
                state.products.insert(key, product.clone());
                Ok(ProductUpsert {
                    product,
                    created: true,
                })
            }
        }
    }

    async fn update_product_fields(
        &self,
        tenant: TenantId,
        id: Uuid,
        patch: &ProductPatch,
    ) -> StoreResult<Option<FieldUpdate>> {
        let mut state = self.state.lock().await;
        let Some(product) = state.products.get_mut(&(tenant, id)) else {
            return Ok(None);
        };
        let before = product.clone();
        if let Some(price) = patch.price {
            product.price = Some(price);
        }
        if let Some(stock) = patch.stock {
            product.stock = Some(stock);
        }
        if before.price != product.price || before.stock != product.stock {
            product.updated_at = Utc::now();
        }
        Ok(Some(FieldUpdate {
            before,
            after: product.clone(),
        }))
    }

    async fn upsert_edge(&self, edge: LinkEdge) -> StoreResult<EdgeUpsert> {
        let mut state = self.state.lock().await;
        let key = (edge.tenant_id, edge.pair());
        match state.edges.get_mut(&key) {
            Some(existing) if edge_replaces(existing, &edge) => {
                existing.strategy = edge.strategy;
                existing.confidence = edge.confidence;
                existing.updated_at = edge.updated_at;
                Ok(EdgeUpsert::Updated(existing.clone()))
            }
            Some(existing) => Ok(EdgeUpsert::Unchanged(existing.clone())),
            None => {
                if let Some(supplier) = state.exclusive_supplier(&edge) {
                    let taken = state
                        .edges
                        .values()
                        .filter(|e| e.tenant_id == edge.tenant_id && e.pair().contains(supplier))
                        .any(|e| state.exclusive_supplier(e) == Some(supplier));
                    if taken {
                        return Err(StoreError::Conflict(format!(
                            "supplier product {supplier} already has an automatic catalog link"
                        )));
                    }
                }
                state.edges.insert(key, edge.clone());
                Ok(EdgeUpsert::Created(edge))
            }
        }
    }

    async fn get_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .values()
            .find(|e| e.tenant_id == tenant && e.id == edge_id)
            .cloned())
    }

    async fn edges_for_product(&self, tenant: TenantId, product_id: Uuid) -> StoreResult<Vec<LinkEdge>> {
        let state = self.state.lock().await;
        let mut edges: Vec<_> = state
            .edges
            .iter()
            .filter(|((t, pair), _)| *t == tenant && pair.contains(product_id))
            .map(|(_, e)| e.clone())
            .collect();
        edges.sort_by_key(|e| e.id);
        Ok(edges)
    }

    async fn list_edges(&self, tenant: TenantId) -> StoreResult<Vec<LinkEdge>> {
        let state = self.state.lock().await;
        let mut edges: Vec<_> = state
            .edges
            .values()
            .filter(|e| e.tenant_id == tenant)
            .cloned()
            .collect();
        edges.sort_by_key(|e| (e.left_id, e.right_id));
        Ok(edges)
    }

    async fn delete_edge(&self, tenant: TenantId, edge_id: Uuid) -> StoreResult<Option<LinkEdge>> {
        let mut state = self.state.lock().await;
        let Some(key) = state
            .edges
            .iter()
            .find(|((t, _), e)| *t == tenant && e.id == edge_id)
            .map(|(k, _)| *k)
        else {
            return Ok(None);
        };
        let removed = state.edges.remove(&key);
        state.tombstones.insert(key, Utc::now());
        Ok(removed)
    }

    async fn unlinked_at(&self, tenant: TenantId, pair: PairKey) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.tombstones.get(&(tenant, pair)).copied())
    }

    async fn insert_suggestion(&self, suggestion: PendingSuggestion) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let key = (suggestion.tenant_id, suggestion.id);
        if state.suggestions.contains_key(&key) {
            return Ok(false);
        }
        state.suggestions.insert(key, suggestion);
        Ok(true)
    }

    async fn get_suggestion(&self, tenant: TenantId, id: Uuid) -> StoreResult<Option<PendingSuggestion>> {
        Ok(self.state.lock().await.suggestions.get(&(tenant, id)).cloned())
    }

    async fn list_suggestions(
        &self,
        tenant: TenantId,
        status: Option<SuggestionStatus>,
    ) -> StoreResult<Vec<PendingSuggestion>> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state
            .suggestions
            .values()
            .filter(|s| s.tenant_id == tenant)
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn set_suggestion_status(
        &self,
        tenant: TenantId,
        id: Uuid,
        status: SuggestionStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let suggestion = state
            .suggestions
            .get_mut(&(tenant, id))
            .ok_or_else(|| StoreError::NotFound(format!("suggestion {id}")))?;
        suggestion.status = status;
        Ok(())
    }

    async fn save_job(&self, spec: &JobSpec) -> StoreResult<()> {
        self.state.lock().await.jobs.insert(spec.job_id, spec.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobSpec>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, tenant: TenantId) -> StoreResult<Vec<JobSpec>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn append_checkpoint(&self, checkpoint: &JobCheckpoint) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&checkpoint.job_id) {
            return Err(StoreError::NotFound(format!("job {}", checkpoint.job_id)));
        }
        state
            .checkpoints
            .entry(checkpoint.job_id)
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self, job_id: Uuid) -> StoreResult<Option<JobCheckpoint>> {
        let state = self.state.lock().await;
        Ok(state.checkpoints.get(&job_id).and_then(|h| h.last().cloned()))
    }

    async fn checkpoint_history(&self, job_id: Uuid) -> StoreResult<Vec<JobCheckpoint>> {
        let state = self.state.lock().await;
        Ok(state.checkpoints.get(&job_id).cloned().unwrap_or_default())
    }
}
