//! Link graph writes: idempotent edge upserts, confirmation of suggestions,
//! manual unlink and price propagation.

use std::sync::Arc;

use catlink_core::{
    price_change_pct, CandidateRecord, LinkEdge, MatchResult, PairKey, PriceChangeEvent, ProductDomain,
    ProductPatch, ReconcileError, ResolvedProduct, SuggestionStatus, TenantId, DEFAULT_PRICE_ALERT_PCT,
};
use catlink_storage::{EdgeUpsert, ProductUpsert, ReconcileStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Fire-and-forget destination for price change events.
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: PriceChangeEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, event: PriceChangeEvent) {
        info!(
            tenant_id = %event.tenant_id,
            product_id = %event.product_id,
            old_price = event.old_price,
            new_price = event.new_price,
            change_pct = event.change_pct,
            "price change"
        );
    }
}

/// Bounded channel sink; events are dropped when the receiver lags.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::Sender<PriceChangeEvent>,
}

impl ChannelAlertSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PriceChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&self, event: PriceChangeEvent) {
        if let Err(err) = self.tx.try_send(event) {
            warn!(error = %err, "price change event dropped");
        }
    }
}

/// Per-call context for `apply`.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    pub tenant_id: TenantId,
    /// Domain the candidate's own node lives in.
    pub source_domain: ProductDomain,
    /// Pairs unlinked at or after this instant are not re-created.
    pub run_started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SelfLink,
    Conflict,
    Unlinked,
    LowerConfidence,
    ManualEdge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    Created { edge: LinkEdge },
    Updated { edge: LinkEdge },
    Skipped { reason: SkipReason },
}

impl LinkOutcome {
    pub fn edge(&self) -> Option<&LinkEdge> {
        match self {
            LinkOutcome::Created { edge } | LinkOutcome::Updated { edge } => Some(edge),
            LinkOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.edge().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmItem {
    pub suggestion_id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<LinkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfirmReport {
    pub items: Vec<ConfirmItem>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Retries a write once when a concurrent writer won the unique-key race.
async fn once_more_on_conflict<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(StoreError::Conflict(msg)) => {
            warn!(%msg, "write conflict, retrying once");
            op().await
        }
        other => other,
    }
}

pub struct LinkGraphManager {
    store: Arc<dyn ReconcileStore>,
    alerts: Arc<dyn AlertSink>,
    price_alert_pct: f64,
    // Serializes the exclusivity check with the edge write.
    exclusive: Mutex<()>,
}

impl LinkGraphManager {
    pub fn new(store: Arc<dyn ReconcileStore>, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            alerts,
            price_alert_pct: DEFAULT_PRICE_ALERT_PCT,
            exclusive: Mutex::new(()),
        }
    }

    pub fn with_price_alert_pct(mut self, pct: f64) -> Self {
        self.price_alert_pct = pct;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReconcileStore> {
        &self.store
    }

    /// Materialize the candidate's node in its source domain.
    pub async fn upsert_subject(
        &self,
        candidate: &CandidateRecord,
        domain: ProductDomain,
    ) -> Result<ProductUpsert, ReconcileError> {
        let product = ResolvedProduct::from_candidate(candidate, domain, Utc::now());
        let upsert = once_more_on_conflict(|| self.store.upsert_product(product.clone())).await?;
        Ok(upsert)
    }

    pub async fn apply(
        &self,
        ctx: &ApplyContext,
        result: &MatchResult,
        candidate: &CandidateRecord,
    ) -> Result<LinkOutcome, ReconcileError> {
        let subject = self.upsert_subject(candidate, ctx.source_domain).await?.product;
        let pair = PairKey::new(subject.id, result.target_id);
        if pair.is_self_link() {
            return Ok(LinkOutcome::Skipped {
                reason: SkipReason::SelfLink,
            });
        }

        let target = self
            .store
            .get_product(ctx.tenant_id, result.target_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("product {}", result.target_id)))?;

        if let Some(unlinked_at) = self.store.unlinked_at(ctx.tenant_id, pair).await? {
            if unlinked_at >= ctx.run_started_at {
                return Ok(LinkOutcome::Skipped {
                    reason: SkipReason::Unlinked,
                });
            }
        }

        let exclusive = result.strategy.is_automatic() && exclusive_pair(&subject, &target).is_some();
        let outcome = {
            let _guard = if exclusive {
                Some(self.exclusive.lock().await)
            } else {
                None
            };
            if exclusive && self.violates_exclusivity(&subject, &target).await? {
                return Ok(LinkOutcome::Skipped {
                    reason: SkipReason::Conflict,
                });
            }
            let edge = LinkEdge::new(ctx.tenant_id, pair, result.strategy, result.confidence, Utc::now());
            let written = match once_more_on_conflict(|| self.store.upsert_edge(edge.clone())).await {
                // Another process linked this supplier first; the unique index decided.
                Err(StoreError::Conflict(msg)) if exclusive => {
                    warn!(%msg, supplier_pair = ?pair, "exclusive link rejected by store");
                    return Ok(LinkOutcome::Skipped {
                        reason: SkipReason::Conflict,
                    });
                }
                other => other?,
            };
            match written {
                EdgeUpsert::Created(edge) => LinkOutcome::Created { edge },
                EdgeUpsert::Updated(edge) => LinkOutcome::Updated { edge },
                EdgeUpsert::Unchanged(existing) if !existing.strategy.is_automatic() => LinkOutcome::Skipped {
                    reason: SkipReason::ManualEdge,
                },
                EdgeUpsert::Unchanged(_) => LinkOutcome::Skipped {
                    reason: SkipReason::LowerConfidence,
                },
            }
        };

        if let (Some(edge), Some(price)) = (outcome.edge(), candidate.price) {
            self.propagate_price(&target, edge.id, price).await?;
        }
        Ok(outcome)
    }

    /// A supplier product may hold one automatic edge to a catalog product.
    async fn violates_exclusivity(
        &self,
        subject: &ResolvedProduct,
        target: &ResolvedProduct,
    ) -> Result<bool, ReconcileError> {
        let Some((supplier, catalog)) = exclusive_pair(subject, target) else {
            return Ok(false);
        };
        for edge in self.store.edges_for_product(supplier.tenant_id, supplier.id).await? {
            if !edge.strategy.is_automatic() {
                continue;
            }
            let Some(other) = edge.pair().other(supplier.id) else {
                continue;
            };
            if other == catalog.id {
                continue;
            }
            let other_domain = self
                .store
                .get_product(supplier.tenant_id, other)
                .await?
                .map(|p| p.domain);
            if other_domain == Some(ProductDomain::CatalogAnalysis) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn propagate_price(&self, target: &ResolvedProduct, edge_id: Uuid, price: f64) -> Result<(), ReconcileError> {
        if target.price == Some(price) {
            return Ok(());
        }
        let patch = ProductPatch {
            price: Some(price),
            stock: None,
        };
        let Some(update) = self
            .store
            .update_product_fields(target.tenant_id, target.id, &patch)
            .await?
        else {
            return Ok(());
        };
        if !update.changed() {
            return Ok(());
        }
        if let Some(change_pct) = price_change_pct(update.before.price, price) {
            if change_pct > self.price_alert_pct {
                self.alerts.emit(PriceChangeEvent {
                    tenant_id: target.tenant_id,
                    product_id: target.id,
                    edge_id: Some(edge_id),
                    old_price: update.before.price.unwrap_or_default(),
                    new_price: price,
                    change_pct,
                    emitted_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    /// Confirm pending suggestions one by one; a failing item never affects the others.
    pub async fn batch_confirm(&self, tenant_id: TenantId, suggestion_ids: &[Uuid]) -> BatchConfirmReport {
        let mut report = BatchConfirmReport::default();
        for id in suggestion_ids {
            let item = match self.confirm_one(tenant_id, *id).await {
                Ok(outcome) => ConfirmItem {
                    suggestion_id: *id,
                    ok: true,
                    outcome: Some(outcome),
                    error: None,
                },
                Err(err) => {
                    warn!(suggestion_id = %id, error = %err, "suggestion confirmation failed");
                    ConfirmItem {
                        suggestion_id: *id,
                        ok: false,
                        outcome: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            if item.ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
            report.items.push(item);
        }
        info!(%tenant_id, succeeded = report.succeeded, failed = report.failed, "batch confirm finished");
        report
    }

    async fn confirm_one(&self, tenant_id: TenantId, id: Uuid) -> Result<LinkOutcome, ReconcileError> {
        let suggestion = self
            .store
            .get_suggestion(tenant_id, id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("suggestion {id}")))?;
        if suggestion.status != SuggestionStatus::Pending {
            return Err(ReconcileError::ConstraintViolation(format!(
                "suggestion {id} is {}",
                suggestion.status.as_str()
            )));
        }

        let ctx = ApplyContext {
            tenant_id,
            source_domain: suggestion.subject_domain,
            run_started_at: Utc::now(),
        };
        let applied = self.apply(&ctx, &suggestion.result, &suggestion.candidate).await;
        let (status, result) = match applied {
            Ok(outcome @ LinkOutcome::Skipped {
                reason: SkipReason::Conflict | SkipReason::SelfLink | SkipReason::Unlinked,
            }) => (
                SuggestionStatus::Failed,
                Err(ReconcileError::ConstraintViolation(format!(
                    "suggestion {id} not linked: {}",
                    serde_json::to_string(&outcome).unwrap_or_default()
                ))),
            ),
            Ok(outcome) => (SuggestionStatus::Confirmed, Ok(outcome)),
            Err(err) => (SuggestionStatus::Failed, Err(err)),
        };
        self.store.set_suggestion_status(tenant_id, id, status).await?;
        result
    }

    /// Remove an edge; the tombstone keeps the current run from re-creating it.
    pub async fn unlink(&self, tenant_id: TenantId, edge_id: Uuid) -> Result<LinkEdge, ReconcileError> {
        let edge = self
            .store
            .delete_edge(tenant_id, edge_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(format!("edge {edge_id}")))?;
        info!(%tenant_id, %edge_id, "edge unlinked");
        Ok(edge)
    }
}

/// `(supplier, catalog)` when the pair crosses those two domains.
fn exclusive_pair<'a>(
    a: &'a ResolvedProduct,
    b: &'a ResolvedProduct,
) -> Option<(&'a ResolvedProduct, &'a ResolvedProduct)> {
    match (a.domain, b.domain) {
        (ProductDomain::SupplierProduct, ProductDomain::CatalogAnalysis) => Some((a, b)),
        (ProductDomain::CatalogAnalysis, ProductDomain::SupplierProduct) => Some((b, a)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlink_core::{
        MatchStrategyKind, PendingSuggestion, SourceKind,
    };
    use catlink_storage::MemoryStore;
    use serde_json::json;

    fn catalog_product(tenant: TenantId, name: &str, price: Option<f64>) -> ResolvedProduct {
        let now = Utc::now() - chrono::Duration::hours(1);
        ResolvedProduct {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            domain: ProductDomain::CatalogAnalysis,
            source_id: Some("catalog".to_string()),
            reference_code: None,
            ean: None,
            name: name.to_string(),
            brand: None,
            price,
            stock: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(tenant: TenantId, source_ref: &str, price: Option<f64>) -> CandidateRecord {
        CandidateRecord {
            tenant_id: tenant,
            source_kind: SourceKind::Spreadsheet,
            source_id: "supplier".to_string(),
            source_ref: source_ref.to_string(),
            name: format!("Widget {source_ref}"),
            brand: None,
            identifier_ean: None,
            identifier_code: None,
            price,
            stock: Some(4),
            raw_payload: json!({}),
        }
    }

    fn ctx(tenant: TenantId) -> ApplyContext {
        ApplyContext {
            tenant_id: tenant,
            source_domain: ProductDomain::SupplierProduct,
            run_started_at: Utc::now() - chrono::Duration::minutes(5),
        }
    }

    fn matched(target: Uuid, strategy: MatchStrategyKind, confidence: u8) -> MatchResult {
        MatchResult {
            target_id: target,
            strategy,
            confidence,
        }
    }

    async fn setup(products: Vec<ResolvedProduct>) -> (Arc<MemoryStore>, LinkGraphManager) {
        let store = Arc::new(MemoryStore::new());
        store.seed_products(products).await;
        let graph = LinkGraphManager::new(store.clone(), Arc::new(TracingAlertSink));
        (store, graph)
    }

    #[tokio::test]
    async fn apply_is_idempotent_and_monotonic() {
        let tenant = TenantId::new();
        let target = catalog_product(tenant, "Widget", None);
        let (store, graph) = setup(vec![target.clone()]).await;
        let cand = candidate(tenant, "1", None);

        let first = graph
            .apply(&ctx(tenant), &matched(target.id, MatchStrategyKind::Lexical, 80), &cand)
            .await
            .expect("apply");
        assert!(matches!(first, LinkOutcome::Created { .. }));

        let again = graph
            .apply(&ctx(tenant), &matched(target.id, MatchStrategyKind::Lexical, 80), &cand)
            .await
            .expect("apply");
        assert!(matches!(again, LinkOutcome::Updated { .. }));

        let lower = graph
            .apply(&ctx(tenant), &matched(target.id, MatchStrategyKind::Lexical, 76), &cand)
            .await
            .expect("apply");
        assert_eq!(
            lower,
            LinkOutcome::Skipped {
                reason: SkipReason::LowerConfidence
            }
        );

        let edges = store.list_edges(tenant).await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 80);
        assert!(edges[0].pair().contains(cand.subject_id(ProductDomain::SupplierProduct)));
    }

    #[tokio::test]
    async fn supplier_keeps_a_single_catalog_edge() {
        let tenant = TenantId::new();
        let first = catalog_product(tenant, "Widget", None);
        let second = catalog_product(tenant, "Widget Clone", None);
        let (store, graph) = setup(vec![first.clone(), second.clone()]).await;
        let cand = candidate(tenant, "1", None);

        graph
            .apply(&ctx(tenant), &matched(first.id, MatchStrategyKind::Exact, 100), &cand)
            .await
            .expect("apply");
        let outcome = graph
            .apply(&ctx(tenant), &matched(second.id, MatchStrategyKind::Exact, 100), &cand)
            .await
            .expect("apply");
        assert_eq!(outcome, LinkOutcome::Skipped { reason: SkipReason::Conflict });
        assert_eq!(store.list_edges(tenant).await.expect("edges").len(), 1);
    }

    #[tokio::test]
    async fn separate_managers_cannot_both_link_one_supplier() {
        let tenant = TenantId::new();
        let first = catalog_product(tenant, "Widget", None);
        let second = catalog_product(tenant, "Widget Clone", None);
        let (store, graph_a) = setup(vec![first.clone(), second.clone()]).await;
        // A second manager has its own lock, as another engine process would.
        let graph_b = LinkGraphManager::new(store.clone(), Arc::new(TracingAlertSink));
        let cand = candidate(tenant, "1", None);

        let (ctx_a, ctx_b) = (ctx(tenant), ctx(tenant));
        let matched_a = matched(first.id, MatchStrategyKind::Lexical, 90);
        let matched_b = matched(second.id, MatchStrategyKind::Lexical, 90);
        let (a, b) = tokio::join!(
            graph_a.apply(&ctx_a, &matched_a, &cand),
            graph_b.apply(&ctx_b, &matched_b, &cand),
        );
        let outcomes = [a.expect("apply a"), b.expect("apply b")];
        assert_eq!(outcomes.iter().filter(|o| o.is_linked()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| *o == LinkOutcome::Skipped { reason: SkipReason::Conflict }));
        assert_eq!(store.list_edges(tenant).await.expect("edges").len(), 1);
    }

    #[tokio::test]
    async fn unlinked_pairs_stay_unlinked_for_the_run() {
        let tenant = TenantId::new();
        let target = catalog_product(tenant, "Widget", None);
        let (_store, graph) = setup(vec![target.clone()]).await;
        let cand = candidate(tenant, "1", None);
        let result = matched(target.id, MatchStrategyKind::Exact, 100);

        let created = graph.apply(&ctx(tenant), &result, &cand).await.expect("apply");
        let edge = created.edge().cloned().expect("edge");
        graph.unlink(tenant, edge.id).await.expect("unlink");

        let again = graph.apply(&ctx(tenant), &result, &cand).await.expect("apply");
        assert_eq!(again, LinkOutcome::Skipped { reason: SkipReason::Unlinked });

        let next_run = ApplyContext {
            run_started_at: Utc::now() + chrono::Duration::seconds(1),
            ..ctx(tenant)
        };
        assert!(graph.apply(&next_run, &result, &cand).await.expect("apply").is_linked());

        assert!(matches!(
            graph.unlink(tenant, Uuid::new_v4()).await,
            Err(ReconcileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn price_changes_above_threshold_emit_alerts() {
        let tenant = TenantId::new();
        let big = catalog_product(tenant, "Widget", Some(100.0));
        let small = catalog_product(tenant, "Gadget", Some(100.0));
        let store = Arc::new(MemoryStore::new());
        store.seed_products(vec![big.clone(), small.clone()]).await;
        let (sink, mut rx) = ChannelAlertSink::new(8);
        let graph = LinkGraphManager::new(store.clone(), Arc::new(sink)).with_price_alert_pct(5.0);

        graph
            .apply(&ctx(tenant), &matched(big.id, MatchStrategyKind::Exact, 100), &candidate(tenant, "1", Some(110.0)))
            .await
            .expect("apply");
        graph
            .apply(&ctx(tenant), &matched(small.id, MatchStrategyKind::Exact, 100), &candidate(tenant, "2", Some(104.0)))
            .await
            .expect("apply");

        let event = rx.try_recv().expect("alert");
        assert_eq!(event.product_id, big.id);
        assert_eq!(event.old_price, 100.0);
        assert_eq!(event.new_price, 110.0);
        assert!(rx.try_recv().is_err());

        let updated = store.get_product(tenant, small.id).await.expect("get").expect("product");
        assert_eq!(updated.price, Some(104.0));
    }

    #[tokio::test]
    async fn full_alert_channel_does_not_fail_apply() {
        let tenant = TenantId::new();
        let a = catalog_product(tenant, "A", Some(10.0));
        let b = catalog_product(tenant, "B", Some(10.0));
        let store = Arc::new(MemoryStore::new());
        store.seed_products(vec![a.clone(), b.clone()]).await;
        let (sink, _rx) = ChannelAlertSink::new(1);
        let graph = LinkGraphManager::new(store, Arc::new(sink));

        for (target, source_ref) in [(&a, "1"), (&b, "2")] {
            let outcome = graph
                .apply(
                    &ctx(tenant),
                    &matched(target.id, MatchStrategyKind::Exact, 100),
                    &candidate(tenant, source_ref, Some(20.0)),
                )
                .await
                .expect("apply");
            assert!(outcome.is_linked());
        }
    }

    #[tokio::test]
    async fn batch_confirm_isolates_failures() {
        let tenant = TenantId::new();
        let target = catalog_product(tenant, "Widget", None);
        let (store, graph) = setup(vec![target.clone()]).await;
        let job_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for (source_ref, target_id) in [("1", target.id), ("2", Uuid::new_v4()), ("3", target.id)] {
            let cand = candidate(tenant, source_ref, None);
            let subject_id = cand.subject_id(ProductDomain::SupplierProduct);
            let suggestion = PendingSuggestion {
                id: PendingSuggestion::deterministic_id(job_id, subject_id, target_id),
                tenant_id: tenant,
                job_id,
                subject_domain: ProductDomain::SupplierProduct,
                candidate: cand,
                result: matched(target_id, MatchStrategyKind::Lexical, 82),
                alternatives: Vec::new(),
                status: SuggestionStatus::Pending,
                created_at: Utc::now(),
            };
            ids.push(suggestion.id);
            assert!(store.insert_suggestion(suggestion).await.expect("insert"));
        }
        ids.push(Uuid::new_v4());

        let report = graph.batch_confirm(tenant, &ids).await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 2);
        assert!(report.items[0].ok);
        assert!(!report.items[1].ok);
        assert!(report.items[2].ok);
        assert!(report.items[3].error.as_deref().unwrap_or_default().contains("not found"));

        let failed = store.get_suggestion(tenant, ids[1]).await.expect("get").expect("suggestion");
        assert_eq!(failed.status, SuggestionStatus::Failed);
        assert_eq!(store.list_edges(tenant).await.expect("edges").len(), 2);

        let replay = graph.batch_confirm(tenant, &ids[..1]).await;
        assert_eq!(replay.failed, 1);

        let other_tenant = graph.batch_confirm(TenantId::new(), &ids[2..3]).await;
        assert_eq!(other_tenant.failed, 1);
    }

    #[tokio::test]
    async fn concurrent_applies_converge_to_one_edge() {
        let tenant = TenantId::new();
        let target = catalog_product(tenant, "Widget", None);
        let (store, graph) = setup(vec![target.clone()]).await;
        let graph = Arc::new(graph);
        let cand = candidate(tenant, "1", None);

        let mut handles = Vec::new();
        for confidence in [76u8, 90, 80, 95, 100, 78, 85, 99] {
            let graph = graph.clone();
            let cand = cand.clone();
            let ctx = ctx(tenant);
            let strategy = if confidence == 100 {
                MatchStrategyKind::Exact
            } else {
                MatchStrategyKind::Lexical
            };
            let result = matched(target.id, strategy, confidence);
            handles.push(tokio::spawn(async move { graph.apply(&ctx, &result, &cand).await }));
        }
        for handle in handles {
            handle.await.expect("join").expect("apply");
        }

        let edges = store.list_edges(tenant).await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].confidence, 100);
        assert_eq!(edges[0].strategy, MatchStrategyKind::Exact);
    }
}
