//! Ordered match cascade: identifier, reference, lexical, optional semantic.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catlink_core::{
    CandidateRecord, Gtin, MatchResult, MatchStrategyKind, ProductDomain, RankedProduct, ResolvedProduct,
    Resolution, TenantId, EXACT_CONFIDENCE, REFERENCE_CONFIDENCE,
};
use catlink_storage::{HttpClientConfig, HttpError, JsonHttpClient, ReconcileStore, RetrySchedule, StoreResult};
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_SEMANTIC_CANDIDATES: usize = 20;
const SNAPSHOT_PAGE_SIZE: u32 = 500;

/// Per-chunk view of one tenant's products in the target domain.
///
/// The product list feeds the fuzzy stages and is capped at the scan limit.
/// Identifier and reference lookups of a loaded snapshot go to the store, so
/// they see the whole catalog regardless of that cap.
#[derive(Clone)]
pub struct CatalogSnapshot {
    tenant_id: TenantId,
    domain: ProductDomain,
    products: Vec<ResolvedProduct>,
    by_gtin: HashMap<Gtin, Vec<usize>>,
    by_reference: HashMap<(String, String), Vec<usize>>,
    truncated: bool,
    store: Option<Arc<dyn ReconcileStore>>,
}

impl CatalogSnapshot {
    pub fn new(tenant_id: TenantId, domain: ProductDomain, products: Vec<ResolvedProduct>) -> Self {
        let mut by_gtin: HashMap<Gtin, Vec<usize>> = HashMap::new();
        let mut by_reference: HashMap<(String, String), Vec<usize>> = HashMap::new();
        for (idx, product) in products.iter().enumerate() {
            if let Some(gtin) = product.gtin() {
                by_gtin.entry(gtin).or_default().push(idx);
            }
            if let (Some(source_id), Some(code)) = (&product.source_id, &product.reference_code) {
                let code = code.trim();
                if !code.is_empty() {
                    by_reference
                        .entry((source_id.clone(), code.to_string()))
                        .or_default()
                        .push(idx);
                }
            }
        }
        Self {
            tenant_id,
            domain,
            products,
            by_gtin,
            by_reference,
            truncated: false,
            store: None,
        }
    }

    /// Read bounded pages from the store until `max_scan` products are held.
    pub async fn load(
        store: Arc<dyn ReconcileStore>,
        tenant_id: TenantId,
        domain: ProductDomain,
        max_scan: u64,
    ) -> StoreResult<Self> {
        let mut products = Vec::new();
        let mut offset = 0u64;
        let mut truncated = false;
        loop {
            let remaining = max_scan.saturating_sub(offset);
            if remaining == 0 {
                truncated = !store.list_products(tenant_id, domain, offset, 1).await?.is_empty();
                break;
            }
            let limit = SNAPSHOT_PAGE_SIZE.min(u32::try_from(remaining).unwrap_or(u32::MAX));
            let page = store.list_products(tenant_id, domain, offset, limit).await?;
            let fetched = page.len() as u64;
            products.extend(page);
            offset += fetched;
            if fetched < u64::from(limit) {
                break;
            }
        }
        if truncated {
            warn!(%tenant_id, %domain, max_scan, "catalog snapshot truncated at scan limit");
        }
        let mut snapshot = Self::new(tenant_id, domain, products);
        snapshot.truncated = truncated;
        snapshot.store = Some(store);
        Ok(snapshot)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn domain(&self) -> ProductDomain {
        self.domain
    }

    pub fn products(&self) -> &[ResolvedProduct] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// True when the catalog held more products than the fuzzy scan limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub async fn identifier_matches(&self, gtin: &Gtin) -> StoreResult<Vec<ResolvedProduct>> {
        match &self.store {
            Some(store) => store.find_by_identifier(self.tenant_id, self.domain, gtin).await,
            None => Ok(self.indexed(self.by_gtin.get(gtin)).cloned().collect()),
        }
    }

    pub async fn reference_matches(&self, source_id: &str, code: &str) -> StoreResult<Vec<ResolvedProduct>> {
        match &self.store {
            Some(store) => {
                store
                    .find_by_reference(self.tenant_id, self.domain, source_id, code)
                    .await
            }
            None => {
                let key = (source_id.to_string(), code.trim().to_string());
                Ok(self.indexed(self.by_reference.get(&key)).cloned().collect())
            }
        }
    }

    fn indexed<'a>(&'a self, idxs: Option<&'a Vec<usize>>) -> impl Iterator<Item = &'a ResolvedProduct> {
        idxs.into_iter()
            .flatten()
            .filter_map(|idx| self.products.get(*idx))
    }
}

/// Deterministic preference among equally scored products: most recently
/// updated first, then lowest id.
fn preference(a: &ResolvedProduct, b: &ResolvedProduct) -> Ordering {
    a.updated_at.cmp(&b.updated_at).then_with(|| b.id.cmp(&a.id))
}

fn preferred<'a>(products: impl Iterator<Item = &'a ResolvedProduct>) -> Option<&'a ResolvedProduct> {
    products.max_by(|a, b| preference(a, b))
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Lowercase, fold common accents, keep ASCII alphanumerics as single-spaced tokens.
pub fn normalize_text(input: &str) -> String {
    input
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_char)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// `brand + name`, without repeating a brand the name already starts with.
pub fn lexical_text(name: &str, brand: Option<&str>) -> String {
    let name = normalize_text(name);
    match brand.map(normalize_text).filter(|b| !b.is_empty()) {
        Some(brand) if name != brand && !name.starts_with(&format!("{brand} ")) => {
            format!("{brand} {name}")
        }
        _ => name,
    }
}

pub fn lexical_score(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    (normalized_levenshtein(a, b) * 100.0).round().clamp(0.0, 100.0) as u8
}

fn candidate_text(candidate: &CandidateRecord) -> String {
    lexical_text(&candidate.name, candidate.brand.as_deref())
}

fn product_text(product: &ResolvedProduct) -> String {
    lexical_text(&product.name, product.brand.as_deref())
}

fn scored<'a>(candidate: &CandidateRecord, catalog: &'a CatalogSnapshot) -> Vec<(u8, &'a ResolvedProduct)> {
    let text = candidate_text(candidate);
    let mut scored: Vec<_> = catalog
        .products()
        .iter()
        .map(|product| (lexical_score(&text, &product_text(product)), product))
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| preference(b, a)));
    scored
}

#[async_trait]
pub trait MatchStrategy: Send + Sync {
    fn kind(&self) -> MatchStrategyKind;

    /// Minimum confidence a result must reach for the cascade to stop here.
    fn floor(&self, threshold: u8) -> u8;

    /// `Ok(None)` means no match at this stage; errors are store failures only.
    async fn attempt(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        threshold: u8,
    ) -> StoreResult<Option<MatchResult>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExactIdentifierStrategy;

#[async_trait]
impl MatchStrategy for ExactIdentifierStrategy {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Exact
    }

    fn floor(&self, _threshold: u8) -> u8 {
        EXACT_CONFIDENCE
    }

    async fn attempt(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        _threshold: u8,
    ) -> StoreResult<Option<MatchResult>> {
        let gtin = match candidate.identifier_ean.as_deref() {
            Some(raw) => match Gtin::parse(raw) {
                Ok(gtin) => gtin,
                Err(err) => {
                    debug!(source_ref = %candidate.source_ref, error = %err, "ignoring identifier");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };
        let found = catalog.identifier_matches(&gtin).await?;
        Ok(preferred(found.iter()).map(|product| MatchResult {
            target_id: product.id,
            strategy: MatchStrategyKind::Exact,
            confidence: EXACT_CONFIDENCE,
        }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceStrategy;

#[async_trait]
impl MatchStrategy for ReferenceStrategy {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Reference
    }

    fn floor(&self, _threshold: u8) -> u8 {
        REFERENCE_CONFIDENCE
    }

    async fn attempt(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        _threshold: u8,
    ) -> StoreResult<Option<MatchResult>> {
        let code = match candidate.identifier_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code,
            _ => return Ok(None),
        };
        let found = catalog.reference_matches(&candidate.source_id, code).await?;
        Ok(preferred(found.iter()).map(|product| MatchResult {
            target_id: product.id,
            strategy: MatchStrategyKind::Reference,
            confidence: REFERENCE_CONFIDENCE,
        }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalStrategy;

#[async_trait]
impl MatchStrategy for LexicalStrategy {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Lexical
    }

    fn floor(&self, threshold: u8) -> u8 {
        threshold
    }

    async fn attempt(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        threshold: u8,
    ) -> StoreResult<Option<MatchResult>> {
        Ok(scored(candidate, catalog)
            .into_iter()
            .next()
            .filter(|(score, _)| *score >= threshold)
            .map(|(score, product)| MatchResult {
                target_id: product.id,
                strategy: MatchStrategyKind::Lexical,
                confidence: score,
            }))
    }
}

#[derive(Debug, Error)]
pub enum SemanticError {
    #[error("semantic comparison failed: {0}")]
    Http(#[from] HttpError),
    #[error("semantic comparison timed out after {0:?}")]
    Timeout(Duration),
    #[error("semantic service returned an unusable score: {0}")]
    InvalidScore(String),
}

/// Scores textual similarity between two product descriptions, 0..=100.
#[async_trait]
pub trait SemanticComparer: Send + Sync {
    async fn compare(&self, a: &str, b: &str) -> Result<u8, SemanticError>;
}

#[derive(Debug, Serialize)]
struct CompareRequest<'a> {
    text_a: &'a str,
    text_b: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    score: f64,
}

/// Posts `{text_a, text_b}` to an external similarity service with a bearer key.
#[derive(Debug, Clone)]
pub struct HttpSemanticComparer {
    url: String,
    client: JsonHttpClient,
}

impl HttpSemanticComparer {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = JsonHttpClient::new(HttpClientConfig {
            timeout,
            bearer_token: Some(api_key.into()),
            retry: RetrySchedule::single_attempt(),
            ..Default::default()
        })?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl SemanticComparer for HttpSemanticComparer {
    async fn compare(&self, a: &str, b: &str) -> Result<u8, SemanticError> {
        let response: CompareResponse = self
            .client
            .post_json(&self.url, &CompareRequest { text_a: a, text_b: b })
            .await?;
        if !response.score.is_finite() {
            return Err(SemanticError::InvalidScore(response.score.to_string()));
        }
        Ok(response.score.round().clamp(0.0, 100.0) as u8)
    }
}

pub struct SemanticStrategy {
    comparer: Arc<dyn SemanticComparer>,
    max_candidates: usize,
    timeout: Duration,
}

impl SemanticStrategy {
    pub fn new(comparer: Arc<dyn SemanticComparer>, max_candidates: usize, timeout: Duration) -> Self {
        Self {
            comparer,
            max_candidates,
            timeout,
        }
    }
}

#[async_trait]
impl MatchStrategy for SemanticStrategy {
    fn kind(&self) -> MatchStrategyKind {
        MatchStrategyKind::Semantic
    }

    fn floor(&self, threshold: u8) -> u8 {
        threshold
    }

    async fn attempt(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        threshold: u8,
    ) -> StoreResult<Option<MatchResult>> {
        let text = candidate_text(candidate);
        let mut best: Option<(u8, &ResolvedProduct)> = None;

        for (_, product) in scored(candidate, catalog).into_iter().take(self.max_candidates) {
            let other = product_text(product);
            let score = match tokio::time::timeout(self.timeout, self.comparer.compare(&text, &other)).await {
                Ok(Ok(score)) => score.min(100),
                Ok(Err(err)) => {
                    warn!(source_ref = %candidate.source_ref, error = %err, "semantic comparison skipped");
                    continue;
                }
                Err(_) => {
                    warn!(
                        source_ref = %candidate.source_ref,
                        error = %SemanticError::Timeout(self.timeout),
                        "semantic comparison skipped"
                    );
                    continue;
                }
            };
            if score < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, best_product)) => {
                    score > best_score || (score == best_score && preference(product, best_product).is_gt())
                }
            };
            if better {
                best = Some((score, product));
            }
        }

        Ok(best.map(|(score, product)| MatchResult {
            target_id: product.id,
            strategy: MatchStrategyKind::Semantic,
            confidence: score,
        }))
    }
}

/// Runs strategies in order until one clears its floor.
pub struct MatcherCascade {
    stages: Vec<Box<dyn MatchStrategy>>,
}

impl Default for MatcherCascade {
    fn default() -> Self {
        Self {
            stages: vec![
                Box::new(ExactIdentifierStrategy),
                Box::new(ReferenceStrategy),
                Box::new(LexicalStrategy),
            ],
        }
    }
}

impl MatcherCascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_semantic(mut self, comparer: Arc<dyn SemanticComparer>, max_candidates: usize, timeout: Duration) -> Self {
        self.stages
            .push(Box::new(SemanticStrategy::new(comparer, max_candidates, timeout)));
        self
    }

    pub fn stage_kinds(&self) -> Vec<MatchStrategyKind> {
        self.stages.iter().map(|stage| stage.kind()).collect()
    }

    pub async fn resolve(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        threshold: u8,
    ) -> StoreResult<Resolution> {
        for stage in &self.stages {
            if let Some(result) = stage.attempt(candidate, catalog, threshold).await? {
                if result.confidence >= stage.floor(threshold) {
                    return Ok(Resolution::Matched(result));
                }
            }
        }
        Ok(Resolution::NoMatch)
    }

    /// Best lexical alternatives to `chosen`, stored with suggestions for review.
    pub fn rank(
        &self,
        candidate: &CandidateRecord,
        catalog: &CatalogSnapshot,
        chosen: Uuid,
        limit: usize,
    ) -> Vec<RankedProduct> {
        scored(candidate, catalog)
            .into_iter()
            .filter(|(_, product)| product.id != chosen)
            .take(limit)
            .map(|(score, product)| RankedProduct {
                product_id: product.id,
                name: product.name.clone(),
                score,
            })
            .collect()
    }
}
