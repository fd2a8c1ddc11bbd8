//! Core domain model, identifiers and error taxonomy for catlink.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "catlink-core";

/// Confidence assigned to identifier (GTIN) equality.
pub const EXACT_CONFIDENCE: u8 = 100;
/// Confidence assigned to same-source reference code equality.
pub const REFERENCE_CONFIDENCE: u8 = 95;
pub const DEFAULT_LEXICAL_THRESHOLD: u8 = 75;
pub const DEFAULT_PRICE_ALERT_PCT: f64 = 5.0;

/// Tenant scope carried explicitly through every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Spreadsheet,
    Platform,
    Marketplace,
    Mailbox,
    Internal,
}

impl SourceKind {
    /// Rows per chunk when a job does not set one explicitly.
    pub fn default_chunk_size(self) -> u32 {
        match self {
            SourceKind::Platform | SourceKind::Marketplace | SourceKind::Internal => 1000,
            SourceKind::Spreadsheet | SourceKind::Mailbox => 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductDomain {
    SupplierProduct,
    CatalogAnalysis,
    MarketplaceListing,
}

impl ProductDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductDomain::SupplierProduct => "supplier_product",
            ProductDomain::CatalogAnalysis => "catalog_analysis",
            ProductDomain::MarketplaceListing => "marketplace_listing",
        }
    }
}

impl fmt::Display for ProductDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductDomain {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "supplier_product" => Ok(ProductDomain::SupplierProduct),
            "catalog_analysis" => Ok(ProductDomain::CatalogAnalysis),
            "marketplace_listing" => Ok(ProductDomain::MarketplaceListing),
            other => Err(ReconcileError::FatalConfig(format!("unknown product domain {other}"))),
        }
    }
}

/// A GTIN (EAN-8, UPC-A, EAN-13, GTIN-14) that passed its check digit,
/// stored in 14-digit form so equivalent encodings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gtin(String);

impl Gtin {
    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        let digits: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        let invalid = || ReconcileError::InvalidIdentifier(raw.to_string());

        if !matches!(digits.len(), 8 | 12 | 13 | 14) || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let values: Vec<u32> = digits.bytes().map(|b| u32::from(b - b'0')).collect();
        let (body, check) = values.split_at(values.len() - 1);
        // Weights alternate 3,1,... starting from the digit next to the check digit.
        let sum: u32 = body
            .iter()
            .rev()
            .enumerate()
            .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
            .sum();
        if (10 - sum % 10) % 10 != check[0] {
            return Err(invalid());
        }

        Ok(Self(format!("{digits:0>14}")))
    }

    /// Parse leniently: anything that fails validation is treated as absent.
    pub fn parse_opt(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|r| Self::parse(r).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A not-yet-reconciled row produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub tenant_id: TenantId,
    pub source_kind: SourceKind,
    pub source_id: String,
    pub source_ref: String,
    pub name: String,
    pub brand: Option<String>,
    pub identifier_ean: Option<String>,
    pub identifier_code: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub raw_payload: JsonValue,
}

impl CandidateRecord {
    pub fn gtin(&self) -> Option<Gtin> {
        Gtin::parse_opt(self.identifier_ean.as_deref())
    }

    /// Deterministic id of the product this candidate materializes as in `domain`.
    pub fn subject_id(&self, domain: ProductDomain) -> Uuid {
        promoted_product_id(self.tenant_id, domain, &self.source_id, &self.source_ref)
    }
}

pub fn promoted_product_id(
    tenant_id: TenantId,
    domain: ProductDomain,
    source_id: &str,
    source_ref: &str,
) -> Uuid {
    let key = format!("product:{tenant_id}:{domain}:{source_id}:{source_ref}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// Persisted product node in one of the three domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedProduct {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub domain: ProductDomain,
    pub source_id: Option<String>,
    pub reference_code: Option<String>,
    pub ean: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResolvedProduct {
    pub fn gtin(&self) -> Option<Gtin> {
        Gtin::parse_opt(self.ean.as_deref())
    }

    /// Promote a candidate into a new product node of `domain`.
    pub fn from_candidate(candidate: &CandidateRecord, domain: ProductDomain, now: DateTime<Utc>) -> Self {
        Self {
            id: candidate.subject_id(domain),
            tenant_id: candidate.tenant_id,
            domain,
            source_id: Some(candidate.source_id.clone()),
            reference_code: candidate.identifier_code.clone(),
            ean: candidate.gtin().map(|g| g.as_str().to_string()),
            name: candidate.name.clone(),
            brand: candidate.brand.clone(),
            price: candidate.price,
            stock: candidate.stock,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Field updates applied to an existing product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    pub price: Option<f64>,
    pub stock: Option<i64>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.stock.is_none()
    }
}

/// Unordered product pair, normalized so `low < high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub low: Uuid,
    pub high: Uuid,
}

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.low == id || self.high == id
    }

    pub fn other(&self, id: Uuid) -> Option<Uuid> {
        if self.low == id {
            Some(self.high)
        } else if self.high == id {
            Some(self.low)
        } else {
            None
        }
    }

    pub fn is_self_link(&self) -> bool {
        self.low == self.high
    }

    /// One edge id per pair per tenant.
    pub fn edge_id(&self, tenant_id: TenantId) -> Uuid {
        let key = format!("edge:{tenant_id}:{}:{}", self.low, self.high);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategyKind {
    Exact,
    Reference,
    Lexical,
    Semantic,
    Manual,
}

impl MatchStrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategyKind::Exact => "exact",
            MatchStrategyKind::Reference => "reference",
            MatchStrategyKind::Lexical => "lexical",
            MatchStrategyKind::Semantic => "semantic",
            MatchStrategyKind::Manual => "manual",
        }
    }

    pub fn is_automatic(self) -> bool {
        self != MatchStrategyKind::Manual
    }
}

impl fmt::Display for MatchStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategyKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchStrategyKind::Exact),
            "reference" => Ok(MatchStrategyKind::Reference),
            "lexical" => Ok(MatchStrategyKind::Lexical),
            "semantic" => Ok(MatchStrategyKind::Semantic),
            "manual" => Ok(MatchStrategyKind::Manual),
            other => Err(ReconcileError::Storage(format!("unknown strategy {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub target_id: Uuid,
    pub strategy: MatchStrategyKind,
    pub confidence: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Matched(MatchResult),
    NoMatch,
}

impl Resolution {
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            Resolution::Matched(result) => Some(result),
            Resolution::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEdge {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub left_id: Uuid,
    pub right_id: Uuid,
    pub strategy: MatchStrategyKind,
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkEdge {
    pub fn new(
        tenant_id: TenantId,
        pair: PairKey,
        strategy: MatchStrategyKind,
        confidence: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: pair.edge_id(tenant_id),
            tenant_id,
            left_id: pair.low,
            right_id: pair.high,
            strategy,
            confidence: confidence.min(100),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.left_id, self.right_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionPolicy {
    /// Promote unmatched candidates into new products and apply matches directly.
    Strict,
    /// Store matches as pending suggestions; leave unmatched candidates unlinked.
    Suggestion,
}

impl FromStr for IngestionPolicy {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "strict" => Ok(IngestionPolicy::Strict),
            "suggestion" => Ok(IngestionPolicy::Suggestion),
            other => Err(ReconcileError::FatalConfig(format!("unknown ingestion policy {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Paused and failed jobs re-enter the loop at their checkpoint.
    pub fn is_resumable(self) -> bool {
        matches!(self, JobStatus::Paused | JobStatus::Failed | JobStatus::Queued)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" | "pending" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ReconcileError::Storage(format!("unknown job status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub seen: u64,
    pub matched: u64,
    pub created: u64,
    pub suggested: u64,
    pub skipped: u64,
    pub errored: u64,
}

impl JobCounts {
    pub fn absorb(&mut self, other: &JobCounts) {
        self.seen += other.seen;
        self.matched += other.matched;
        self.created += other.created;
        self.suggested += other.suggested;
        self.skipped += other.skipped;
        self.errored += other.errored;
    }
}

/// Everything a job needs to run; persisted so a resume can rebuild it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_id: Uuid,
    pub tenant_id: TenantId,
    pub source_id: String,
    pub source_domain: ProductDomain,
    pub target_domain: ProductDomain,
    pub policy: IngestionPolicy,
    pub chunk_size: u32,
    pub lexical_threshold: u8,
    pub created_at: DateTime<Utc>,
}

/// Durable progress marker appended after every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: Uuid,
    pub tenant_id: TenantId,
    pub source_offset: u64,
    pub chunk_size: u32,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub total: Option<u64>,
    pub last_error: Option<String>,
    pub error_samples: Vec<String>,
    /// Set once any chunk scanned a catalog larger than the fuzzy scan limit.
    #[serde(default)]
    pub catalog_truncated: bool,
    pub recorded_at: DateTime<Utc>,
}

impl JobCheckpoint {
    pub fn initial(spec: &JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            job_id: spec.job_id,
            tenant_id: spec.tenant_id,
            source_offset: 0,
            chunk_size: spec.chunk_size,
            status: JobStatus::Queued,
            counts: JobCounts::default(),
            total: None,
            last_error: None,
            error_samples: Vec::new(),
            catalog_truncated: false,
            recorded_at: now,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.counts.seen as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Confirmed,
    Rejected,
    Failed,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Confirmed => "confirmed",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Failed => "failed",
        }
    }
}

impl FromStr for SuggestionStatus {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SuggestionStatus::Pending),
            "confirmed" => Ok(SuggestionStatus::Confirmed),
            "rejected" => Ok(SuggestionStatus::Rejected),
            "failed" => Ok(SuggestionStatus::Failed),
            other => Err(ReconcileError::Storage(format!("unknown suggestion status {other}"))),
        }
    }
}

/// A catalog product scored lexically against a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedProduct {
    pub product_id: Uuid,
    pub name: String,
    pub score: u8,
}

/// A match awaiting manual confirmation (suggestion-mode ingestion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSuggestion {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub job_id: Uuid,
    pub subject_domain: ProductDomain,
    pub candidate: CandidateRecord,
    pub result: MatchResult,
    /// Best lexical alternatives at suggestion time, highest score first.
    #[serde(default)]
    pub alternatives: Vec<RankedProduct>,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingSuggestion {
    /// Suggestions are keyed by job + subject + target so a resumed chunk
    /// cannot queue the same suggestion twice.
    pub fn deterministic_id(job_id: Uuid, subject_id: Uuid, target_id: Uuid) -> Uuid {
        let key = format!("suggestion:{job_id}:{subject_id}:{target_id}");
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub tenant_id: TenantId,
    pub product_id: Uuid,
    pub edge_id: Option<Uuid>,
    pub old_price: f64,
    pub new_price: f64,
    pub change_pct: f64,
    pub emitted_at: DateTime<Utc>,
}

/// Absolute percentage change; `None` when the old price is zero or absent.
pub fn price_change_pct(old: Option<f64>, new: f64) -> Option<f64> {
    match old {
        Some(old) if old > 0.0 => Some(((new - old) / old * 100.0).abs()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),
    /// A source row that cannot become a candidate (undecodable, or no name).
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("transient source error: {0}")]
    TransientSource(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ean13_with_valid_check_digit_parses() {
        let gtin = Gtin::parse("4006381333931").expect("valid ean");
        assert_eq!(gtin.as_str(), "04006381333931");
    }

    #[test]
    fn invalid_check_digits_are_rejected() {
        for raw in ["4006381333932", "4006381333930", "12345", "40063813339x1", ""] {
            assert!(
                matches!(Gtin::parse(raw), Err(ReconcileError::InvalidIdentifier(_))),
                "{raw} should be invalid"
            );
        }
    }

    #[test]
    fn upc_and_ean_forms_compare_equal() {
        let upc = Gtin::parse("036000291452").expect("upc");
        let ean = Gtin::parse("0036000291452").expect("ean");
        assert_eq!(upc, ean);
        assert!(Gtin::parse("96385074").is_ok());
        assert!(Gtin::parse("4006-3813-3393-1").is_ok());
    }

    #[test]
    fn pair_key_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tenant = TenantId::new();
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert_eq!(PairKey::new(a, b).edge_id(tenant), PairKey::new(b, a).edge_id(tenant));
        assert_ne!(PairKey::new(a, b).edge_id(tenant), PairKey::new(a, b).edge_id(TenantId::new()));
        assert_eq!(PairKey::new(a, b).other(a), Some(b));
    }

    #[test]
    fn promoted_ids_are_stable_per_tenant_and_domain() {
        let tenant = TenantId::new();
        let first = promoted_product_id(tenant, ProductDomain::SupplierProduct, "feed", "sku-1");
        let again = promoted_product_id(tenant, ProductDomain::SupplierProduct, "feed", "sku-1");
        let other_domain = promoted_product_id(tenant, ProductDomain::MarketplaceListing, "feed", "sku-1");
        assert_eq!(first, again);
        assert_ne!(first, other_domain);
    }

    #[test]
    fn price_change_pct_handles_zero_and_direction() {
        assert_eq!(price_change_pct(Some(100.0), 90.0), Some(10.0));
        assert_eq!(price_change_pct(Some(100.0), 110.0), Some(10.0));
        assert_eq!(price_change_pct(Some(0.0), 10.0), None);
        assert_eq!(price_change_pct(None, 10.0), None);
    }

    #[test]
    fn pending_status_alias_deserializes_as_queued() {
        let status: JobStatus = serde_json::from_str("\"pending\"").expect("status");
        assert_eq!(status, JobStatus::Queued);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"queued\"");
    }
}
