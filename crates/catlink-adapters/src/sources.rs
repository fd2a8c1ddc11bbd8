use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catlink_core::{ReconcileError, SourceKind};
use catlink_storage::{HttpClientConfig, HttpError, JsonHttpClient};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};

use crate::normalize::{CatalogItem, SourceRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    pub rows: Vec<SourceRow>,
    pub has_more: bool,
    pub total_count: Option<u64>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("transient source failure: {0}")]
    Transient(String),
    #[error("source fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed source payload: {0}")]
    Malformed(String),
    #[error("source misconfigured: {0}")]
    Fatal(String),
}

impl From<SourceError> for ReconcileError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Fatal(msg) => ReconcileError::FatalConfig(msg),
            other => ReconcileError::TransientSource(other.to_string()),
        }
    }
}

/// Paged access to an external product source.
#[async_trait]
pub trait SourceCollaborator: Send + Sync {
    fn source_id(&self) -> &str;
    fn kind(&self) -> SourceKind;

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<SourcePage, SourceError>;
}

/// Interpret one JSON record according to the shape a source kind delivers.
pub fn row_from_json(kind: SourceKind, value: JsonValue) -> Result<SourceRow, SourceError> {
    match kind {
        SourceKind::Spreadsheet | SourceKind::Mailbox => {
            let JsonValue::Object(map) = value else {
                return Err(SourceError::Malformed("tabular row must be an object".to_string()));
            };
            let columns = map
                .into_iter()
                .filter_map(|(header, cell)| match cell {
                    JsonValue::Null => None,
                    JsonValue::String(s) => Some((header, s)),
                    other => Some((header, other.to_string())),
                })
                .collect::<BTreeMap<_, _>>();
            Ok(SourceRow::Tabular(columns))
        }
        SourceKind::Platform | SourceKind::Internal => Ok(SourceRow::Platform(value)),
        SourceKind::Marketplace => serde_json::from_value::<CatalogItem>(value)
            .map(SourceRow::Marketplace)
            .map_err(|e| SourceError::Malformed(e.to_string())),
    }
}

/// Like [`row_from_json`], but a record that cannot be decoded becomes
/// [`SourceRow::Invalid`] so only that row fails, not the page.
pub fn decode_row(kind: SourceKind, value: JsonValue) -> SourceRow {
    row_from_json(kind, value).unwrap_or_else(|err| SourceRow::Invalid(err.to_string()))
}

fn page_of(rows: &[SourceRow], offset: u64, limit: u32) -> SourcePage {
    let len = rows.len();
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
    let end = start.saturating_add(limit as usize).min(len);
    SourcePage {
        rows: rows[start..end].to_vec(),
        has_more: end < len,
        total_count: Some(len as u64),
    }
}

/// In-memory rows with injectable failures and latency.
#[derive(Debug)]
pub struct MemorySource {
    source_id: String,
    kind: SourceKind,
    rows: Vec<SourceRow>,
    delay: Option<Duration>,
    failures: Mutex<BTreeMap<u64, usize>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new(source_id: impl Into<String>, kind: SourceKind, rows: Vec<SourceRow>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            rows,
            delay: None,
            failures: Mutex::new(BTreeMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` fetches that start at `offset`.
    pub fn failing_at(mut self, offset: u64, times: usize) -> Self {
        self.failures.get_mut().insert(offset, times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn inject_failure(&self, offset: u64, times: usize) {
        self.failures.lock().await.insert(offset, times);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl SourceCollaborator for MemorySource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<SourcePage, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        {
            let mut failures = self.failures.lock().await;
            if let Some(remaining) = failures.get_mut(&offset) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::Transient(format!(
                        "injected failure at offset {offset}"
                    )));
                }
            }
        }
        Ok(page_of(&self.rows, offset, limit))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowsFile {
    Bare(Vec<JsonValue>),
    Wrapped { rows: Vec<JsonValue> },
}

/// Fixture file of rows (a JSON array, or `{ "rows": [...] }`), loaded once.
#[derive(Debug)]
pub struct JsonFileSource {
    source_id: String,
    kind: SourceKind,
    path: PathBuf,
    rows: OnceCell<Vec<SourceRow>>,
}

impl JsonFileSource {
    pub fn new(source_id: impl Into<String>, kind: SourceKind, path: impl AsRef<Path>) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            path: path.as_ref().to_path_buf(),
            rows: OnceCell::new(),
        }
    }

    async fn load(&self) -> Result<Vec<SourceRow>, SourceError> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Fatal(format!("reading {}: {e}", self.path.display())))?;
        let file: RowsFile = serde_json::from_str(&data)
            .map_err(|e| SourceError::Malformed(format!("parsing {}: {e}", self.path.display())))?;
        let values = match file {
            RowsFile::Bare(values) | RowsFile::Wrapped { rows: values } => values,
        };
        Ok(values.into_iter().map(|value| decode_row(self.kind, value)).collect())
    }
}

#[async_trait]
impl SourceCollaborator for JsonFileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<SourcePage, SourceError> {
        let rows = self.rows.get_or_try_init(|| self.load()).await?;
        Ok(page_of(rows, offset, limit))
    }
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(alias = "rows", alias = "data")]
    items: Vec<JsonValue>,
    #[serde(default)]
    has_more: Option<bool>,
    #[serde(default, alias = "total_count")]
    total: Option<u64>,
}

/// Generic JSON pager: `GET {url}?offset=&limit=` returning `{items, has_more?, total?}`.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    source_id: String,
    kind: SourceKind,
    url: String,
    client: JsonHttpClient,
}

impl HttpPageSource {
    pub fn new(
        source_id: impl Into<String>,
        kind: SourceKind,
        url: impl Into<String>,
        config: HttpClientConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            source_id: source_id.into(),
            kind,
            url: url.into(),
            client: JsonHttpClient::new(config)?,
        })
    }
}

/// Errors still transient after the client's own retries are left to the
/// job's retry policy; a rejected request means the source is misconfigured.
fn classify_http_error(err: HttpError) -> SourceError {
    match err {
        HttpError::Undecodable { .. } => SourceError::Malformed(err.to_string()),
        err if err.is_transient() => SourceError::Transient(err.to_string()),
        err => SourceError::Fatal(err.to_string()),
    }
}

#[async_trait]
impl SourceCollaborator for HttpPageSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch_page(&self, offset: u64, limit: u32) -> Result<SourcePage, SourceError> {
        let query = [("offset", offset.to_string()), ("limit", limit.to_string())];
        let envelope: PageEnvelope = self
            .client
            .get_json(&self.url, &query)
            .await
            .map_err(classify_http_error)?;

        let fetched = envelope.items.len();
        let rows = envelope
            .items
            .into_iter()
            .map(|value| decode_row(self.kind, value))
            .collect();
        Ok(SourcePage {
            rows,
            has_more: envelope.has_more.unwrap_or(fetched >= limit as usize && fetched > 0),
            total_count: envelope.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tabular_rows(n: usize) -> Vec<SourceRow> {
        (0..n)
            .map(|i| {
                row_from_json(SourceKind::Spreadsheet, json!({ "name": format!("Item {i}"), "sku": i }))
                    .expect("row")
            })
            .collect()
    }

    #[tokio::test]
    async fn memory_source_pages_and_reports_total() {
        let source = MemorySource::new("sheet", SourceKind::Spreadsheet, tabular_rows(5));

        let first = source.fetch_page(0, 2).await.expect("page");
        assert_eq!(first.rows.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.total_count, Some(5));

        let last = source.fetch_page(4, 2).await.expect("page");
        assert_eq!(last.rows.len(), 1);
        assert!(!last.has_more);

        let past_end = source.fetch_page(9, 2).await.expect("page");
        assert!(past_end.rows.is_empty());
        assert_eq!(source.fetch_count(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let source = MemorySource::new("sheet", SourceKind::Spreadsheet, tabular_rows(4)).failing_at(2, 1);

        assert!(source.fetch_page(0, 2).await.is_ok());
        assert!(matches!(source.fetch_page(2, 2).await, Err(SourceError::Transient(_))));
        assert_eq!(source.fetch_page(2, 2).await.expect("retry").rows.len(), 2);
    }

    #[test]
    fn tabular_rows_stringify_scalars() {
        let row = row_from_json(SourceKind::Mailbox, json!({"ean": 4006381333931u64, "note": null}))
            .expect("row");
        let SourceRow::Tabular(columns) = row else {
            panic!("expected tabular row");
        };
        assert_eq!(columns.get("ean").map(String::as_str), Some("4006381333931"));
        assert!(!columns.contains_key("note"));

        assert!(matches!(
            row_from_json(SourceKind::Spreadsheet, json!(["not", "an", "object"])),
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn json_file_source_reads_wrapped_fixture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "rows": [
                    {"item_id": "A", "title": "Widget", "price": 10.0},
                    {"item_id": "B", "title": "Gadget"}
                ]
            }))
            .expect("json"),
        )
        .expect("write");

        let source = JsonFileSource::new("market", SourceKind::Marketplace, &path);
        let page = source.fetch_page(1, 10).await.expect("page");
        assert_eq!(page.rows.len(), 1);
        assert!(matches!(&page.rows[0], SourceRow::Marketplace(item) if item.item_id == "B"));
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn undecodable_records_fail_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rows.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!([
                {"Name": "Widget"},
                ["not", "an", "object"],
                {"Name": "Gadget"}
            ]))
            .expect("json"),
        )
        .expect("write");

        let source = JsonFileSource::new("sheet", SourceKind::Spreadsheet, &path);
        let page = source.fetch_page(0, 10).await.expect("page");
        assert_eq!(page.rows.len(), 3);
        assert!(matches!(&page.rows[0], SourceRow::Tabular(_)));
        assert!(matches!(&page.rows[1], SourceRow::Invalid(reason) if reason.contains("object")));
        assert!(matches!(&page.rows[2], SourceRow::Tabular(_)));
    }

    #[test]
    fn http_rejections_are_fatal_unless_transient() {
        let rejected = |status| HttpError::Rejected {
            url: "http://supplier.test/items".to_string(),
            status,
            retry_after: None,
        };
        assert!(matches!(classify_http_error(rejected(404)), SourceError::Fatal(_)));
        assert!(matches!(classify_http_error(rejected(401)), SourceError::Fatal(_)));
        assert!(matches!(classify_http_error(rejected(429)), SourceError::Transient(_)));
        assert!(matches!(classify_http_error(rejected(503)), SourceError::Transient(_)));
    }

    #[tokio::test]
    async fn missing_fixture_file_is_fatal() {
        let source = JsonFileSource::new("sheet", SourceKind::Spreadsheet, "/nonexistent/rows.json");
        assert!(matches!(source.fetch_page(0, 1).await, Err(SourceError::Fatal(_))));
    }
}
