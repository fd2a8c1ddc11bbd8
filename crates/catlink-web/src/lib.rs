//! Axum JSON control surface for ingestion jobs, suggestions and links.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use catlink_core::{LinkEdge, PendingSuggestion, ReconcileError, SuggestionStatus, TenantId};
use catlink_storage::ReconcileStore;
use catlink_sync::{BatchConfirmReport, Engine, JobRequest, JobState, SyncConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "catlink-web";
pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        let status = match &err {
            ReconcileError::InvalidIdentifier(_) | ReconcileError::InvalidRow(_) => StatusCode::BAD_REQUEST,
            ReconcileError::NotFound(_) => StatusCode::NOT_FOUND,
            ReconcileError::ConstraintViolation(_) => StatusCode::CONFLICT,
            ReconcileError::FatalConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ReconcileError::TransientSource(_) => StatusCode::BAD_GATEWAY,
            ReconcileError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct JobView {
    #[serde(flatten)]
    state: JobState,
    progress: Option<f64>,
}

impl From<JobState> for JobView {
    fn from(state: JobState) -> Self {
        Self {
            progress: state.progress(),
            state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionsQuery {
    status: Option<SuggestionStatus>,
    job_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct BatchConfirmRequest {
    suggestion_ids: Vec<Uuid>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/jobs", post(start_job_handler).get(list_jobs_handler))
        .route("/jobs/{id}", get(job_status_handler))
        .route("/jobs/{id}/pause", post(pause_job_handler))
        .route("/jobs/{id}/resume", post(resume_job_handler))
        .route("/suggestions", get(suggestions_handler))
        .route("/links", get(links_handler))
        .route("/links/batch-confirm", post(batch_confirm_handler))
        .route("/links/{id}", delete(unlink_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(engine: Arc<Engine>) -> anyhow::Result<()> {
    let port = engine.config().web_port;
    let scheduler = engine.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %engine.config().sync_cron, "scheduler started");
    }
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "catlink web listening");
    axum::serve(listener, app(AppState::new(engine))).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let engine = Engine::from_config(SyncConfig::from_env()).await?;
    serve(Arc::new(engine)).await
}

fn tenant(headers: &HeaderMap) -> ApiResult<TenantId> {
    let raw = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("missing {TENANT_HEADER} header")))?;
    raw.parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid {TENANT_HEADER} header")))
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn start_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<JobRequest>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let tenant_id = tenant(&headers)?;
    let job = state.engine.start_job(tenant_id, &request).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<JobView>>> {
    let tenant_id = tenant(&headers)?;
    let jobs = state.engine.supervisor().list(tenant_id).await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

async fn job_status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(job_id): AxumPath<Uuid>,
) -> ApiResult<Json<JobView>> {
    let tenant_id = tenant(&headers)?;
    let job = state
        .engine
        .supervisor()
        .status(tenant_id, job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("job {job_id} not found")))?;
    Ok(Json(job.into()))
}

async fn pause_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(job_id): AxumPath<Uuid>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let tenant_id = tenant(&headers)?;
    let job = state.engine.supervisor().pause(tenant_id, job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn resume_job_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(job_id): AxumPath<Uuid>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let tenant_id = tenant(&headers)?;
    let job = state.engine.resume_job(tenant_id, job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn suggestions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SuggestionsQuery>,
) -> ApiResult<Json<Vec<PendingSuggestion>>> {
    let tenant_id = tenant(&headers)?;
    let status = query.status.unwrap_or(SuggestionStatus::Pending);
    let suggestions = state
        .engine
        .store()
        .list_suggestions(tenant_id, Some(status))
        .await
        .map_err(ReconcileError::from)?
        .into_iter()
        .filter(|s| query.job_id.map_or(true, |job_id| s.job_id == job_id))
        .collect();
    Ok(Json(suggestions))
}

async fn links_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<LinkEdge>>> {
    let tenant_id = tenant(&headers)?;
    let edges = state
        .engine
        .store()
        .list_edges(tenant_id)
        .await
        .map_err(ReconcileError::from)?;
    Ok(Json(edges))
}

async fn batch_confirm_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<BatchConfirmRequest>,
) -> ApiResult<Json<BatchConfirmReport>> {
    let tenant_id = tenant(&headers)?;
    let report = state
        .engine
        .graph()
        .batch_confirm(tenant_id, &request.suggestion_ids)
        .await;
    Ok(Json(report))
}

async fn unlink_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(edge_id): AxumPath<Uuid>,
) -> ApiResult<Json<LinkEdge>> {
    let tenant_id = tenant(&headers)?;
    let edge = state.engine.graph().unlink(tenant_id, edge_id).await?;
    Ok(Json(edge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use catlink_core::{JobStatus, ProductDomain, ResolvedProduct};
    use catlink_storage::MemoryStore;
    use catlink_sync::{SourceRegistry, TracingAlertSink};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const REGISTRY: &str = r#"
sources:
  - source_id: supplier_sheet
    display_name: Supplier price sheet
    kind: spreadsheet
    fixture: supplier_sheet.json
    chunk_size: 2
"#;

    struct Harness {
        _tmp: tempfile::TempDir,
        tenant: TenantId,
        engine: Arc<Engine>,
        app: Router,
    }

    async fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("supplier_sheet.json"),
            r#"[
                {"name": "Hydro Spanner", "brand": "Globex", "price": "12.50"},
                {"name": "Garden Gnome", "brand": "Nobody"},
                {"name": "Stapler Red", "brand": "Initech"}
            ]"#,
        )
        .unwrap();

        let tenant = TenantId::new();
        let store = Arc::new(MemoryStore::new());
        let at = chrono::Utc::now() - chrono::Duration::days(1);
        store
            .seed_products(["Globex Hydro Spanner", "Initech Stapler Red"].into_iter().map(|name| {
                ResolvedProduct {
                    id: Uuid::new_v4(),
                    tenant_id: tenant,
                    domain: ProductDomain::CatalogAnalysis,
                    source_id: None,
                    reference_code: None,
                    ean: None,
                    name: name.to_string(),
                    brand: None,
                    price: None,
                    stock: None,
                    created_at: at,
                    updated_at: at,
                }
            }))
            .await;

        let config = SyncConfig {
            workspace_root: tmp.path().to_path_buf(),
            ..SyncConfig::default()
        };
        let registry = SourceRegistry::from_yaml_str(REGISTRY).unwrap();
        let engine = Arc::new(Engine::new(config, registry, store, Arc::new(TracingAlertSink)).unwrap());
        let app = app(AppState::new(engine.clone()));
        Harness {
            _tmp: tmp,
            tenant,
            engine,
            app,
        }
    }

    fn request(method: &str, uri: &str, tenant: Option<TenantId>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header(TENANT_HEADER, tenant.to_string());
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let h = harness().await;
        let resp = h.app.oneshot(request("GET", "/healthz", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn missing_tenant_header_is_rejected() {
        let h = harness().await;
        let resp = h.app.oneshot(request("GET", "/jobs", None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains(TENANT_HEADER));
    }

    #[tokio::test]
    async fn strict_job_runs_and_links_can_be_removed() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/jobs",
                Some(h.tenant),
                Some(serde_json::json!({ "source": "supplier_sheet" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let job_id: Uuid = json_body(resp).await["spec"]["job_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();

        let done = h.engine.supervisor().wait(job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);

        let resp = h
            .app
            .clone()
            .oneshot(request("GET", &format!("/jobs/{job_id}"), Some(h.tenant), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["counts"]["matched"], 2);
        assert_eq!(body["progress"], 1.0);

        let other_tenant = h
            .app
            .clone()
            .oneshot(request("GET", &format!("/jobs/{job_id}"), Some(TenantId::new()), None))
            .await
            .unwrap();
        assert_eq!(other_tenant.status(), StatusCode::NOT_FOUND);

        let resp = h
            .app
            .clone()
            .oneshot(request("GET", "/links", Some(h.tenant), None))
            .await
            .unwrap();
        let links = json_body(resp).await;
        assert_eq!(links.as_array().unwrap().len(), 2);
        let edge_id = links[0]["id"].as_str().unwrap().to_string();

        let resp = h
            .app
            .clone()
            .oneshot(request("DELETE", &format!("/links/{edge_id}"), Some(h.tenant), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let again = h
            .app
            .clone()
            .oneshot(request("DELETE", &format!("/links/{edge_id}"), Some(h.tenant), None))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let resume = h
            .app
            .oneshot(request("POST", &format!("/jobs/{job_id}/resume"), Some(h.tenant), None))
            .await
            .unwrap();
        assert_eq!(resume.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn suggestion_job_then_batch_confirm_reports_per_item() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/jobs",
                Some(h.tenant),
                Some(serde_json::json!({ "source": "supplier_sheet", "policy": "suggestion" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let job_id: Uuid = json_body(resp).await["spec"]["job_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        h.engine.supervisor().wait(job_id).await.unwrap();

        let resp = h
            .app
            .clone()
            .oneshot(request("GET", &format!("/suggestions?job_id={job_id}"), Some(h.tenant), None))
            .await
            .unwrap();
        let suggestions = json_body(resp).await;
        let ids: Vec<String> = suggestions
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 2);

        let mut batch = ids.clone();
        batch.push(Uuid::new_v4().to_string());
        let resp = h
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/links/batch-confirm",
                Some(h.tenant),
                Some(serde_json::json!({ "suggestion_ids": batch })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let report = json_body(resp).await;
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["items"][2]["ok"], false);

        let pending = h
            .app
            .oneshot(request("GET", "/suggestions", Some(h.tenant), None))
            .await
            .unwrap();
        assert!(json_body(pending).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_and_unknown_job_map_to_not_found() {
        let h = harness().await;
        let resp = h
            .app
            .clone()
            .oneshot(request(
                "POST",
                "/jobs",
                Some(h.tenant),
                Some(serde_json::json!({ "source": "nope" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = h
            .app
            .oneshot(request("POST", &format!("/jobs/{}/pause", Uuid::new_v4()), Some(h.tenant), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(json_body(resp).await["error"].is_string());
    }
}
