use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use dotenv::dotenv;
use reglens_client::{ApiClient, ApiClientConfig, RetryPolicy, TimeoutConfig};
use reglens_core::{
    HistoryPage, HistoryParams, QueryRequest, QueryResponse, ReportAccepted, ReportRequest,
    ReportStatusResponse, UploadAccepted,
};
use reglens_error::{RegError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

mod validate;
use validate::UploadPolicy;

// ===============
// 配置
// ===============

#[derive(Debug, Deserialize)]
struct AppConfig {
    server: ServerCfg,
    backend: BackendCfg,
    upload: UploadCfg,
    timeouts: Option<TimeoutsCfg>,
    retry: Option<RetryCfg>,
}

#[derive(Debug, Deserialize)]
struct ServerCfg {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct BackendCfg {
    http_base: String,
}

#[derive(Debug, Deserialize)]
struct UploadCfg {
    max_bytes: u64,
    allowed_extensions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TimeoutsCfg {
    short_secs: u64,
    medium_secs: u64,
    long_secs: u64,
}

#[derive(Debug, Deserialize)]
struct RetryCfg {
    max_attempts: u32,
    base_delay_ms: u64,
    multiplier: u32,
}

fn load_config() -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string("configs/default.yaml")?;
    let cfg: AppConfig = serde_yaml::from_str(&s)?;
    info!("load_config: {:?}", cfg);
    Ok(cfg)
}

#[derive(Clone)]
struct AppState {
    api: ApiClient,
    upload_policy: Arc<UploadPolicy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg = load_config()?;

    let mut api_cfg = ApiClientConfig::new(cfg.backend.http_base.clone());
    if let Some(t) = &cfg.timeouts {
        api_cfg.timeouts = TimeoutConfig {
            short: Duration::from_secs(t.short_secs),
            medium: Duration::from_secs(t.medium_secs),
            long: Duration::from_secs(t.long_secs),
        };
    }
    if let Some(r) = &cfg.retry {
        api_cfg.retry = RetryPolicy {
            max_attempts: r.max_attempts,
            base_delay: Duration::from_millis(r.base_delay_ms),
            multiplier: r.multiplier,
        };
    }

    let state = AppState {
        api: ApiClient::new(api_cfg)?,
        upload_policy: Arc::new(UploadPolicy {
            max_bytes: cfg.upload.max_bytes,
            allowed_extensions: cfg.upload.allowed_extensions.clone(),
        }),
    };

    let max_body = cfg.upload.max_bytes as usize * 2;
    let app = app_router(state, max_body);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "reglens-gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// 体积上限放宽到策略上限的两倍：超限请求进入处理器由策略统一拒绝，
/// 得到规范的 413 响应体而不是框架裸错误。
fn app_router(state: AppState, max_body: usize) -> Router {
    Router::new()
        .route("/api/v1/query", post(submit_query))
        .route("/api/v1/report", post(generate_report))
        .route("/api/v1/report/:job_id/status", get(report_status))
        .route("/api/v1/upload", post(upload_document))
        .route("/api/v1/download/:file_id", get(download_file))
        .route("/api/v1/history", get(list_history))
        .route("/api/v1/history/:id", delete(delete_history))
        .route("/api/v1/health", get(health))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ===============
// 处理器：先就地校验，再转发后端；所有失败统一走 RegError → ApiError
// ===============

/// JSON 请求体提取。解析失败（格式错误、缺字段）同样属于校验错误，
/// 不允许框架裸 400 文本越过统一的 ApiError 形状出去。
struct GatewayJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for GatewayJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RegError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(GatewayJson(value)),
            Err(rejection) => Err(RegError::Validation {
                field: "body".into(),
                reason: rejection.body_text(),
            }),
        }
    }
}

async fn submit_query(
    State(state): State<AppState>,
    GatewayJson(req): GatewayJson<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    validate::query_text(&req.text)?;
    let resp = state.api.submit_query(&req).await?;
    Ok(Json(resp))
}

async fn generate_report(
    State(state): State<AppState>,
    GatewayJson(req): GatewayJson<ReportRequest>,
) -> Result<Json<ReportAccepted>> {
    let accepted = state.api.generate_report(&req).await?;
    Ok(Json(accepted))
}

async fn report_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ReportStatusResponse>> {
    let status = state.api.report_status(&job_id).await?;
    Ok(Json(status))
}

async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadAccepted>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut sector: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| RegError::Validation {
                        field: "file".into(),
                        reason: "缺少文件名".into(),
                    })?;
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("sector") => {
                sector = Some(field.text().await.map_err(bad_multipart)?);
            }
            _ => {}
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| RegError::Validation {
        field: "file".into(),
        reason: "缺少 file 字段".into(),
    })?;
    state
        .upload_policy
        .check(&file_name, bytes.len() as u64)?;

    let accepted = state
        .api
        .upload_file(&file_name, bytes, sector.as_deref())
        .await?;
    Ok(Json(accepted))
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> RegError {
    RegError::Validation {
        field: "multipart".into(),
        reason: e.to_string(),
    }
}

async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse> {
    let file = state.api.download_file(&file_id).await?;
    // 内容头原样透传，浏览器据此决定文件名与展示方式
    let mut headers = HeaderMap::new();
    if let Some(ct) = file.content_type.as_deref().and_then(|v| v.parse().ok()) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    if let Some(cd) = file
        .content_disposition
        .as_deref()
        .and_then(|v| v.parse().ok())
    {
        headers.insert(header::CONTENT_DISPOSITION, cd);
    }
    Ok((headers, file.bytes))
}

async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>> {
    validate::history_params(&params)?;
    let page = state.api.list_history(&params).await?;
    Ok(Json(page))
}

async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<reglens_core::DeleteResult>> {
    let result = state.api.delete_history(id).await?;
    Ok(Json(result))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let backend = state.api.health().await.is_ok();
    Json(serde_json::json!({ "status": "ok", "backend": backend }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post as axum_post;
    use std::future::IntoFuture;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct BackendState {
        query_calls: AtomicU32,
        upload_calls: AtomicU32,
    }

    /// 带调用计数的模拟后端，用于断言网关是否真的转发了请求
    async fn start_backend(fail_query: bool) -> (String, Arc<BackendState>) {
        let state = Arc::new(BackendState {
            query_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
        });

        let s = Arc::clone(&state);
        let query = move || {
            let s = Arc::clone(&s);
            async move {
                s.query_calls.fetch_add(1, Ordering::SeqCst);
                if fail_query {
                    let body = reglens_error::ApiError::from_error(&RegError::Backend {
                        status: 503,
                        message: "engine warming up".into(),
                    });
                    Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
                } else {
                    Ok(Json(serde_json::json!({
                        "analysis": "Tier 1 capital ratio must exceed 6%.",
                        "sources": [],
                        "confidenceScore": 0.8
                    })))
                }
            }
        };
        let s = Arc::clone(&state);
        let upload = move || {
            let s = Arc::clone(&s);
            async move {
                s.upload_calls.fetch_add(1, Ordering::SeqCst);
                Json(serde_json::json!({ "fileId": "F1", "fileName": "doc.pdf" }))
            }
        };

        let app = Router::new()
            .route("/api/v1/query", axum_post(query))
            .route("/api/v1/upload", axum_post(upload));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        (format!("http://{addr}"), state)
    }

    async fn start_gateway(backend_base: &str, max_upload: u64) -> String {
        let mut api_cfg = ApiClientConfig::new(backend_base);
        api_cfg.retry = RetryPolicy::none();
        api_cfg.timeouts = TimeoutConfig {
            short: Duration::from_secs(2),
            medium: Duration::from_secs(2),
            long: Duration::from_secs(2),
        };
        let state = AppState {
            api: ApiClient::new(api_cfg).unwrap(),
            upload_policy: Arc::new(UploadPolicy {
                max_bytes: max_upload,
                allowed_extensions: vec!["pdf".into(), "txt".into()],
            }),
        };
        let app = app_router(state, max_upload as usize * 2);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_invalid_query_rejected_without_backend_call() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/query"))
            .json(&serde_json::json!({ "text": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["statusCode"], 400);
        // 校验失败的请求不得打到后端
        assert_eq!(backend_state.query_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_query_is_forwarded() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/query"))
            .json(&serde_json::json!({ "text": "minimum capital ratio?", "sector": "banking" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body["analysis"].as_str().unwrap().contains("Tier 1"));
        assert_eq!(backend_state.query_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_translated_to_api_error() {
        let (backend, _) = start_backend(true).await;
        let gateway = start_gateway(&backend, 1024).await;

        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/query"))
            .json(&serde_json::json!({ "text": "q" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "backend_error");
        assert_eq!(body["statusCode"], 503);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected_without_forwarding() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        let part = reqwest::multipart::Part::bytes(vec![0u8; 1500]).file_name("big.pdf");
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 413);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "payload_too_large");
        assert_eq!(backend_state.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disallowed_extension_rejected() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        let part = reqwest::multipart::Part::bytes(vec![1u8; 16]).file_name("tool.exe");
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        assert_eq!(backend_state.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_allowed_upload_is_forwarded() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        let part = reqwest::multipart::Part::bytes(vec![1u8; 64]).file_name("doc.pdf");
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("sector", "banking");
        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["fileId"], "F1");
        assert_eq!(backend_state.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_body_yields_normalized_api_error() {
        let (backend, backend_state) = start_backend(false).await;
        let gateway = start_gateway(&backend, 1024).await;

        // 坏 JSON 不能以框架裸文本返回，必须是统一的 ApiError 形状
        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/query"))
            .header("content-type", "application/json")
            .body("{not valid json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["statusCode"], 400);
        assert!(body["message"].is_string());
        assert_eq!(backend_state.query_calls.load(Ordering::SeqCst), 0);

        // 结构不符（缺必填字段）同样收敛为校验错误
        let resp = reqwest::Client::new()
            .post(format!("{gateway}/api/v1/report"))
            .json(&serde_json::json!({ "sector": "banking" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }
}
