use reglens_core::{
    DeleteResult, HistoryPage, HistoryParams, QueryRequest, QueryResponse, ReportAccepted,
    ReportRequest, ReportStatusResponse, UploadAccepted,
};
use reglens_error::{ApiError, RegError, Result};
use serde::de::DeserializeOwned;
use tracing::instrument;
use uuid::Uuid;

use crate::bound::{bounded, OpClass, TimeoutConfig};
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// 下载结果：二进制内容 + 透传的响应头
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// 浏览器侧请求客户端
///
/// 所有调用走网关，超时按操作分级，读/删类幂等操作统一套
/// `retry_with_backoff`；查询处理、报告生成、上传这类可能已在后端
/// 产生副作用的操作一律不在客户端层重试。
/// 网关的非 2xx 响应按统一 `ApiError` 形状解析后还原为 RegError，
/// UI 代码永远不接触原始传输异常。
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ApiClientConfig,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RegError::Internal {
                message: format!("http client init: {e}"),
            })?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn ceiling(&self, class: OpClass) -> std::time::Duration {
        self.config.timeouts.ceiling(class)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            serde_json::from_slice(&bytes).map_err(|e| RegError::Serialization {
                format: "json".into(),
                message: e.to_string(),
            })
        } else {
            // 网关错误统一为 ApiError 形状；解析失败则退化为通用后端错误
            match serde_json::from_slice::<ApiError>(&bytes) {
                Ok(api_err) => Err(api_err.into_error()),
                Err(_) => Err(RegError::Backend {
                    status: status.as_u16(),
                    message: "后端返回不可解析的错误响应".into(),
                }),
            }
        }
    }

    #[instrument(skip(self, req))]
    pub async fn submit_query(&self, req: &QueryRequest) -> Result<QueryResponse> {
        let url = self.url("/api/v1/query");
        bounded("submit_query", self.ceiling(OpClass::Medium), async {
            let resp = self.http.post(&url).json(req).send().await?;
            Self::decode(resp).await
        })
        .await
    }

    #[instrument(skip(self, req))]
    pub async fn generate_report(&self, req: &ReportRequest) -> Result<ReportAccepted> {
        let url = self.url("/api/v1/report");
        bounded("generate_report", self.ceiling(OpClass::Long), async {
            let resp = self.http.post(&url).json(req).send().await?;
            Self::decode(resp).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn report_status(&self, job_id: &str) -> Result<ReportStatusResponse> {
        let url = self.url(&format!("/api/v1/report/{job_id}/status"));
        let ceiling = self.ceiling(OpClass::Short);
        retry_with_backoff(&self.config.retry, "report_status", || {
            let url = url.clone();
            async move {
                bounded("report_status", ceiling, async {
                    let resp = self.http.get(&url).send().await?;
                    Self::decode(resp).await
                })
                .await
            }
        })
        .await
    }

    #[instrument(skip(self, bytes))]
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        sector: Option<&str>,
    ) -> Result<UploadAccepted> {
        let url = self.url("/api/v1/upload");
        let mut form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string()),
        );
        if let Some(sector) = sector {
            form = form.text("sector", sector.to_string());
        }
        bounded("upload_file", self.ceiling(OpClass::Medium), async {
            let resp = self.http.post(&url).multipart(form).send().await?;
            Self::decode(resp).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn download_file(&self, file_id: &str) -> Result<DownloadedFile> {
        let url = self.url(&format!("/api/v1/download/{file_id}"));
        let ceiling = self.ceiling(OpClass::Medium);
        retry_with_backoff(&self.config.retry, "download_file", || {
            let url = url.clone();
            async move {
                bounded("download_file", ceiling, async {
                    let resp = self.http.get(&url).send().await?;
                    let status = resp.status();
                    if !status.is_success() {
                        let bytes = resp.bytes().await?;
                        return match serde_json::from_slice::<ApiError>(&bytes) {
                            Ok(api_err) => Err(api_err.into_error()),
                            Err(_) => Err(RegError::Backend {
                                status: status.as_u16(),
                                message: "后端返回不可解析的错误响应".into(),
                            }),
                        };
                    }
                    let header = |name: &str| {
                        resp.headers()
                            .get(name)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string())
                    };
                    let content_type = header("content-type");
                    let content_disposition = header("content-disposition");
                    let bytes = resp.bytes().await?.to_vec();
                    Ok(DownloadedFile {
                        bytes,
                        content_type,
                        content_disposition,
                    })
                })
                .await
            }
        })
        .await
    }

    #[instrument(skip(self, params))]
    pub async fn list_history(&self, params: &HistoryParams) -> Result<HistoryPage> {
        let url = self.url("/api/v1/history");
        let mut pairs: Vec<(&str, String)> = Vec::new();
        if let Some(page) = params.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(page_size) = params.page_size {
            pairs.push(("pageSize", page_size.to_string()));
        }
        if let Some(sector) = &params.sector {
            if let Ok(serde_json::Value::String(s)) = serde_json::to_value(sector) {
                pairs.push(("sector", s));
            }
        }
        if let Some(ty) = &params.query_type {
            if let Ok(serde_json::Value::String(s)) = serde_json::to_value(ty) {
                pairs.push(("type", s));
            }
        }
        if let Some(search) = &params.search {
            pairs.push(("search", search.clone()));
        }
        let ceiling = self.ceiling(OpClass::Short);
        retry_with_backoff(&self.config.retry, "list_history", || {
            let url = url.clone();
            let pairs = pairs.clone();
            async move {
                bounded("list_history", ceiling, async {
                    let resp = self.http.get(&url).query(&pairs).send().await?;
                    Self::decode(resp).await
                })
                .await
            }
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_history(&self, id: Uuid) -> Result<DeleteResult> {
        let url = self.url(&format!("/api/v1/history/{id}"));
        let ceiling = self.ceiling(OpClass::Short);
        retry_with_backoff(&self.config.retry, "delete_history", || {
            let url = url.clone();
            async move {
                bounded("delete_history", ceiling, async {
                    let resp = self.http.delete(&url).send().await?;
                    Self::decode(resp).await
                })
                .await
            }
        })
        .await
    }

    pub async fn health(&self) -> Result<()> {
        let url = self.url("/api/v1/health");
        bounded("health", self.ceiling(OpClass::Short), async {
            let resp = self.http.get(&url).send().await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(RegError::Backend {
                    status: resp.status().as_u16(),
                    message: "health check failed".into(),
                })
            }
        })
        .await
    }
}
