//! 客户端编排层：按用户意图组合请求客户端、流式通道与状态容器。
//!
//! 数据流：用户动作 → 网关调用 → 同步结果直接入容器；异步操作拿到
//! 任务标识后挂流式订阅，入站事件只通过容器的合法变更方法落地。
//! 进度投递以流式通道为主路径，网关状态端点作为降级轮询回退
//! （决策记录见 DESIGN.md）。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reglens_client::ApiClient;
use reglens_core::{
    Message, NotificationAction, NotificationKind, Query, QueryRequest, QueryType, ReportRequest,
    Sector, StreamEvent, UploadAccepted,
};
use reglens_error::{RegError, Result};
use reglens_state::{ReportStore, Stores};
use reglens_stream::{ChannelState, StreamChannel, StreamSubscription};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 错误通知的展示时长；瞬态错误带重试动作且常驻
const ERROR_NOTIFY_MS: u64 = 6000;
const SUCCESS_NOTIFY_MS: u64 = 4000;

pub struct AppRuntime {
    api: ApiClient,
    channel: StreamChannel,
    pub stores: Stores,
    // 每个任务已挂的订阅，组件卸载时必须显式拆除，避免处理器滞留
    tracked: Arc<Mutex<HashMap<String, Vec<StreamSubscription>>>>,
}

impl AppRuntime {
    pub fn new(api: ApiClient, channel: StreamChannel, stores: Stores) -> Self {
        Self {
            api,
            channel,
            stores,
            tracked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// 提交查询：成功则消息与查询记录入容器；失败则通知 + 容器错误字段。
    /// 两条路径互斥，绝不同时发生。
    #[instrument(skip(self, text))]
    pub async fn submit_query(
        &self,
        text: impl Into<String>,
        sector: Option<Sector>,
        query_type: QueryType,
    ) -> Result<Uuid> {
        let text = text.into();
        self.stores.conversation.clear_error();
        self.stores.conversation.set_loading(true);

        let result = self
            .api
            .submit_query(&QueryRequest {
                text: text.clone(),
                sector: sector.clone(),
            })
            .await;
        self.stores.conversation.set_loading(false);

        match result {
            Ok(resp) => {
                self.stores.conversation.add_message(Message::user(&text));
                self.stores
                    .conversation
                    .add_message(Message::assistant(&resp.analysis, resp.sources.clone()));
                let mut query = Query::new(text, sector, query_type);
                query.response = Some(resp.analysis);
                query.confidence_score = resp.confidence_score;
                let id = query.id;
                self.stores.queries.add_query(query);
                Ok(id)
            }
            Err(e) => {
                self.stores.conversation.set_error(e.user_message());
                self.notify_failure(&e, "retry_submit_query");
                Err(e)
            }
        }
    }

    /// 请求报告生成：拿到任务标识后启动容器内的任务记录，
    /// 并为该任务挂上流式订阅。
    #[instrument(skip(self))]
    pub async fn generate_report(
        &self,
        query_id: Uuid,
        analysis_type: QueryType,
        sector: Sector,
        format: Option<String>,
    ) -> Result<String> {
        let accepted = self
            .api
            .generate_report(&ReportRequest {
                query_id,
                analysis_type,
                sector,
                format,
            })
            .await
            .map_err(|e| {
                self.notify_failure(&e, "retry_generate_report");
                e
            })?;

        let job_id = accepted.job_id.clone();
        info!(job_id = %job_id, "报告任务已受理");
        self.stores
            .reports
            .start_report_generation(&job_id, query_id);
        self.attach_job_subscription(&job_id);
        Ok(job_id)
    }

    /// 为任务挂上事件订阅。终态事件投递后通道侧主题自动拆除，
    /// 这里同步清理跟踪表，终态不会被二次处理。
    fn attach_job_subscription(&self, job_id: &str) {
        let reports = self.stores.reports.clone();
        let notifications = self.stores.notifications.clone();
        let tracked = Arc::clone(&self.tracked);
        let sub = self.channel.subscribe(job_id, move |ev| {
            apply_stream_event(&reports, ev);
            match ev {
                StreamEvent::ReportCompleted { job_id, .. } => {
                    notifications.notify(NotificationKind::Success, "报告已生成", SUCCESS_NOTIFY_MS);
                    tracked.lock().expect("tracked poisoned").remove(job_id);
                }
                StreamEvent::ReportFailed { job_id, message } => {
                    notifications.notify(NotificationKind::Error, message.clone(), 0);
                    tracked.lock().expect("tracked poisoned").remove(job_id);
                }
                _ => {}
            }
        });
        self.tracked
            .lock()
            .expect("tracked poisoned")
            .entry(job_id.to_string())
            .or_default()
            .push(sub);
    }

    /// 组件卸载时的订阅拆除：即使终态事件尚未到达也必须调用，
    /// 否则处理器跨任务生命周期滞留。不取消后端任务本身。
    pub fn teardown_report_tracking(&self, job_id: &str) {
        let subs = self
            .tracked
            .lock()
            .expect("tracked poisoned")
            .remove(job_id);
        if let Some(subs) = subs {
            for sub in &subs {
                self.channel.unsubscribe(sub);
            }
        }
    }

    /// 降级轮询回退：通道不在 OPEN 时由调用方驱动，结果仍然只通过
    /// 容器的合法变更方法落地，不绕过单调进度等不变量。
    #[instrument(skip(self))]
    pub async fn refresh_report_status(&self, job_id: &str) -> Result<()> {
        let status = self.api.report_status(job_id).await?;
        self.stores.reports.apply_status(&status);
        Ok(())
    }

    #[instrument(skip(self, bytes))]
    pub async fn upload_document(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        sector: Option<&str>,
    ) -> Result<UploadAccepted> {
        match self.api.upload_file(file_name, bytes, sector).await {
            Ok(accepted) => {
                self.stores.notifications.notify(
                    NotificationKind::Success,
                    format!("{} 上传成功", accepted.file_name),
                    SUCCESS_NOTIFY_MS,
                );
                Ok(accepted)
            }
            Err(e) => {
                self.notify_failure(&e, "retry_upload");
                Err(e)
            }
        }
    }

    /// 删除历史记录。删除是幂等操作：后端已不存在时本地一并清理，
    /// 只提示警告不报错。
    #[instrument(skip(self))]
    pub async fn delete_query(&self, id: Uuid) -> Result<()> {
        match self.api.delete_history(id).await {
            Ok(_) => {
                self.stores.queries.delete_query(id);
                Ok(())
            }
            Err(RegError::NotFound { resource }) => {
                self.stores.queries.delete_query(id);
                self.stores
                    .notifications
                    .notify(NotificationKind::Warning, resource, ERROR_NOTIFY_MS);
                Ok(())
            }
            Err(e) => {
                self.notify_failure(&e, "retry_delete");
                Err(e)
            }
        }
    }

    /// 关闭流式通道；显式关闭后不再重连。
    pub fn shutdown(&self) {
        for (_, subs) in self.tracked.lock().expect("tracked poisoned").drain() {
            for sub in &subs {
                self.channel.unsubscribe(sub);
            }
        }
        self.channel.disconnect();
    }

    /// 瞬态错误给出可重试的常驻通知，其余错误定时消失
    fn notify_failure(&self, e: &RegError, retry_action: &str) {
        warn!(error = %e, "网关调用失败");
        if e.is_retryable() {
            self.stores.notifications.notify_with_action(
                NotificationKind::Error,
                e.user_message(),
                0,
                NotificationAction {
                    label: "重试".into(),
                    action_id: retry_action.into(),
                },
            );
        } else {
            self.stores
                .notifications
                .notify(NotificationKind::Error, e.user_message(), ERROR_NOTIFY_MS);
        }
    }
}

/// 流式事件进入状态的唯一通路：容器的四个报告变更方法。
fn apply_stream_event(reports: &ReportStore, ev: &StreamEvent) {
    match ev {
        StreamEvent::ReportProgress {
            job_id, progress, ..
        } => reports.update_report_progress(job_id, *progress),
        StreamEvent::ReportCompleted {
            job_id,
            result_path,
        } => reports.complete_report_generation(job_id, result_path),
        StreamEvent::ReportFailed { job_id, message } => {
            reports.set_report_error(job_id, message)
        }
        StreamEvent::Pong => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::{SinkExt, StreamExt};
    use reglens_client::{ApiClientConfig, RetryPolicy, TimeoutConfig};
    use reglens_core::{ClientFrame, JobStatus, Role};
    use reglens_stream::ChannelConfig;
    use std::future::IntoFuture;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn start_gateway_mock() -> String {
        async fn query_ok() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "analysis": "Minimum capital requirements are defined in Basel III.",
                "sources": [{
                    "documentId": "basel-iii",
                    "title": "Basel III framework",
                    "page": 12,
                    "snippet": "banks must hold...",
                    "score": 0.91
                }],
                "confidenceScore": 0.91
            }))
        }
        async fn report_ok() -> Json<serde_json::Value> {
            Json(serde_json::json!({ "jobId": "J1", "status": "queued" }))
        }
        let app = Router::new()
            .route("/api/v1/query", post(query_ok))
            .route("/api/v1/report", post(report_ok));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());
        format!("http://{addr}")
    }

    fn runtime(base_url: &str, ws_port: u16) -> AppRuntime {
        let mut api_cfg = ApiClientConfig::new(base_url);
        api_cfg.retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            multiplier: 2,
        };
        api_cfg.timeouts = TimeoutConfig {
            short: Duration::from_secs(2),
            medium: Duration::from_secs(2),
            long: Duration::from_secs(2),
        };
        let api = ApiClient::new(api_cfg).unwrap();

        let mut ch_cfg = ChannelConfig::new(format!("ws://127.0.0.1:{ws_port}"));
        ch_cfg.backoff_base = Duration::from_millis(50);
        ch_cfg.backoff_max = Duration::from_millis(200);
        let channel = StreamChannel::connect(ch_cfg);

        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        AppRuntime::new(api, channel, Stores::open(&db))
    }

    #[tokio::test]
    async fn test_submit_query_creates_one_assistant_message_with_sources() {
        let base = start_gateway_mock().await;
        let rt = runtime(&base, 1); // 通道不参与本场景

        let id = rt
            .submit_query(
                "capital requirements?",
                Some(Sector::Banking),
                QueryType::Compliance,
            )
            .await
            .unwrap();

        let conv = rt.stores.conversation.get();
        let assistants: Vec<_> = conv
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        assert_eq!(assistants[0].sources.len(), 1);
        assert_eq!(assistants[0].sources[0].document_id, "basel-iii");
        assert!(!conv.loading);
        assert!(conv.error.is_none());

        let queries = rt.stores.queries.get().queries;
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].id, id);
        assert_eq!(queries[0].confidence_score, Some(0.91));
        rt.shutdown();
    }

    #[tokio::test]
    async fn test_submit_query_failure_sets_error_not_messages() {
        // 网关不存在：传输失败 → 通知 + 错误字段，不产生消息
        let rt = runtime("http://127.0.0.1:1", 1);
        let result = rt
            .submit_query("q", None, QueryType::Compliance)
            .await;
        assert!(result.is_err());
        let conv = rt.stores.conversation.get();
        assert!(conv.messages.is_empty());
        assert!(conv.error.is_some());
        assert_eq!(rt.stores.notifications.get().len(), 1);
        rt.shutdown();
    }

    #[tokio::test]
    async fn test_report_lifecycle_via_stream_events() {
        let base = start_gateway_mock().await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_port = listener.local_addr().unwrap().port();

        // 模拟后端流式服务：等到 J1 的订阅声明后投递进度与完成事件
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(ClientFrame::Subscribe { job_id }) =
                            serde_json::from_str::<ClientFrame>(&text)
                        {
                            if job_id == "J1" {
                                break;
                            }
                        }
                    }
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
            for payload in [
                serde_json::json!({"type":"report_progress","data":{"jobId":"J1","stage":"analysis","progress":10}}),
                serde_json::json!({"type":"report_progress","data":{"jobId":"J1","stage":"rendering","progress":60}}),
                serde_json::json!({"type":"report_completed","data":{"jobId":"J1","resultPath":"/r/J1"}}),
            ] {
                ws.send(WsMessage::Text(payload.to_string())).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let rt = runtime(&base, ws_port);
        let job_id = rt
            .generate_report(Uuid::new_v4(), QueryType::Report, Sector::Banking, None)
            .await
            .unwrap();
        assert_eq!(job_id, "J1");
        assert_eq!(rt.stores.reports.job("J1").unwrap().status, JobStatus::Queued);

        // 等待终态落地
        let mut done = false;
        for _ in 0..100 {
            if rt.stores.reports.job("J1").unwrap().status == JobStatus::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(done, "终态事件未在预期时间内落地");
        let job = rt.stores.reports.job("J1").unwrap();
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_path.as_deref(), Some("/r/J1"));
        rt.shutdown();
    }

    #[tokio::test]
    async fn test_teardown_removes_orphaned_handlers() {
        let base = start_gateway_mock().await;
        let rt = runtime(&base, 1);
        let job_id = rt
            .generate_report(Uuid::new_v4(), QueryType::Report, Sector::Banking, None)
            .await
            .unwrap();
        rt.teardown_report_tracking(&job_id);
        assert!(rt
            .tracked
            .lock()
            .unwrap()
            .get(&job_id)
            .is_none());
        rt.shutdown();
    }
}
