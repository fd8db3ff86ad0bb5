use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===============
// 领域模型
// ===============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 对话消息。创建后不可变，归会话容器独占所有；顺序即插入顺序。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            sources: Vec::new(),
            artifact: None,
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            sources,
            artifact: None,
        }
    }
}

/// 答案引用的监管文档片段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    pub page: Option<i32>,
    pub snippet: String,
    pub score: Option<f32>,
}

/// 消息附带的产物（如生成的报告文件）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub kind: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Banking,
    Insurance,
    Securities,
    Payments,
    #[serde(untagged)]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryType {
    Compliance,
    GapAnalysis,
    Report,
}

/// 用户提交的分析查询。后端结果到达后原地更新，跨会话持久化。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub sector: Option<Sector>,
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub response: Option<String>,
    pub confidence_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>, sector: Option<Sector>, query_type: QueryType) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            sector,
            query_type,
            response: None,
            confidence_score: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// 终态之后不再接受任何变更
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// 报告生成任务。仅由流式通道事件或网关终态响应驱动变更；
/// progress 在非失败状态下单调不减。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub job_id: String,
    pub query_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub result_path: Option<String>,
    pub error: Option<String>,
}

impl ReportJob {
    pub fn queued(job_id: impl Into<String>, query_id: Uuid) -> Self {
        Self {
            job_id: job_id.into(),
            query_id,
            status: JobStatus::Queued,
            progress: 0,
            result_path: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
}

/// 临时通知。duration_ms == 0 表示常驻，需用户手动关闭。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub label: String,
    pub action_id: String,
}

// ===============
// 网关 ⇄ 浏览器 / 网关 ⇄ 后端 线上契约
// ===============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub text: String,
    pub sector: Option<Sector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub analysis: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    pub confidence_score: Option<f32>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub query_id: Uuid,
    pub analysis_type: QueryType,
    pub sector: Sector,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAccepted {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub file_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sector: Option<Sector>,
    #[serde(rename = "type")]
    pub query_type: Option<QueryType>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub data: Vec<Query>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResult {
    pub success: bool,
}

// ===============
// 流式通道线上契约
// ===============

/// 服务端下行事件信封 `{type, data}`
///
/// 未识别的 type 反序列化失败即丢弃（对服务端新增事件类型保持前向兼容）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum StreamEvent {
    ReportProgress {
        job_id: String,
        stage: String,
        progress: u8,
    },
    ReportCompleted {
        job_id: String,
        result_path: String,
    },
    ReportFailed {
        job_id: String,
        message: String,
    },
    Pong,
}

impl StreamEvent {
    /// 路由主题：此处即任务标识
    pub fn topic(&self) -> Option<&str> {
        match self {
            StreamEvent::ReportProgress { job_id, .. }
            | StreamEvent::ReportCompleted { job_id, .. }
            | StreamEvent::ReportFailed { job_id, .. } => Some(job_id),
            StreamEvent::Pong => None,
        }
    }

    /// 终态事件之后同一任务不会再有事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::ReportCompleted { .. } | StreamEvent::ReportFailed { .. }
        )
    }
}

/// 客户端上行帧
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    Subscribe { job_id: String },
    Unsubscribe { job_id: String },
    Ping,
}

pub use reglens_error::{ApiError, RegError as Error, Result};
