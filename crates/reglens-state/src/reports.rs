use std::collections::HashMap;

use reglens_core::{JobStatus, ReportJob, ReportStatusResponse};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::store::{Store, SubscriptionHandle};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportState {
    pub jobs: HashMap<String, ReportJob>,
}

impl ReportState {
    /// 任一任务仍在排队或处理中
    pub fn any_running(&self) -> bool {
        self.jobs.values().any(|j| !j.status.is_terminal())
    }

    pub fn any_failed(&self) -> bool {
        self.jobs
            .values()
            .any(|j| matches!(j.status, JobStatus::Failed))
    }
}

/// 报告任务容器
///
/// 下面四个方法是流式通道事件能够触达状态的唯一合法路径，
/// 单调进度与终态不可变这两条不变量都在这里集中维护。
#[derive(Clone)]
pub struct ReportStore {
    store: Store<ReportState>,
}

impl ReportStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(ReportState::default()),
        }
    }

    pub fn start_report_generation(&self, job_id: impl Into<String>, query_id: Uuid) {
        let job_id = job_id.into();
        self.store.update(|s| {
            s.jobs
                .entry(job_id.clone())
                .or_insert_with(|| ReportJob::queued(job_id.clone(), query_id));
        });
    }

    /// 进度更新：终态后忽略；乱序到达的较小进度被钳制（只增不减）。
    pub fn update_report_progress(&self, job_id: &str, progress: u8) {
        let progress = progress.min(100);
        self.store.update(|s| {
            if let Some(job) = s.jobs.get_mut(job_id) {
                if job.status.is_terminal() {
                    debug!(job_id, "终态任务忽略进度事件");
                    return;
                }
                job.status = JobStatus::Processing;
                if progress > job.progress {
                    job.progress = progress;
                } else {
                    debug!(job_id, old = job.progress, new = progress, "乱序进度被钳制");
                }
            }
        });
    }

    pub fn complete_report_generation(&self, job_id: &str, result_path: impl Into<String>) {
        let result_path = result_path.into();
        self.store.update(|s| {
            if let Some(job) = s.jobs.get_mut(job_id) {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result_path = Some(result_path.clone());
            }
        });
    }

    pub fn set_report_error(&self, job_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.store.update(|s| {
            if let Some(job) = s.jobs.get_mut(job_id) {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Failed;
                job.error = Some(message.clone());
            }
        });
    }

    /// 轮询回退路径：把网关状态响应套用到同一组合法变更方法上，
    /// 不绕过单调/终态不变量。
    pub fn apply_status(&self, status: &ReportStatusResponse) {
        match status.status {
            JobStatus::Queued => {}
            JobStatus::Processing => self.update_report_progress(&status.job_id, status.progress),
            JobStatus::Completed => self.complete_report_generation(
                &status.job_id,
                status.result_path.clone().unwrap_or_default(),
            ),
            JobStatus::Failed => self.set_report_error(
                &status.job_id,
                status.error.clone().unwrap_or_else(|| "报告生成失败".into()),
            ),
        }
    }

    pub fn job(&self, job_id: &str) -> Option<ReportJob> {
        self.store.get().jobs.get(job_id).cloned()
    }

    pub fn get(&self) -> ReportState {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ReportState) + Send + Sync + 'static,
    ) -> SubscriptionHandle<ReportState> {
        self.store.subscribe(listener)
    }

    pub(crate) fn as_store(&self) -> &Store<ReportState> {
        &self.store
    }
}

impl Default for ReportStore {
    fn default() -> Self {
        Self::new()
    }
}
