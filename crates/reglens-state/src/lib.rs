//! 响应式状态层：浏览器侧运行时的唯一共享可变资源。
//!
//! 每个领域一个容器，外部代码（包括流式通道事件处理器）只能通过容器自身的
//! 变更方法写入，绝不直接赋值容器内部值。容器按显式构造注入使用，
//! 不做全局单例，便于生命周期管理与测试隔离。

mod conversation;
mod notify;
mod persist;
mod queries;
mod reports;
mod store;
mod ui;

pub use conversation::{ConversationState, ConversationStore};
pub use notify::NotificationStore;
pub use persist::PersistentStore;
pub use queries::{QueryState, QueryStore, QUERIES_KEY};
pub use reports::{ReportState, ReportStore};
pub use store::{derive2, derive3, Derived, Store, SubscriptionHandle};
pub use ui::{UiState, UiStore};

use reglens_error::Result;

/// 全部领域容器的显式构造集合
///
/// 顶层 UI 通过 `any_loading` / `any_error` 两个派生容器展示全局繁忙/错误
/// 指示，不需要每个消费者各自重算。
pub struct Stores {
    pub conversation: ConversationStore,
    pub queries: QueryStore,
    pub reports: ReportStore,
    pub notifications: NotificationStore,
    pub ui: UiStore,
    pub any_loading: Derived<bool>,
    pub any_error: Derived<bool>,
}

impl Stores {
    pub fn open(db: &sled::Db) -> Self {
        let conversation = ConversationStore::new();
        let queries = QueryStore::open(db);
        let reports = ReportStore::new();
        let notifications = NotificationStore::new();
        let ui = UiStore::open(db);

        let any_loading = derive2(
            conversation.as_store(),
            reports.as_store(),
            |conv: &ConversationState, rep: &ReportState| conv.loading || rep.any_running(),
        );
        let any_error = derive3(
            conversation.as_store(),
            reports.as_store(),
            queries.as_store(),
            |conv: &ConversationState, rep: &ReportState, _q: &QueryState| {
                conv.error.is_some() || rep.any_failed()
            },
        );

        Self {
            conversation,
            queries,
            reports,
            notifications,
            ui,
            any_loading,
            any_error,
        }
    }

    /// 在指定路径打开持久化存储并构造容器集合
    pub fn open_at(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self::open(&db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn stores() -> Stores {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        Stores::open(&db)
    }

    #[test]
    fn test_any_loading_tracks_conversation_and_reports() {
        let s = stores();
        assert!(!s.any_loading.get());

        s.conversation.set_loading(true);
        assert!(s.any_loading.get());
        s.conversation.set_loading(false);
        assert!(!s.any_loading.get());

        s.reports.start_report_generation("J1", Uuid::new_v4());
        assert!(s.any_loading.get());
        s.reports.complete_report_generation("J1", "/r/J1");
        assert!(!s.any_loading.get());
    }

    #[test]
    fn test_any_error_tracks_failures() {
        let s = stores();
        assert!(!s.any_error.get());
        s.reports.start_report_generation("J1", Uuid::new_v4());
        s.reports.set_report_error("J1", "boom");
        assert!(s.any_error.get());
    }
}
