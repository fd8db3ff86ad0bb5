use std::time::Duration;

use reglens_core::{Notification, NotificationAction, NotificationKind};
use uuid::Uuid;

use crate::store::{Store, SubscriptionHandle};

/// 通知容器。非常驻通知（duration_ms > 0）到期自动消失。
#[derive(Clone)]
pub struct NotificationStore {
    store: Store<Vec<Notification>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(Vec::new()),
        }
    }

    pub fn notify(&self, kind: NotificationKind, message: impl Into<String>, duration_ms: u64) -> Uuid {
        self.push(kind, message, duration_ms, None)
    }

    pub fn notify_with_action(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        duration_ms: u64,
        action: NotificationAction,
    ) -> Uuid {
        self.push(kind, message, duration_ms, Some(action))
    }

    fn push(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        duration_ms: u64,
        action: Option<NotificationAction>,
    ) -> Uuid {
        let notification = Notification {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            duration_ms,
            action,
        };
        let id = notification.id;
        self.store.update(|list| list.push(notification.clone()));

        // duration_ms == 0 为常驻通知，等待用户手动关闭
        if duration_ms > 0 {
            let store = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                store.dismiss(id);
            });
        }
        id
    }

    pub fn dismiss(&self, id: Uuid) {
        self.store.update(|list| list.retain(|n| n.id != id));
    }

    pub fn get(&self) -> Vec<Notification> {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Vec<Notification>) + Send + Sync + 'static,
    ) -> SubscriptionHandle<Vec<Notification>> {
        self.store.subscribe(listener)
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}
