use reglens_core::Message;
use serde::{Deserialize, Serialize};

use crate::store::{Store, SubscriptionHandle};

/// 会话容器状态。消息只增不改，顺序即插入顺序，禁止重排。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub loading: bool,
    pub error: Option<String>,
}

/// 会话容器。消息的唯一合法写入口。
#[derive(Clone)]
pub struct ConversationStore {
    store: Store<ConversationState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(ConversationState::default()),
        }
    }

    pub fn add_message(&self, message: Message) {
        self.store.update(|s| s.messages.push(message.clone()));
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.update(|s| s.loading = loading);
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.store.update(|s| s.error = Some(error.clone()));
    }

    pub fn clear_error(&self) {
        self.store.update(|s| s.error = None);
    }

    pub fn get(&self) -> ConversationState {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&ConversationState) + Send + Sync + 'static,
    ) -> SubscriptionHandle<ConversationState> {
        self.store.subscribe(listener)
    }

    pub(crate) fn as_store(&self) -> &Store<ConversationState> {
        &self.store
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
