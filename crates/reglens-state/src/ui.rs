use reglens_core::Sector;
use serde::{Deserialize, Serialize};

use crate::persist::PersistentStore;
use crate::store::SubscriptionHandle;

/// 持久化存储中 UI 偏好使用的槽位 key
pub const UI_PREFS_KEY: &str = "reglens.ui_prefs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiState {
    pub sidebar_open: bool,
    pub theme: String,
    pub selected_sector: Option<Sector>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            sidebar_open: true,
            theme: "light".into(),
            selected_sector: None,
        }
    }
}

/// UI 偏好容器，跨会话持久化。
#[derive(Clone)]
pub struct UiStore {
    store: PersistentStore<UiState>,
}

impl UiStore {
    pub fn open(db: &sled::Db) -> Self {
        Self {
            store: PersistentStore::open(db, UI_PREFS_KEY, UiState::default()),
        }
    }

    pub fn set_sidebar_open(&self, open: bool) {
        self.store.update(|s| s.sidebar_open = open);
    }

    pub fn set_theme(&self, theme: impl Into<String>) {
        let theme = theme.into();
        self.store.update(|s| s.theme = theme.clone());
    }

    pub fn set_selected_sector(&self, sector: Option<Sector>) {
        self.store.update(|s| s.selected_sector = sector.clone());
    }

    pub fn get(&self) -> UiState {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&UiState) + Send + Sync + 'static,
    ) -> SubscriptionHandle<UiState> {
        self.store.subscribe(listener)
    }
}
