use reglens_core::{Query, QueryType, Sector};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persist::PersistentStore;
use crate::store::{Store, SubscriptionHandle};

/// 持久化存储中查询容器使用的槽位 key
pub const QUERIES_KEY: &str = "reglens.queries";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryState {
    pub queries: Vec<Query>,
    pub sector_filter: Option<Sector>,
    pub type_filter: Option<QueryType>,
}

/// 已提交查询容器，跨会话持久化。
#[derive(Clone)]
pub struct QueryStore {
    store: PersistentStore<QueryState>,
}

impl QueryStore {
    pub fn open(db: &sled::Db) -> Self {
        Self {
            store: PersistentStore::open(db, QUERIES_KEY, QueryState::default()),
        }
    }

    pub fn add_query(&self, query: Query) {
        self.store.update(|s| s.queries.push(query.clone()));
    }

    /// 后端结果到达后原地更新
    pub fn update_query(
        &self,
        id: Uuid,
        response: impl Into<String>,
        confidence_score: Option<f32>,
    ) -> bool {
        let response = response.into();
        let mut found = false;
        self.store.update(|s| {
            if let Some(q) = s.queries.iter_mut().find(|q| q.id == id) {
                q.response = Some(response.clone());
                q.confidence_score = confidence_score;
                found = true;
            }
        });
        found
    }

    pub fn delete_query(&self, id: Uuid) -> bool {
        let mut removed = false;
        self.store.update(|s| {
            let before = s.queries.len();
            s.queries.retain(|q| q.id != id);
            removed = s.queries.len() != before;
        });
        removed
    }

    pub fn set_sector_filter(&self, sector: Option<Sector>) {
        self.store.update(|s| s.sector_filter = sector.clone());
    }

    pub fn set_type_filter(&self, query_type: Option<QueryType>) {
        self.store.update(|s| s.type_filter = query_type);
    }

    /// 应用当前筛选条件后的查询列表
    pub fn filtered(&self) -> Vec<Query> {
        let state = self.store.get();
        state
            .queries
            .into_iter()
            .filter(|q| match &state.sector_filter {
                Some(sector) => q.sector.as_ref() == Some(sector),
                None => true,
            })
            .filter(|q| match state.type_filter {
                Some(ty) => q.query_type == ty,
                None => true,
            })
            .collect()
    }

    pub fn get(&self) -> QueryState {
        self.store.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&QueryState) + Send + Sync + 'static,
    ) -> SubscriptionHandle<QueryState> {
        self.store.subscribe(listener)
    }

    pub(crate) fn as_store(&self) -> &Store<QueryState> {
        self.store.as_store()
    }
}
