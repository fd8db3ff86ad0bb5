use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::store::{Store, SubscriptionHandle};

/// 持久化容器包装
///
/// 构造时从 sled 的指定 key 读回上次的值，缺失或无法解析则回退默认值；
/// 之后每次 set 都序列化写回同一个 key。写入失败（如配额）只记日志，
/// 内存值照常更新，绝不向调用方抛错。
pub struct PersistentStore<T> {
    store: Store<T>,
    db: sled::Db,
    key: String,
}

impl<T> Clone for PersistentStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            db: self.db.clone(),
            key: self.key.clone(),
        }
    }
}

impl<T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static> PersistentStore<T> {
    pub fn open(db: &sled::Db, key: &str, default: T) -> Self {
        let initial = db
            .get(key)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_slice(&v).ok())
            .unwrap_or(default);
        Self {
            store: Store::new(initial),
            db: db.clone(),
            key: key.to_string(),
        }
    }

    pub fn get(&self) -> T {
        self.store.get()
    }

    pub fn set(&self, value: T) {
        self.write_back(&value);
        self.store.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.store.get();
        f(&mut value);
        self.set(value);
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionHandle<T> {
        self.store.subscribe(listener)
    }

    /// 内部容器，供派生计算使用
    pub fn as_store(&self) -> &Store<T> {
        &self.store
    }

    fn write_back(&self, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                warn!(key = %self.key, error = %e, "持久化序列化失败，仅保留内存值");
                return;
            }
        };
        if let Err(e) = self.db.insert(self.key.as_bytes(), bytes) {
            warn!(key = %self.key, error = %e, "持久化写入失败，仅保留内存值");
            return;
        }
        if let Err(e) = self.db.flush() {
            warn!(key = %self.key, error = %e, "持久化 flush 失败");
        }
    }
}
