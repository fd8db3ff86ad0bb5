use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reglens_core::StreamEvent;
use tracing::debug;

pub type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync + 'static>;

struct Entry {
    id: u64,
    once: bool,
    handler: Handler,
}

struct RegistryInner {
    topics: HashMap<String, Vec<Entry>>,
    next_id: u64,
}

/// 按主题（任务标识）路由事件到已注册处理器
///
/// 独立于套接字存在，订阅在重连之间全部保留。终态事件投递后该主题的
/// 所有订阅自动移除，调用方不会二次处理终态。
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

/// 显式订阅凭据，配合 `unsubscribe` 做确定性拆除。
#[derive(Debug, Clone)]
pub struct StreamSubscription {
    pub(crate) topic: String,
    pub(crate) id: u64,
}

impl StreamSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                topics: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> StreamSubscription {
        self.insert(topic.into(), Arc::new(handler), false)
    }

    /// 首次投递后自动退订，用于终态事件（完成/错误）。
    pub fn once(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> StreamSubscription {
        self.insert(topic.into(), Arc::new(handler), true)
    }

    fn insert(&self, topic: String, handler: Handler, once: bool) -> StreamSubscription {
        let mut inner = self.inner.lock().expect("registry poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .topics
            .entry(topic.clone())
            .or_default()
            .push(Entry { id, once, handler });
        StreamSubscription { topic, id }
    }

    pub fn unsubscribe(&self, sub: &StreamSubscription) {
        let mut inner = self.inner.lock().expect("registry poisoned");
        if let Some(entries) = inner.topics.get_mut(&sub.topic) {
            entries.retain(|e| e.id != sub.id);
            if entries.is_empty() {
                inner.topics.remove(&sub.topic);
            }
        }
    }

    /// 将入站事件投递给该主题的全部处理器（注册顺序），返回投递数。
    ///
    /// 未知主题静默丢弃（对服务端先行发布的任务保持前向兼容）。
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let topic = match event.topic() {
            Some(t) => t.to_string(),
            None => return 0,
        };
        let handlers: Vec<Handler> = {
            let mut inner = self.inner.lock().expect("registry poisoned");
            let entries = match inner.topics.get_mut(&topic) {
                Some(e) => e,
                None => {
                    debug!(topic, "没有该主题的订阅，丢弃事件");
                    return 0;
                }
            };
            let snapshot = entries.iter().map(|e| Arc::clone(&e.handler)).collect();
            if event.is_terminal() {
                // 终态后同一任务不会再有事件，整个主题拆除
                inner.topics.remove(&topic);
            } else {
                entries.retain(|e| !e.once);
            }
            snapshot
        };
        let delivered = handlers.len();
        for h in handlers {
            h(event);
        }
        delivered
    }

    /// 当前仍有订阅的主题（重连后用于向服务端重新声明）
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("registry poisoned")
            .topics
            .keys()
            .cloned()
            .collect()
    }

    pub fn topic_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .expect("registry poisoned")
            .topics
            .get(topic)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn progress(job_id: &str, progress: u8) -> StreamEvent {
        StreamEvent::ReportProgress {
            job_id: job_id.into(),
            stage: "analysis".into(),
            progress,
        }
    }

    #[test]
    fn test_dispatch_routes_by_topic() {
        let reg = SubscriptionRegistry::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = reg.subscribe("J1", move |ev| {
            if let StreamEvent::ReportProgress { progress, .. } = ev {
                s.lock().unwrap().push(*progress);
            }
        });
        assert_eq!(reg.dispatch(&progress("J1", 10)), 1);
        assert_eq!(reg.dispatch(&progress("J2", 99)), 0); // 无订阅，丢弃
        assert_eq!(*seen.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_once_fires_exactly_one_time() {
        let reg = SubscriptionRegistry::new();
        let hits = Arc::new(StdMutex::new(0u32));
        let h = Arc::clone(&hits);
        reg.once("J1", move |_| *h.lock().unwrap() += 1);
        reg.dispatch(&progress("J1", 10));
        reg.dispatch(&progress("J1", 20));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_terminal_event_tears_down_topic() {
        let reg = SubscriptionRegistry::new();
        let hits = Arc::new(StdMutex::new(0u32));
        let h = Arc::clone(&hits);
        reg.subscribe("J1", move |_| *h.lock().unwrap() += 1);
        reg.dispatch(&StreamEvent::ReportCompleted {
            job_id: "J1".into(),
            result_path: "/r/J1".into(),
        });
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(reg.topic_count("J1"), 0);
        // 终态之后的事件不再投递
        reg.dispatch(&progress("J1", 100));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe_is_deterministic() {
        let reg = SubscriptionRegistry::new();
        let hits = Arc::new(StdMutex::new(0u32));
        let h = Arc::clone(&hits);
        let sub = reg.subscribe("J1", move |_| *h.lock().unwrap() += 1);
        reg.dispatch(&progress("J1", 5));
        reg.unsubscribe(&sub);
        reg.dispatch(&progress("J1", 10));
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let reg = SubscriptionRegistry::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        reg.subscribe("J1", move |_| o1.lock().unwrap().push(1));
        let o2 = Arc::clone(&order);
        reg.subscribe("J1", move |_| o2.lock().unwrap().push(2));
        reg.dispatch(&progress("J1", 50));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
