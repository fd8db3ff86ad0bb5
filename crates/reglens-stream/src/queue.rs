use std::collections::VecDeque;
use std::sync::Mutex;

use reglens_core::ClientFrame;
use tracing::warn;

/// 断连期间的出站帧缓冲
///
/// 有界 FIFO：连接不在 OPEN 时出站帧进入队列而不是丢弃或报错，
/// 连接恢复后按原始发送顺序冲刷。队满采取淘汰最旧帧的显式策略
/// （记 warn 日志），绝不无界增长。
pub struct SendQueue {
    inner: Mutex<VecDeque<ClientFrame>>,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: ClientFrame) {
        let mut q = self.inner.lock().expect("queue poisoned");
        if q.len() >= self.capacity {
            q.pop_front();
            warn!(capacity = self.capacity, "出站队列已满，淘汰最旧帧");
        }
        q.push_back(frame);
    }

    /// 取出全部待发送帧（保持 FIFO 顺序）
    pub fn drain(&self) -> Vec<ClientFrame> {
        let mut q = self.inner.lock().expect("queue poisoned");
        q.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_preserved() {
        let q = SendQueue::new(8);
        q.push(ClientFrame::Subscribe { job_id: "a".into() });
        q.push(ClientFrame::Subscribe { job_id: "b".into() });
        q.push(ClientFrame::Ping);
        let drained = q.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(&drained[0], ClientFrame::Subscribe { job_id } if job_id == "a"));
        assert!(matches!(&drained[1], ClientFrame::Subscribe { job_id } if job_id == "b"));
        assert!(matches!(&drained[2], ClientFrame::Ping));
        assert!(q.is_empty());
    }

    #[test]
    fn test_oldest_first_eviction_when_full() {
        let q = SendQueue::new(2);
        q.push(ClientFrame::Subscribe { job_id: "1".into() });
        q.push(ClientFrame::Subscribe { job_id: "2".into() });
        q.push(ClientFrame::Subscribe { job_id: "3".into() });
        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(&drained[0], ClientFrame::Subscribe { job_id } if job_id == "2"));
        assert!(matches!(&drained[1], ClientFrame::Subscribe { job_id } if job_id == "3"));
    }
}
