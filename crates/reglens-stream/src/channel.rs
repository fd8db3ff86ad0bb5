use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reglens_core::{ClientFrame, StreamEvent};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::queue::SendQueue;
use crate::registry::{StreamSubscription, SubscriptionRegistry};

/// 连接状态机：DISCONNECTED → CONNECTING → OPEN → (CLOSING) → DISCONNECTED，
/// 意外断开时 OPEN → CONNECTING 自动迁移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub ping_interval: Duration,
    pub liveness_window: Duration,
    pub queue_capacity: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: Duration::from_secs(15),
            liveness_window: Duration::from_secs(45),
            queue_capacity: 256,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

struct ChannelShared {
    config: ChannelConfig,
    registry: SubscriptionRegistry,
    queue: SendQueue,
    state: Mutex<ChannelState>,
    send_wake: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl ChannelShared {
    fn set_state(&self, next: ChannelState) {
        *self.state.lock().expect("state poisoned") = next;
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().expect("state poisoned")
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<StreamEvent>(text) {
            Ok(StreamEvent::Pong) => {}
            Ok(event) => {
                self.registry.dispatch(&event);
            }
            Err(e) => {
                // 未识别的事件类型：丢弃，不向上层报错（前向兼容）
                debug!(error = %e, "无法解析的下行帧，丢弃");
            }
        }
    }
}

/// 流式更新通道
///
/// 单条到后端的持久双工连接，只承载长任务的进度/完成/错误事件。
/// 连接失败从不以异常形式抛给调用方，只能通过 `state()` 与自动重连
/// 行为观察到；一直收不到终态的订阅由调用方自行超时。
#[derive(Clone)]
pub struct StreamChannel {
    shared: Arc<ChannelShared>,
}

impl StreamChannel {
    /// 建立通道并启动后台驱动任务。句柄可廉价克隆。
    pub fn connect(config: ChannelConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(ChannelShared {
            queue: SendQueue::new(config.queue_capacity),
            registry: SubscriptionRegistry::new(),
            state: Mutex::new(ChannelState::Disconnected),
            send_wake: Notify::new(),
            shutdown_tx,
            config,
        });
        let driver = Arc::clone(&shared);
        tokio::spawn(async move {
            drive(driver, shutdown_rx).await;
        });
        Self { shared }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// 发送上行帧。断连期间进入有界 FIFO 队列，恢复 OPEN 后按序冲刷。
    pub fn send(&self, frame: ClientFrame) {
        self.shared.queue.push(frame);
        if self.shared.state() == ChannelState::Open {
            self.shared.send_wake.notify_one();
        }
    }

    /// 订阅某任务的事件；该主题首个订阅会向服务端声明。
    pub fn subscribe(
        &self,
        job_id: impl Into<String>,
        handler: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> StreamSubscription {
        let job_id = job_id.into();
        let first = self.shared.registry.topic_count(&job_id) == 0;
        let sub = self.shared.registry.subscribe(job_id.clone(), handler);
        if first {
            self.send(ClientFrame::Subscribe { job_id });
        }
        sub
    }

    /// 首次投递后自动退订，用于终态事件。
    pub fn once(
        &self,
        job_id: impl Into<String>,
        handler: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> StreamSubscription {
        let job_id = job_id.into();
        let first = self.shared.registry.topic_count(&job_id) == 0;
        let sub = self.shared.registry.once(job_id.clone(), handler);
        if first {
            self.send(ClientFrame::Subscribe { job_id });
        }
        sub
    }

    pub fn unsubscribe(&self, sub: &StreamSubscription) {
        self.shared.registry.unsubscribe(sub);
        if self.shared.registry.topic_count(sub.topic()) == 0 {
            self.send(ClientFrame::Unsubscribe {
                job_id: sub.topic().to_string(),
            });
        }
    }

    /// 调用方显式关闭；之后不再重连。
    pub fn disconnect(&self) {
        self.shared.set_state(ChannelState::Closing);
        let _ = self.shared.shutdown_tx.send(true);
    }
}

async fn drive(shared: Arc<ChannelShared>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(shared.config.backoff_base, shared.config.backoff_max);
    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(ChannelState::Connecting);
        match connect_async(&shared.config.url).await {
            Ok((ws, _)) => {
                info!(url = %shared.config.url, "流式通道已建立");
                shared.set_state(ChannelState::Open);
                backoff.reset();
                // 重连后向服务端重新声明存量订阅，再冲刷断连期间积压的帧
                for topic in shared.registry.topics() {
                    shared.queue.push(ClientFrame::Subscribe { job_id: topic });
                }
                shared.send_wake.notify_one();
                let explicit_close = run_open(&shared, ws, &mut shutdown).await;
                if explicit_close {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, attempts = backoff.attempts(), "连接失败");
            }
        }
        if *shutdown.borrow() {
            break;
        }
        // 意外断开是 OPEN → CONNECTING 的自动迁移：退避等待期间保持
        // CONNECTING，不回落 DISCONNECTED（那是显式关闭后的终点）
        shared.set_state(ChannelState::Connecting);
        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    shared.set_state(ChannelState::Disconnected);
}

/// OPEN 状态下的收发循环。返回 true 表示调用方显式关闭，不再重连。
async fn run_open(
    shared: &Arc<ChannelShared>,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut stream) = ws.split();
    let mut ping = tokio::time::interval(shared.config.ping_interval);
    let mut last_activity = Instant::now();
    loop {
        tokio::select! {
            _ = shared.send_wake.notified() => {
                for frame in shared.queue.drain() {
                    let text = match serde_json::to_string(&frame) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!(error = %e, "上行帧序列化失败，跳过");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        return false;
                    }
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    last_activity = Instant::now();
                    shared.handle_text(&text);
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    last_activity = Instant::now();
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("对端关闭连接，转入重连");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "读取失败，转入重连");
                    return false;
                }
            },
            _ = ping.tick() => {
                // 心跳窗口内毫无活动视为静默死连接，强制 OPEN → CONNECTING
                if last_activity.elapsed() > shared.config.liveness_window {
                    warn!("心跳窗口内无任何活动，强制重连");
                    return false;
                }
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    return false;
                }
            }
            _ = shutdown.changed() => {
                shared.set_state(ChannelState::Closing);
                let _ = sink.send(WsMessage::Close(None)).await;
                return true;
            }
        }
    }
}
