//! 流式更新通道：到后端的单条持久双工连接，
//! 承载长任务（报告生成）的进度/完成/错误事件。
//!
//! 订阅按主题（任务标识）路由，断线自动指数退避重连，
//! 断连期间出站帧进入有界 FIFO 缓冲。

mod backoff;
mod channel;
mod queue;
mod registry;

pub use backoff::Backoff;
pub use channel::{ChannelConfig, ChannelState, StreamChannel};
pub use queue::SendQueue;
pub use registry::{StreamSubscription, SubscriptionRegistry};
