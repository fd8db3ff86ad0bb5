//! 网关请求客户端：有界调用、统一重试、错误还原。
//!
//! UI 代码通过 `ApiClient` 访问网关的全部操作；超时按操作分级，
//! 幂等读取统一走 `retry_with_backoff`，所有失败都以 `RegError`
//! 形式呈现，原始传输异常不出本层。

mod api;
mod bound;
mod retry;

pub use api::{ApiClient, ApiClientConfig, DownloadedFile};
pub use bound::{bounded, OpClass, TimeoutConfig};
pub use retry::{retry_with_backoff, RetryPolicy};
