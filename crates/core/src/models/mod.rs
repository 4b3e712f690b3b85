//! # 数据模型
//!
//! 调度引擎使用的核心数据结构：
//!
//! - [`Worker`]：已知的远程Worker进程，以其私有回复队列名作为唯一标识
//! - [`Task`]：等待分发或正在处理的转写任务
//! - [`RegistrationMessage`] / [`WorkItem`]：入站协议消息
//! - [`Delivery`] / [`OutboundMessage`]：与具体消息中间件无关的收发信封
//! - [`WorkerSnapshot`] / [`TaskGroups`]：交给匹配策略的一致性快照
//!
//! 所有时间字段统一使用 `DateTime<Utc>`，耗时统一以秒（`f64`）表示。

pub mod message;
pub mod task;
pub mod worker;

pub use message::*;
pub use task::*;
pub use worker::*;
