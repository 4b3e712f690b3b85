//! # Scheduler Testing Utils
//!
//! 调度器各crate共用的测试工具：
//!
//! - **Mock消息队列**：记录发布、确认与拒绝，可按队列模拟发布失败
//! - **Mock查询服务**：固定时长与固定模型配置表
//! - **测试数据构建器**：任务、Worker快照与协议消息
//!
//! 作为dev-dependency引入：
//!
//! ```toml
//! [dev-dependencies]
//! scheduler-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
