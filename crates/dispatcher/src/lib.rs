//! 转写任务调度引擎
//!
//! 维护Worker与任务两个注册表，在状态变化时运行基于代价的匹配策略，
//! 把任务分发到各Worker的私有队列并将结果转发回调用方。

pub mod controller;
pub mod state;
pub mod state_listener;
pub mod strategies;
pub mod task_registry;
pub mod worker_failure_detector;
pub mod worker_registry;

pub use controller::DispatchController;
pub use state::{ResponseDisposition, SchedulerSignal, SchedulerState, SharedState, SweepReport};
pub use state_listener::{ListenerQueues, StateListener};
pub use strategies::{CostBasedStrategy, CostModel, UNAVAILABLE_COST};
pub use task_registry::TaskRegistry;
pub use worker_failure_detector::{
    DetectionReport, WorkerFailureDetector, WorkerFailureDetectorConfig,
};
pub use worker_registry::{BeatOutcome, WorkerRegistry};
