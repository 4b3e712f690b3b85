use chrono::{DateTime, Utc};

use crate::{
    models::{TaskGroups, WorkerSnapshot},
    SchedulerResult,
};

/// 任务匹配策略接口
///
/// 实现必须是纯函数：不做I/O，对同一快照和同一时刻给出同样的结果。
pub trait MatchingStrategy: Send + Sync {
    /// 为 `workers[worker_index]` 选出最多一个任务，返回任务ID
    fn select_for(
        &self,
        workers: &[WorkerSnapshot],
        groups: &TaskGroups,
        worker_index: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<String>>;

    /// 获取策略名称
    fn name(&self) -> &str;
}
