use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use scheduler_core::{
    models::{Task, TaskGroups},
    SchedulerError, SchedulerResult,
};

/// 任务注册表
///
/// 保存所有尚未完成的任务，包括已分发但未收到结果的任务。
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
    failure_ceiling: u32,
}

impl TaskRegistry {
    pub fn new(failure_ceiling: u32) -> Self {
        Self {
            tasks: HashMap::new(),
            failure_ceiling,
        }
    }

    /// 加入任务
    ///
    /// ID冲突时新任务视为重复提交并替换旧任务，旧任务被返回，
    /// 由调用方负责释放其占用的Worker。
    pub fn add(&mut self, task: Task) -> SchedulerResult<Option<Task>> {
        if task.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("任务缺少ID".to_string()));
        }
        if task.required_type.trim().is_empty() {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {} 缺少模型类型",
                task.id
            )));
        }
        if task.origin.payload.is_empty() {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {} 缺少原始消息",
                task.id
            )));
        }

        let replaced = self.tasks.insert(task.id.clone(), task);
        if let Some(old) = &replaced {
            warn!(
                "任务 {} 重复提交，替换旧任务 (旧任务已分配Worker: {:?})",
                old.id, old.assigned_worker
            );
        }
        Ok(replaced)
    }

    /// Worker丢失后将任务退回待分发状态，失败次数加一
    pub fn requeue(&mut self, task_id: &str) -> SchedulerResult<&Task> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        task.assigned_worker = None;
        task.started = false;
        task.failure_count += 1;

        if task.is_exhausted(self.failure_ceiling) {
            warn!(
                "任务 {} 已失败 {} 次，达到上限，不再参与匹配",
                task.id, task.failure_count
            );
        } else {
            debug!("任务 {} 重新入队 (失败次数: {})", task.id, task.failure_count);
        }

        Ok(task)
    }

    /// 标记任务已分发到Worker
    pub fn mark_started(&mut self, task_id: &str, worker: &str) -> SchedulerResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        task.assigned_worker = Some(worker.to_string());
        task.started = true;
        Ok(())
    }

    /// 记录任务结果转发失败的时间，保留首次记录
    pub fn mark_forward_failed(&mut self, task_id: &str, now: DateTime<Utc>) -> SchedulerResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        task.forward_failed_at.get_or_insert(now);
        Ok(())
    }

    /// 转发失败后等待重新投递超过 `threshold_seconds` 的任务ID
    pub fn unredelivered(&self, now: DateTime<Utc>, threshold_seconds: i64) -> Vec<String> {
        let threshold = Duration::seconds(threshold_seconds);
        let mut ids: Vec<String> = self
            .tasks
            .values()
            .filter(|t| {
                t.forward_failed_at
                    .map(|failed_at| now - failed_at >= threshold)
                    .unwrap_or(false)
            })
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// 待匹配任务快照：未开始且未达失败上限，按模型类型分组，组内按到达时间升序
    pub fn snapshot(&self) -> TaskGroups {
        let mut groups = TaskGroups::new();
        for task in self
            .tasks
            .values()
            .filter(|t| t.is_pending(self.failure_ceiling))
        {
            groups
                .entry(task.required_type.clone())
                .or_default()
                .push(task.view());
        }

        for group in groups.values_mut() {
            group.sort_by(|a, b| a.arrived_at.cmp(&b.arrived_at).then_with(|| a.id.cmp(&b.id)));
        }

        groups
    }

    /// 已达失败上限的任务ID
    pub fn exhausted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .values()
            .filter(|t| !t.started && t.is_exhausted(self.failure_ceiling))
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn remove(&mut self, task_id: &str) -> Option<Task> {
        self.tasks.remove(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.is_pending(self.failure_ceiling))
            .count()
    }

    pub fn failure_ceiling(&self) -> u32 {
        self.failure_ceiling
    }
}
