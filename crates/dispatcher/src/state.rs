use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use scheduler_config::DispatcherConfig;
use scheduler_core::{
    models::{
        OutboundMessage, RegistrationKind, RegistrationMessage, Task, TaskGroups, Worker,
        WorkerSnapshot,
    },
    traits::MessageQueue,
    SchedulerError, SchedulerResult,
};

use crate::task_registry::TaskRegistry;
use crate::worker_registry::{BeatOutcome, WorkerRegistry};

/// 发布消息的默认超时
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// 多个循环共享的调度状态
pub type SharedState = Arc<Mutex<SchedulerState>>;

/// 状态变更信号
///
/// 基于 `Notify::notify_one`，最多保存一个许可，
/// 多次并发通知会合并为一次调度。
#[derive(Debug, Clone, Default)]
pub struct SchedulerSignal {
    notify: Arc<Notify>,
}

impl SchedulerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// 响应消息的确认方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Ack,
    Nack { requeue: bool },
}

/// 一次清理的结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub removed_workers: Vec<String>,
    pub requeued_tasks: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.removed_workers.is_empty() && self.requeued_tasks.is_empty()
    }
}

/// Worker注册表与任务注册表的联合状态，由同一把锁保护
///
/// `start_on` 与 `process_response` 在持锁期间等待发布确认，
/// 分发与完成因此是原子的；单次发布最多等待 `publish_timeout`。
#[derive(Debug)]
pub struct SchedulerState {
    pub workers: WorkerRegistry,
    pub tasks: TaskRegistry,
    response_queue: String,
    publish_timeout: Duration,
}

impl SchedulerState {
    pub fn new(
        stale_after_seconds: i64,
        failure_ceiling: u32,
        response_queue: impl Into<String>,
    ) -> Self {
        Self {
            workers: WorkerRegistry::new(stale_after_seconds),
            tasks: TaskRegistry::new(failure_ceiling),
            response_queue: response_queue.into(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn from_config(config: &DispatcherConfig, response_queue: impl Into<String>) -> Self {
        Self::new(
            config.heartbeat_stale_seconds,
            config.max_task_failures,
            response_queue,
        )
        .with_publish_timeout(Duration::from_secs(config.publish_timeout_seconds))
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn response_queue(&self) -> &str {
        &self.response_queue
    }

    /// 处理注册/心跳/退出消息，返回状态是否发生变化
    pub fn apply_registration(
        &mut self,
        message: &RegistrationMessage,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        match message.r#type {
            RegistrationKind::Register | RegistrationKind::Beat => {
                let beat_at = message.sent_at()?;
                let outcome = self.workers.register_beat(&message.queue, beat_at, now);
                Ok(outcome != BeatOutcome::Stale)
            }
            RegistrationKind::Exit => Ok(self.exit_worker(&message.queue).is_some()),
        }
    }

    /// Worker退出，其持有的任务重新入队，返回被重新入队的任务ID
    pub fn exit_worker(&mut self, queue: &str) -> Option<Vec<String>> {
        let worker = self.workers.exit(queue)?;
        Some(self.requeue_held(vec![worker]))
    }

    /// 移除静默时间达到阈值的Worker并将其任务重新入队
    pub fn sweep(&mut self, now: DateTime<Utc>, threshold_seconds: i64) -> SweepReport {
        let removed = self.workers.sweep(now, threshold_seconds);
        if removed.is_empty() {
            return SweepReport::default();
        }

        let removed_workers = removed.iter().map(|w| w.queue.clone()).collect::<Vec<_>>();
        for queue in &removed_workers {
            info!("Worker {} 心跳超时，已移除", queue);
        }
        let requeued_tasks = self.requeue_held(removed);

        SweepReport {
            removed_workers,
            requeued_tasks,
        }
    }

    /// 调度前剔除超过心跳过期时间的Worker
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> SweepReport {
        let threshold = self.workers.stale_after_seconds();
        self.sweep(now, threshold)
    }

    fn requeue_held(&mut self, workers: Vec<Worker>) -> Vec<String> {
        let mut requeued = Vec::new();
        for worker in workers {
            let Some(task_id) = worker.current_task else {
                continue;
            };

            let assigned_here = self
                .tasks
                .get(&task_id)
                .map(|t| t.assigned_worker.as_deref() == Some(worker.queue.as_str()))
                .unwrap_or(false);
            if !assigned_here {
                debug!(
                    "Worker {} 持有的任务 {} 已不在跟踪中或已转移，跳过",
                    worker.queue, task_id
                );
                continue;
            }

            match self.tasks.requeue(&task_id) {
                Ok(_) => {
                    warn!("Worker {} 丢失，任务 {} 重新入队", worker.queue, task_id);
                    requeued.push(task_id);
                }
                Err(e) => error!("任务 {} 重新入队失败: {}", task_id, e),
            }
        }
        requeued
    }

    /// 加入新任务
    ///
    /// 同ID的旧任务若仍占用Worker，则释放该Worker。
    pub fn add_task(&mut self, task: Task, now: DateTime<Utc>) -> SchedulerResult<()> {
        if let Some(old) = self.tasks.add(task)? {
            if let Some(queue) = old.assigned_worker.as_deref() {
                if self.workers.release_if_holding(queue, &old.id, now) {
                    info!("释放被重复任务 {} 占用的Worker {}", old.id, queue);
                }
            }
        }
        Ok(())
    }

    pub fn worker_snapshot(&self, now: DateTime<Utc>) -> Vec<WorkerSnapshot> {
        self.workers.snapshot(now)
    }

    pub fn task_snapshot(&self) -> TaskGroups {
        self.tasks.snapshot()
    }

    async fn publish(
        &self,
        sender: &dyn MessageQueue,
        queue: &str,
        message: &OutboundMessage,
    ) -> SchedulerResult<()> {
        tokio::time::timeout(self.publish_timeout, sender.publish_message(queue, message))
            .await
            .map_err(|_| {
                SchedulerError::MessageQueue(format!(
                    "发布到队列 {queue} 超时 ({:?})",
                    self.publish_timeout
                ))
            })?
    }

    /// 将任务分发给Worker
    ///
    /// 发布成功后才修改状态；发布失败或超时时两个注册表均保持不变。
    pub async fn start_on(
        &mut self,
        task_id: &str,
        worker_queue: &str,
        sender: &dyn MessageQueue,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        if task.started {
            return Err(SchedulerError::InvalidTask(format!(
                "任务 {task_id} 已分发给 {:?}",
                task.assigned_worker
            )));
        }

        let worker = self
            .workers
            .get(worker_queue)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                queue: worker_queue.to_string(),
            })?;
        if worker.busy {
            return Err(SchedulerError::WorkerBusy {
                queue: worker_queue.to_string(),
                task_id: worker.current_task.clone(),
            });
        }

        let message = OutboundMessage::new(task.origin.payload.clone())
            .with_correlation_id(task.id.clone())
            .with_reply_to(self.response_queue.clone());
        self.publish(sender, worker_queue, &message).await?;

        let task = task.clone();
        self.workers.mark_busy(worker_queue, &task, now)?;
        self.tasks.mark_started(task_id, worker_queue)?;

        info!(
            "任务 {} (类型: {}) 已分发到Worker {}",
            task_id, task.required_type, worker_queue
        );
        Ok(())
    }

    /// 处理Worker返回的结果
    ///
    /// 未知ID返回 `UnknownCorrelation`。转发失败时，首次投递重新入队等待重试并记录失败时间，
    /// 重新投递的消息不再入队，任务随之移除。
    pub async fn process_response(
        &mut self,
        correlation_id: &str,
        body: &[u8],
        redelivered: bool,
        sender: &dyn MessageQueue,
        now: DateTime<Utc>,
    ) -> SchedulerResult<ResponseDisposition> {
        let task = self
            .tasks
            .get(correlation_id)
            .ok_or_else(|| SchedulerError::UnknownCorrelation {
                correlation_id: correlation_id.to_string(),
            })?;

        let assigned_worker = task.assigned_worker.clone();
        let forward = match task.origin.reply_to.as_deref() {
            Some(reply_to) => {
                let message = OutboundMessage::new(body.to_vec()).with_correlation_id(
                    task.origin
                        .correlation_id
                        .clone()
                        .unwrap_or_else(|| task.id.clone()),
                );
                self.publish(sender, reply_to, &message)
                    .await
                    .map_err(|e| (reply_to.to_string(), e))
            }
            None => {
                debug!("任务 {} 没有回复路由，结果不转发", correlation_id);
                Ok(())
            }
        };

        if let Some(queue) = assigned_worker.as_deref() {
            self.workers.release_if_holding(queue, correlation_id, now);
        }

        match forward {
            Ok(()) => {
                self.tasks.remove(correlation_id);
                debug!("任务 {} 已完成", correlation_id);
                Ok(ResponseDisposition::Ack)
            }
            Err((reply_to, e)) if redelivered => {
                error!(
                    "任务 {} 的结果再次转发到 {} 失败，放弃: {}",
                    correlation_id, reply_to, e
                );
                self.tasks.remove(correlation_id);
                Ok(ResponseDisposition::Nack { requeue: false })
            }
            Err((reply_to, e)) => {
                error!(
                    "任务 {} 的结果转发到 {} 失败，等待重新投递: {}",
                    correlation_id, reply_to, e
                );
                self.tasks.mark_forward_failed(correlation_id, now)?;
                Ok(ResponseDisposition::Nack { requeue: true })
            }
        }
    }

    /// 移除已达失败上限的任务
    pub fn evict_exhausted(&mut self) -> Vec<Task> {
        self.tasks
            .exhausted()
            .into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .collect()
    }

    /// 移除转发失败后超过 `threshold_seconds` 仍未收到重新投递结果的任务
    pub fn evict_unredelivered(&mut self, now: DateTime<Utc>, threshold_seconds: i64) -> Vec<Task> {
        self.tasks
            .unredelivered(now, threshold_seconds)
            .into_iter()
            .filter_map(|id| self.tasks.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use scheduler_core::models::{MessageOrigin, ModelProfile};
    use scheduler_testing_utils::MockMessageQueue;

    fn task(id: &str, reply_to: Option<&str>) -> Task {
        let profile = ModelProfile {
            model_type: "A".to_string(),
            real_time_factor: 0.5,
            load_seconds: 20.0,
        };
        Task::new(
            id,
            &profile,
            60.0,
            Utc::now(),
            MessageOrigin {
                payload: br#"{"id":"x","profile":"p"}"#.to_vec(),
                reply_to: reply_to.map(str::to_string),
                correlation_id: Some(format!("caller-{id}")),
            },
        )
    }

    fn state_with_worker(now: DateTime<Utc>) -> SchedulerState {
        let mut state = SchedulerState::new(120, 3, "responses");
        state.workers.register_beat("w1", now, now);
        state
    }

    #[tokio::test]
    async fn test_start_on_publishes_and_marks() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        state.add_task(task("t1", None), now).unwrap();

        state.start_on("t1", "w1", &mq, now).await.unwrap();

        let published = mq.published("w1");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].correlation_id.as_deref(), Some("t1"));
        assert_eq!(published[0].reply_to.as_deref(), Some("responses"));
        assert!(state.workers.get("w1").unwrap().busy);
        assert!(state.tasks.get("t1").unwrap().started);
    }

    #[tokio::test]
    async fn test_start_on_failure_changes_nothing() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        mq.fail_queue("w1");
        let mut state = state_with_worker(now);
        state.add_task(task("t1", None), now).unwrap();

        assert!(state.start_on("t1", "w1", &mq, now).await.is_err());
        assert!(!state.workers.get("w1").unwrap().busy);
        let t = state.tasks.get("t1").unwrap();
        assert!(!t.started);
        assert_eq!(t.failure_count, 0);
    }

    #[tokio::test]
    async fn test_start_on_huge_duration_commits_dispatch() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        let mut huge = task("t1", None);
        huge.expected_duration = 1e15;
        state.add_task(huge, now).unwrap();

        state.start_on("t1", "w1", &mq, now).await.unwrap();

        assert_eq!(mq.published("w1").len(), 1);
        let worker = state.workers.get("w1").unwrap();
        assert!(worker.busy);
        assert_eq!(worker.current_task.as_deref(), Some("t1"));
        assert!(worker.projected_free_at > now);
        assert!(state.tasks.get("t1").unwrap().started);
    }

    #[tokio::test]
    async fn test_start_on_stalled_publish_times_out() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        mq.stall_queue("w1");
        let mut state = state_with_worker(now).with_publish_timeout(Duration::from_millis(50));
        state.add_task(task("t1", None), now).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            state.start_on("t1", "w1", &mq, now),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(SchedulerError::MessageQueue(_))));
        assert!(!state.workers.get("w1").unwrap().busy);
        assert!(!state.tasks.get("t1").unwrap().started);
    }

    #[tokio::test]
    async fn test_unredelivered_response_task_is_evicted() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        state.add_task(task("t1", Some("caller")), now).unwrap();
        state.start_on("t1", "w1", &mq, now).await.unwrap();
        mq.fail_queue("caller");

        let first = state
            .process_response("t1", b"r", false, &mq, now)
            .await
            .unwrap();
        assert_eq!(first, ResponseDisposition::Nack { requeue: true });
        assert_eq!(state.tasks.get("t1").unwrap().forward_failed_at, Some(now));

        assert!(state
            .evict_unredelivered(now + ChronoDuration::seconds(50), 100)
            .is_empty());
        let evicted = state.evict_unredelivered(now + ChronoDuration::seconds(100), 100);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "t1");
        assert!(state.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_second_response_is_unknown() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        state.add_task(task("t1", Some("caller")), now).unwrap();
        state.start_on("t1", "w1", &mq, now).await.unwrap();

        let first = state
            .process_response("t1", b"result", false, &mq, now)
            .await
            .unwrap();
        assert_eq!(first, ResponseDisposition::Ack);
        let forwarded = mq.published("caller");
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].body, b"result".to_vec());
        assert_eq!(forwarded[0].correlation_id.as_deref(), Some("caller-t1"));
        assert!(!state.workers.get("w1").unwrap().busy);

        let second = state
            .process_response("t1", b"result", false, &mq, now)
            .await;
        assert!(matches!(
            second,
            Err(SchedulerError::UnknownCorrelation { .. })
        ));
        assert_eq!(mq.published("caller").len(), 1);
    }

    #[tokio::test]
    async fn test_forward_failure_requeues_once() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        state.add_task(task("t1", Some("caller")), now).unwrap();
        state.start_on("t1", "w1", &mq, now).await.unwrap();
        mq.fail_queue("caller");

        let first = state
            .process_response("t1", b"r", false, &mq, now)
            .await
            .unwrap();
        assert_eq!(first, ResponseDisposition::Nack { requeue: true });
        // 任务保留以便处理重新投递的结果，Worker已释放
        assert!(state.tasks.get("t1").is_some());
        assert!(!state.workers.get("w1").unwrap().busy);

        let second = state
            .process_response("t1", b"r", true, &mq, now)
            .await
            .unwrap();
        assert_eq!(second, ResponseDisposition::Nack { requeue: false });
        assert!(state.tasks.get("t1").is_none());
    }

    #[tokio::test]
    async fn test_redelivered_response_forwarded_after_recovery() {
        let now = Utc::now();
        let mq = MockMessageQueue::new();
        let mut state = state_with_worker(now);
        state.add_task(task("t1", Some("caller")), now).unwrap();
        state.start_on("t1", "w1", &mq, now).await.unwrap();

        mq.fail_queue("caller");
        state
            .process_response("t1", b"r", false, &mq, now)
            .await
            .unwrap();
        mq.recover_queue("caller");

        let retry = state
            .process_response("t1", b"r", true, &mq, now)
            .await
            .unwrap();
        assert_eq!(retry, ResponseDisposition::Ack);
        assert_eq!(mq.published("caller").len(), 1);
    }

    #[test]
    fn test_exit_while_holding_requeues() {
        let now = Utc::now();
        let mut state = state_with_worker(now);
        let t = task("x", None);
        state.add_task(t.clone(), now).unwrap();
        state.workers.mark_busy("w1", &t, now).unwrap();
        state.tasks.mark_started("x", "w1").unwrap();

        let requeued = state.exit_worker("w1").unwrap();
        assert_eq!(requeued, vec!["x".to_string()]);

        let x = state.tasks.get("x").unwrap();
        assert_eq!(x.failure_count, 1);
        assert!(x.assigned_worker.is_none());
        assert!(!x.started);
        assert_eq!(state.task_snapshot()["A"].len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_silent_worker() {
        let now = Utc::now();
        let mut state = SchedulerState::new(1000, 3, "responses");
        state
            .workers
            .register_beat("old", now - ChronoDuration::seconds(150), now);
        state
            .workers
            .register_beat("fresh", now - ChronoDuration::seconds(50), now);
        let t = task("t1", None);
        state.add_task(t.clone(), now).unwrap();
        state.workers.mark_busy("old", &t, now).unwrap();
        state.tasks.mark_started("t1", "old").unwrap();

        let report = state.sweep(now, 100);
        assert_eq!(report.removed_workers, vec!["old".to_string()]);
        assert_eq!(report.requeued_tasks, vec!["t1".to_string()]);
        assert!(state.workers.contains("fresh"));
        assert_eq!(state.tasks.get("t1").unwrap().failure_count, 1);
    }

    #[test]
    fn test_duplicate_task_frees_worker() {
        let now = Utc::now();
        let mut state = state_with_worker(now);
        let t = task("t1", None);
        state.add_task(t.clone(), now).unwrap();
        state.workers.mark_busy("w1", &t, now).unwrap();
        state.tasks.mark_started("t1", "w1").unwrap();

        state.add_task(task("t1", None), now).unwrap();
        assert!(!state.workers.get("w1").unwrap().busy);
        assert!(!state.tasks.get("t1").unwrap().started);
    }

    #[test]
    fn test_evict_exhausted() {
        let now = Utc::now();
        let mut state = SchedulerState::new(120, 1, "responses");
        state.add_task(task("t1", Some("caller")), now).unwrap();
        state.add_task(task("t2", None), now).unwrap();
        state.tasks.requeue("t1").unwrap();

        let evicted = state.evict_exhausted();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "t1");
        assert!(state.tasks.get("t1").is_none());
        assert!(state.tasks.get("t2").is_some());
    }

    #[test]
    fn test_apply_registration() {
        let now = Utc::now();
        let mut state = SchedulerState::new(120, 3, "responses");
        let beat = RegistrationMessage {
            queue: "w1".to_string(),
            r#type: RegistrationKind::Register,
            timestamp: now.timestamp(),
        };
        assert!(state.apply_registration(&beat, now).unwrap());
        assert!(state.apply_registration(&beat, now).unwrap());
        assert_eq!(state.workers.len(), 1);

        let stale = RegistrationMessage {
            queue: "w2".to_string(),
            r#type: RegistrationKind::Beat,
            timestamp: now.timestamp() - 500,
        };
        assert!(!state.apply_registration(&stale, now).unwrap());
        assert!(!state.workers.contains("w2"));

        let exit = RegistrationMessage {
            queue: "w1".to_string(),
            r#type: RegistrationKind::Exit,
            timestamp: now.timestamp(),
        };
        assert!(state.apply_registration(&exit, now).unwrap());
        assert!(state.workers.is_empty());
    }
}
