use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    traits::{MatchingStrategy, MessageQueue},
    SchedulerResult,
};
use scheduler_infrastructure::DispatcherMetrics;

use crate::state::{SchedulerSignal, SharedState};

/// 调度循环
///
/// 每次收到状态变更信号执行一轮调度：先剔除过期Worker，
/// 再依次为每个空闲Worker运行匹配策略并分发匹配到的任务。
pub struct DispatchController {
    state: SharedState,
    signal: SchedulerSignal,
    strategy: Arc<dyn MatchingStrategy>,
    message_queue: Arc<dyn MessageQueue>,
    metrics: DispatcherMetrics,
}

impl DispatchController {
    pub fn new(
        state: SharedState,
        signal: SchedulerSignal,
        strategy: Arc<dyn MatchingStrategy>,
        message_queue: Arc<dyn MessageQueue>,
        metrics: DispatcherMetrics,
    ) -> Self {
        Self {
            state,
            signal,
            strategy,
            message_queue,
            metrics,
        }
    }

    /// 运行调度循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("启动调度循环 (策略: {})", self.strategy.name());

        loop {
            tokio::select! {
                _ = self.signal.notified() => {
                    if let Err(e) = self.schedule_pass().await {
                        error!("调度过程中出错: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，退出调度循环");
                    break;
                }
            }
        }
    }

    /// 执行一轮调度，返回成功分发的任务数
    pub async fn schedule_pass(&self) -> SchedulerResult<usize> {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let pruned = state.prune_expired(now);
        if !pruned.is_empty() {
            info!(
                "调度前剔除 {} 个过期Worker，{} 个任务重新入队",
                pruned.removed_workers.len(),
                pruned.requeued_tasks.len()
            );
            self.metrics.record_requeues(pruned.requeued_tasks.len());
        }

        let mut dispatched = 0;
        for queue in state.workers.idle_queues() {
            // 每次分发后状态改变，需要重新取快照
            let workers = state.worker_snapshot(now);
            let groups = state.task_snapshot();
            if groups.is_empty() {
                break;
            }

            let Some(index) = workers.iter().position(|w| w.queue == queue) else {
                continue;
            };

            let task_id = match self.strategy.select_for(&workers, &groups, index, now) {
                Ok(Some(task_id)) => task_id,
                Ok(None) => {
                    debug!("Worker {} 本轮未匹配到任务", queue);
                    continue;
                }
                Err(e) => {
                    warn!("为Worker {} 匹配任务失败: {}", queue, e);
                    continue;
                }
            };

            match state
                .start_on(&task_id, &queue, self.message_queue.as_ref(), now)
                .await
            {
                Ok(()) => {
                    dispatched += 1;
                    self.metrics.record_dispatch(&task_id, &queue);
                }
                Err(e) => {
                    error!("分发任务 {} 到Worker {} 失败，等待下一轮: {}", task_id, queue, e);
                    self.metrics.record_dispatch_failure();
                }
            }
        }

        let busy = state.workers.len() - state.workers.idle_queues().len();
        self.metrics
            .update_registry(state.workers.len(), busy, state.tasks.pending_count());
        self.metrics
            .record_scheduling_pass(started.elapsed().as_secs_f64());

        if dispatched > 0 {
            debug!("本轮调度分发了 {} 个任务", dispatched);
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scheduler_core::models::{MessageOrigin, ModelProfile, Task};
    use scheduler_testing_utils::MockMessageQueue;

    use crate::state::SchedulerState;
    use crate::strategies::CostBasedStrategy;

    fn task(id: &str, model_type: &str) -> Task {
        let profile = ModelProfile {
            model_type: model_type.to_string(),
            real_time_factor: 0.5,
            load_seconds: 20.0,
        };
        Task::new(
            id,
            &profile,
            60.0,
            Utc::now(),
            MessageOrigin {
                payload: b"{}".to_vec(),
                ..Default::default()
            },
        )
    }

    fn controller(state: SharedState, mq: Arc<MockMessageQueue>) -> DispatchController {
        DispatchController::new(
            state,
            SchedulerSignal::new(),
            Arc::new(CostBasedStrategy::default()),
            mq,
            DispatcherMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_pass_with_no_workers_dispatches_nothing() {
        let state = SchedulerState::new(120, 3, "responses").into_shared();
        state.lock().await.add_task(task("t1", "A"), Utc::now()).unwrap();
        let mq = Arc::new(MockMessageQueue::new());

        let dispatched = controller(state, mq.clone()).schedule_pass().await.unwrap();
        assert_eq!(dispatched, 0);
        assert_eq!(mq.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_pass_dispatches_one_task_per_idle_worker() {
        let now = Utc::now();
        let state = SchedulerState::new(120, 3, "responses").into_shared();
        {
            let mut s = state.lock().await;
            s.workers.register_beat("w1", now, now);
            s.workers.register_beat("w2", now, now);
            s.add_task(task("t1", "A"), now).unwrap();
            s.add_task(task("t2", "A"), now).unwrap();
            s.add_task(task("t3", "A"), now).unwrap();
        }
        let mq = Arc::new(MockMessageQueue::new());

        let dispatched = controller(state.clone(), mq.clone())
            .schedule_pass()
            .await
            .unwrap();
        assert_eq!(dispatched, 2);
        assert_eq!(mq.published("w1").len(), 1);
        assert_eq!(mq.published("w2").len(), 1);
        assert_eq!(state.lock().await.tasks.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_pass_prunes_expired_workers_first() {
        let now = Utc::now();
        let long_ago = now - Duration::seconds(130);
        let state = SchedulerState::new(120, 3, "responses").into_shared();
        {
            let mut s = state.lock().await;
            s.workers.register_beat("dead", long_ago, long_ago);
            s.workers.register_beat("alive", now, now);
            let held = task("t0", "A");
            s.add_task(held.clone(), now).unwrap();
            s.workers.mark_busy("dead", &held, now).unwrap();
            s.tasks.mark_started("t0", "dead").unwrap();
        }
        let mq = Arc::new(MockMessageQueue::new());

        let dispatched = controller(state.clone(), mq.clone())
            .schedule_pass()
            .await
            .unwrap();
        assert_eq!(dispatched, 1);

        let s = state.lock().await;
        assert!(!s.workers.contains("dead"));
        let t0 = s.tasks.get("t0").unwrap();
        assert_eq!(t0.failure_count, 1);
        assert_eq!(t0.assigned_worker.as_deref(), Some("alive"));
        assert_eq!(mq.published("alive").len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_task_pending() {
        let now = Utc::now();
        let state = SchedulerState::new(120, 3, "responses").into_shared();
        {
            let mut s = state.lock().await;
            s.workers.register_beat("w1", now, now);
            s.add_task(task("t1", "A"), now).unwrap();
        }
        let mq = Arc::new(MockMessageQueue::new());
        mq.fail_queue("w1");

        let c = controller(state.clone(), mq.clone());
        assert_eq!(c.schedule_pass().await.unwrap(), 0);
        {
            let s = state.lock().await;
            let t = s.tasks.get("t1").unwrap();
            assert!(!t.started);
            assert_eq!(t.failure_count, 0);
            assert!(!s.workers.get("w1").unwrap().busy);
        }

        mq.recover_queue("w1");
        assert_eq!(c.schedule_pass().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let state = SchedulerState::new(120, 3, "responses").into_shared();
        let mq = Arc::new(MockMessageQueue::new());
        let c = controller(state, mq);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { c.run(rx).await });
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
