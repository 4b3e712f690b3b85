use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use scheduler_core::{
    models::{Task, Worker, WorkerSnapshot},
    SchedulerError, SchedulerResult,
};

/// 预计忙碌时长的上限（秒），超出的预估按上限计算
pub const MAX_BUSY_HORIZON_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// 心跳处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatOutcome {
    /// 新Worker加入
    Registered,
    /// 已知Worker的心跳被刷新
    Refreshed,
    /// 心跳已过期，被忽略
    Stale,
}

/// Worker注册表
///
/// 以回复队列名为键，BTreeMap保证快照按队列名排序，
/// 从而让策略中的Worker下标具有确定性。
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Worker>,
    stale_after_seconds: i64,
}

impl WorkerRegistry {
    pub fn new(stale_after_seconds: i64) -> Self {
        Self {
            workers: BTreeMap::new(),
            stale_after_seconds,
        }
    }

    /// 处理register/beat消息
    ///
    /// 时间戳早于 `now - stale_after_seconds` 的心跳不会创建或刷新Worker。
    /// 晚于 `now` 的时间戳按 `now` 记录。
    pub fn register_beat(
        &mut self,
        queue: &str,
        beat_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BeatOutcome {
        if now - beat_at > Duration::seconds(self.stale_after_seconds) {
            debug!(
                "忽略Worker {} 的过期心跳 (发送于 {})",
                queue,
                beat_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            return BeatOutcome::Stale;
        }
        let beat_at = if beat_at > now {
            debug!(
                "Worker {} 的心跳时间戳晚于当前时间 (发送于 {})，按当前时间记录",
                queue,
                beat_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            now
        } else {
            beat_at
        };

        match self.workers.get_mut(queue) {
            Some(worker) => {
                if beat_at > worker.last_beat_at {
                    worker.last_beat_at = beat_at;
                }
                BeatOutcome::Refreshed
            }
            None => {
                info!("Worker {} 已注册", queue);
                self.workers
                    .insert(queue.to_string(), Worker::new(queue, beat_at, now));
                BeatOutcome::Registered
            }
        }
    }

    /// 移除Worker，返回被移除的Worker（调用方据此将其任务重新入队）
    pub fn exit(&mut self, queue: &str) -> Option<Worker> {
        let removed = self.workers.remove(queue);
        if removed.is_some() {
            info!("Worker {} 已退出", queue);
        }
        removed
    }

    /// 移除所有静默时间达到 `threshold_seconds` 的Worker
    pub fn sweep(&mut self, now: DateTime<Utc>, threshold_seconds: i64) -> Vec<Worker> {
        let expired: Vec<String> = self
            .workers
            .values()
            .filter(|w| w.is_silent_for(now, threshold_seconds))
            .map(|w| w.queue.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|queue| self.workers.remove(&queue))
            .collect()
    }

    /// 标记Worker开始处理任务并预估空闲时间
    pub fn mark_busy(&mut self, queue: &str, task: &Task, now: DateTime<Utc>) -> SchedulerResult<()> {
        let worker = self
            .workers
            .get_mut(queue)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                queue: queue.to_string(),
            })?;

        if worker.busy {
            return Err(SchedulerError::WorkerBusy {
                queue: queue.to_string(),
                task_id: worker.current_task.clone(),
            });
        }

        let mut busy_secs = task.processing_secs();
        if worker.specialization != task.required_type {
            busy_secs += task.expected_load_duration;
        }

        worker.busy = true;
        worker.current_task = Some(task.id.clone());
        worker.projected_free_at = projected_free_at(queue, busy_secs, now);
        worker.specialization = task.required_type.clone();
        Ok(())
    }

    /// 标记Worker空闲
    pub fn mark_free(&mut self, queue: &str, now: DateTime<Utc>) -> SchedulerResult<()> {
        let worker = self
            .workers
            .get_mut(queue)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                queue: queue.to_string(),
            })?;

        if !worker.busy {
            return Err(SchedulerError::WorkerNotBusy {
                queue: queue.to_string(),
            });
        }

        worker.busy = false;
        worker.current_task = None;
        worker.projected_free_at = now;
        Ok(())
    }

    /// 若Worker仍持有该任务则将其释放，返回是否释放
    pub fn release_if_holding(&mut self, queue: &str, task_id: &str, now: DateTime<Utc>) -> bool {
        let holding = self
            .workers
            .get(queue)
            .map(|w| w.busy && w.holds(task_id))
            .unwrap_or(false);

        holding && self.mark_free(queue, now).is_ok()
    }

    pub fn get(&self, queue: &str) -> Option<&Worker> {
        self.workers.get(queue)
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.workers.contains_key(queue)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// 空闲Worker的队列名，按名称排序
    pub fn idle_queues(&self) -> Vec<String> {
        self.workers
            .values()
            .filter(|w| !w.busy)
            .map(|w| w.queue.clone())
            .collect()
    }

    /// 按队列名排序的Worker快照
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<WorkerSnapshot> {
        self.workers.values().map(|w| w.snapshot(now)).collect()
    }

    pub fn stale_after_seconds(&self) -> i64 {
        self.stale_after_seconds
    }
}

/// 预计空闲时间，忙碌时长限制在 `[0, MAX_BUSY_HORIZON_SECONDS]`
fn projected_free_at(queue: &str, busy_secs: f64, now: DateTime<Utc>) -> DateTime<Utc> {
    let clamped = if busy_secs.is_nan() {
        0.0
    } else {
        busy_secs.clamp(0.0, MAX_BUSY_HORIZON_SECONDS)
    };
    if clamped != busy_secs {
        warn!(
            "Worker {} 的预计忙碌时长 {} 超出范围，按 {:.0}s 计算",
            queue, busy_secs, clamped
        );
    }

    now.checked_add_signed(Duration::milliseconds((clamped * 1000.0) as i64))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::{MessageOrigin, ModelProfile};

    fn task(id: &str, model_type: &str) -> Task {
        let profile = ModelProfile {
            model_type: model_type.to_string(),
            real_time_factor: 0.5,
            load_seconds: 30.0,
        };
        Task::new(id, &profile, 100.0, Utc::now(), MessageOrigin::default())
    }

    #[test]
    fn test_stale_heartbeat_never_creates_worker() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);

        let outcome = registry.register_beat("w1", now - Duration::seconds(121), now);
        assert_eq!(outcome, BeatOutcome::Stale);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_heartbeat_never_refreshes_worker() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        let first_beat = now - Duration::seconds(60);
        registry.register_beat("w1", first_beat, now);

        let outcome = registry.register_beat("w1", now - Duration::seconds(200), now);
        assert_eq!(outcome, BeatOutcome::Stale);
        assert_eq!(registry.get("w1").unwrap().last_beat_at, first_beat);
    }

    #[test]
    fn test_last_beat_only_increases() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now - Duration::seconds(10), now);

        // 乱序到达的较早心跳不会让时间倒退
        let outcome = registry.register_beat("w1", now - Duration::seconds(30), now);
        assert_eq!(outcome, BeatOutcome::Refreshed);
        assert_eq!(
            registry.get("w1").unwrap().last_beat_at,
            now - Duration::seconds(10)
        );

        registry.register_beat("w1", now, now);
        assert_eq!(registry.get("w1").unwrap().last_beat_at, now);
    }

    #[test]
    fn test_future_heartbeat_recorded_as_now() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now + Duration::days(365), now);
        assert_eq!(registry.get("w1").unwrap().last_beat_at, now);

        // 之后再无心跳，Worker仍会按正常阈值被回收
        let later = now + Duration::seconds(1000);
        let removed = registry.sweep(later, 100);
        assert_eq!(removed.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_future_heartbeat_does_not_pin_known_worker() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now - Duration::seconds(10), now);
        registry.register_beat("w1", now + Duration::days(1), now);
        assert_eq!(registry.get("w1").unwrap().last_beat_at, now);
        assert!(registry.get("w1").unwrap().is_silent_for(now + Duration::seconds(120), 120));
    }

    #[test]
    fn test_new_worker_defaults() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        assert_eq!(registry.register_beat("w1", now, now), BeatOutcome::Registered);

        let worker = registry.get("w1").unwrap();
        assert!(!worker.busy);
        assert!(worker.specialization.is_empty());
        assert_eq!(worker.projected_free_at, now);
    }

    #[test]
    fn test_mark_busy_projects_free_time_with_reload() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);

        let t = task("t1", "english");
        registry.mark_busy("w1", &t, now).unwrap();

        let worker = registry.get("w1").unwrap();
        assert!(worker.busy);
        assert_eq!(worker.current_task.as_deref(), Some("t1"));
        assert_eq!(worker.specialization, "english");
        // 100 × 0.5 + 30 模型切换
        assert_eq!(worker.projected_free_at, now + Duration::seconds(80));
    }

    #[test]
    fn test_mark_busy_same_specialization_skips_reload() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);

        registry.mark_busy("w1", &task("t1", "english"), now).unwrap();
        registry.mark_free("w1", now).unwrap();
        registry.mark_busy("w1", &task("t2", "english"), now).unwrap();

        assert_eq!(
            registry.get("w1").unwrap().projected_free_at,
            now + Duration::seconds(50)
        );
    }

    #[test]
    fn test_mark_busy_huge_duration_is_clamped() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);

        let profile = ModelProfile {
            model_type: "english".to_string(),
            real_time_factor: 1.0,
            load_seconds: 0.0,
        };
        let t = Task::new("t1", &profile, 1e15, now, MessageOrigin::default());
        registry.mark_busy("w1", &t, now).unwrap();

        let worker = registry.get("w1").unwrap();
        assert!(worker.busy);
        assert_eq!(
            worker.projected_free_at,
            now + Duration::milliseconds((MAX_BUSY_HORIZON_SECONDS * 1000.0) as i64)
        );
    }

    #[test]
    fn test_mark_busy_twice_fails() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);
        registry.mark_busy("w1", &task("t1", "english"), now).unwrap();

        let err = registry.mark_busy("w1", &task("t2", "english"), now).unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerBusy { .. }));
    }

    #[test]
    fn test_mark_free_requires_busy() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);

        let err = registry.mark_free("w1", now).unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerNotBusy { .. }));
        assert!(matches!(
            registry.mark_free("missing", now).unwrap_err(),
            SchedulerError::WorkerNotFound { .. }
        ));
    }

    #[test]
    fn test_release_only_when_holding_task() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w1", now, now);
        registry.mark_busy("w1", &task("t1", "english"), now).unwrap();

        assert!(!registry.release_if_holding("w1", "other", now));
        assert!(registry.get("w1").unwrap().busy);
        assert!(registry.release_if_holding("w1", "t1", now));
        assert!(!registry.get("w1").unwrap().busy);
        assert!(!registry.release_if_holding("w1", "t1", now));
    }

    #[test]
    fn test_sweep_removes_only_silent_workers() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(1000);
        registry.register_beat("old", now - Duration::seconds(150), now);
        registry.register_beat("fresh", now - Duration::seconds(50), now);

        let removed = registry.sweep(now, 100);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].queue, "old");
        assert!(registry.contains("fresh"));
        assert!(!registry.contains("old"));
    }

    #[test]
    fn test_idle_queues_sorted_and_exclude_busy() {
        let now = Utc::now();
        let mut registry = WorkerRegistry::new(120);
        registry.register_beat("w3", now, now);
        registry.register_beat("w1", now, now);
        registry.register_beat("w2", now, now);
        registry.mark_busy("w2", &task("t1", "english"), now).unwrap();

        assert_eq!(registry.idle_queues(), vec!["w1".to_string(), "w3".to_string()]);
        let snapshot = registry.snapshot(now);
        let names: Vec<_> = snapshot.iter().map(|w| w.queue.as_str()).collect();
        assert_eq!(names, vec!["w1", "w2", "w3"]);
        assert!(snapshot[1].busy);
    }
}
