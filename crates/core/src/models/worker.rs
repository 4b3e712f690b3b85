use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Worker进程信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Worker私有回复队列名，唯一标识
    pub queue: String,
    pub last_beat_at: DateTime<Utc>,
    /// 最近一次处理的模型类型，空字符串表示尚未处理过任务
    pub specialization: String,
    pub busy: bool,
    pub current_task: Option<String>,
    pub projected_free_at: DateTime<Utc>,
}

impl Worker {
    /// 根据首次被接受的心跳创建Worker
    pub fn new(queue: impl Into<String>, beat_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            queue: queue.into(),
            last_beat_at: beat_at,
            specialization: String::new(),
            busy: false,
            current_task: None,
            projected_free_at: now,
        }
    }

    /// 距离上次心跳是否已超过给定秒数
    pub fn is_silent_for(&self, now: DateTime<Utc>, seconds: i64) -> bool {
        now - self.last_beat_at >= Duration::seconds(seconds)
    }

    /// 预计剩余忙碌时间（秒），已超出预计时间时为0
    pub fn remaining_busy_secs(&self, now: DateTime<Utc>) -> f64 {
        if !self.busy {
            return 0.0;
        }
        let remaining = (self.projected_free_at - now).num_milliseconds() as f64 / 1000.0;
        remaining.max(0.0)
    }

    pub fn holds(&self, task_id: &str) -> bool {
        self.current_task.as_deref() == Some(task_id)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> WorkerSnapshot {
        WorkerSnapshot {
            queue: self.queue.clone(),
            specialization: self.specialization.clone(),
            busy: self.busy,
            remaining_busy_secs: self.remaining_busy_secs(now),
        }
    }
}

/// 匹配策略看到的Worker视图
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSnapshot {
    pub queue: String,
    pub specialization: String,
    pub busy: bool,
    pub remaining_busy_secs: f64,
}

impl WorkerSnapshot {
    pub fn is_specialized_for(&self, model_type: &str) -> bool {
        self.specialization == model_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worker_is_idle_and_unspecialized() {
        let now = Utc::now();
        let worker = Worker::new("worker.q1", now, now);
        assert!(!worker.busy);
        assert!(worker.specialization.is_empty());
        assert_eq!(worker.remaining_busy_secs(now), 0.0);
    }

    #[test]
    fn test_is_silent_for_boundary() {
        let now = Utc::now();
        let worker = Worker::new("worker.q1", now - Duration::seconds(100), now);
        assert!(worker.is_silent_for(now, 100));
        assert!(!worker.is_silent_for(now, 101));
    }

    #[test]
    fn test_remaining_busy_time_clamped() {
        let now = Utc::now();
        let mut worker = Worker::new("worker.q1", now, now);
        worker.busy = true;
        worker.projected_free_at = now + Duration::seconds(10);
        assert_eq!(worker.remaining_busy_secs(now), 10.0);

        worker.projected_free_at = now - Duration::seconds(10);
        assert_eq!(worker.remaining_busy_secs(now), 0.0);
    }
}
