//! 测试数据构建器
//!
//! 提供带合理默认值的任务、Worker快照与协议消息。

use chrono::{DateTime, Utc};
use scheduler_core::models::{MessageOrigin, ModelProfile, Task, TaskView, WorkerSnapshot};

/// 构建测试用的 [`Task`]
pub struct TaskBuilder {
    id: String,
    profile: ModelProfile,
    expected_duration: f64,
    arrived_at: DateTime<Utc>,
    origin: MessageOrigin,
    failure_count: u32,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            profile: ModelProfile {
                model_type: "general".to_string(),
                real_time_factor: 1.0,
                load_seconds: 10.0,
            },
            expected_duration: 30.0,
            arrived_at: Utc::now(),
            origin: MessageOrigin {
                payload: work_item_body(id, "default"),
                reply_to: None,
                correlation_id: None,
            },
            failure_count: 0,
        }
    }

    pub fn with_model_type(mut self, model_type: &str) -> Self {
        self.profile.model_type = model_type.to_string();
        self
    }

    pub fn with_real_time_factor(mut self, real_time_factor: f64) -> Self {
        self.profile.real_time_factor = real_time_factor;
        self
    }

    pub fn with_load_seconds(mut self, load_seconds: f64) -> Self {
        self.profile.load_seconds = load_seconds;
        self
    }

    pub fn with_duration(mut self, expected_duration: f64) -> Self {
        self.expected_duration = expected_duration;
        self
    }

    pub fn arrived_at(mut self, arrived_at: DateTime<Utc>) -> Self {
        self.arrived_at = arrived_at;
        self
    }

    pub fn with_reply_to(mut self, reply_to: &str) -> Self {
        self.origin.reply_to = Some(reply_to.to_string());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.origin.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.origin.payload = payload.to_vec();
        self
    }

    pub fn with_failure_count(mut self, failure_count: u32) -> Self {
        self.failure_count = failure_count;
        self
    }

    pub fn build(self) -> Task {
        let mut task = Task::new(
            self.id,
            &self.profile,
            self.expected_duration,
            self.arrived_at,
            self.origin,
        );
        task.failure_count = self.failure_count;
        task
    }

    pub fn build_view(self) -> TaskView {
        self.build().view()
    }
}

/// 构建测试用的 [`WorkerSnapshot`]
pub struct WorkerSnapshotBuilder {
    snapshot: WorkerSnapshot,
}

impl WorkerSnapshotBuilder {
    pub fn new(queue: &str) -> Self {
        Self {
            snapshot: WorkerSnapshot {
                queue: queue.to_string(),
                specialization: String::new(),
                busy: false,
                remaining_busy_secs: 0.0,
            },
        }
    }

    pub fn specialized_for(mut self, model_type: &str) -> Self {
        self.snapshot.specialization = model_type.to_string();
        self
    }

    pub fn busy_for(mut self, remaining_secs: f64) -> Self {
        self.snapshot.busy = true;
        self.snapshot.remaining_busy_secs = remaining_secs;
        self
    }

    pub fn build(self) -> WorkerSnapshot {
        self.snapshot
    }
}

/// Worker注册/心跳/退出消息体
pub fn registration_body(queue: &str, kind: &str, timestamp: i64) -> Vec<u8> {
    serde_json::json!({
        "queue": queue,
        "type": kind,
        "timestamp": timestamp,
    })
    .to_string()
    .into_bytes()
}

/// 转写任务消息体
pub fn work_item_body(id: &str, profile: &str) -> Vec<u8> {
    serde_json::json!({
        "id": id,
        "profile": profile,
    })
    .to_string()
    .into_bytes()
}
