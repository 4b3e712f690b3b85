use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 原始请求的回复路由信息及负载
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageOrigin {
    /// 原始消息体，分发给Worker时原样转发
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

/// 识别配置解析出的模型信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_type: String,
    pub real_time_factor: f64,
    pub load_seconds: f64,
}

/// 转写任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub required_type: String,
    /// 音频时长（秒）
    pub expected_duration: f64,
    /// 模型加载耗时（秒）
    pub expected_load_duration: f64,
    pub real_time_factor: f64,
    pub arrived_at: DateTime<Utc>,
    pub assigned_worker: Option<String>,
    pub started: bool,
    pub failure_count: u32,
    pub origin: MessageOrigin,
    /// 结果转发失败、等待重新投递的起始时间
    #[serde(default)]
    pub forward_failed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        profile: &ModelProfile,
        expected_duration: f64,
        arrived_at: DateTime<Utc>,
        origin: MessageOrigin,
    ) -> Self {
        Self {
            id: id.into(),
            required_type: profile.model_type.clone(),
            expected_duration,
            expected_load_duration: profile.load_seconds,
            real_time_factor: profile.real_time_factor,
            arrived_at,
            assigned_worker: None,
            started: false,
            failure_count: 0,
            origin,
            forward_failed_at: None,
        }
    }

    /// 处理耗时（秒）：时长 × 实时率
    pub fn processing_secs(&self) -> f64 {
        self.expected_duration * self.real_time_factor
    }

    pub fn waited_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.arrived_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    pub fn is_exhausted(&self, ceiling: u32) -> bool {
        self.failure_count >= ceiling
    }

    pub fn is_pending(&self, ceiling: u32) -> bool {
        !self.started && !self.is_exhausted(ceiling)
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            required_type: self.required_type.clone(),
            processing_secs: self.processing_secs(),
            arrived_at: self.arrived_at,
        }
    }
}

/// 匹配策略看到的任务视图
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub id: String,
    pub required_type: String,
    pub processing_secs: f64,
    pub arrived_at: DateTime<Utc>,
}

impl TaskView {
    pub fn waited_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.arrived_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

/// 按模型类型分组的待分发任务，键有序，组内按到达时间升序
pub type TaskGroups = BTreeMap<String, Vec<TaskView>>;
