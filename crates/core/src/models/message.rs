use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 注册消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationKind {
    Register,
    Beat,
    Exit,
}

impl FromStr for RegistrationKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(RegistrationKind::Register),
            "beat" => Ok(RegistrationKind::Beat),
            "exit" => Ok(RegistrationKind::Exit),
            other => Err(SchedulerError::Protocol(format!(
                "未知的注册消息类型: {other}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRegistration {
    queue: String,
    r#type: String,
    timestamp: i64,
}

/// Worker注册/心跳/退出消息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationMessage {
    pub queue: String,
    pub r#type: RegistrationKind,
    /// Unix秒
    pub timestamp: i64,
}

impl RegistrationMessage {
    pub fn decode(body: &[u8]) -> SchedulerResult<Self> {
        let raw: RawRegistration = serde_json::from_slice(body)?;
        if raw.queue.trim().is_empty() {
            return Err(SchedulerError::Protocol("注册消息缺少queue".to_string()));
        }
        Ok(Self {
            queue: raw.queue,
            r#type: raw.r#type.parse()?,
            timestamp: raw.timestamp,
        })
    }

    pub fn sent_at(&self) -> SchedulerResult<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp, 0).single().ok_or_else(|| {
            SchedulerError::Protocol(format!("无效的心跳时间戳: {}", self.timestamp))
        })
    }
}

/// 入站转写任务，其余字段随原始消息体一起转发给Worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// 识别配置键，用于解析模型类型
    #[serde(alias = "recognizer")]
    pub profile: String,
}

impl WorkItem {
    pub fn decode(body: &[u8]) -> SchedulerResult<Self> {
        let item: WorkItem = serde_json::from_slice(body)?;
        if item.id.trim().is_empty() {
            return Err(SchedulerError::Protocol("任务消息缺少id".to_string()));
        }
        if item.profile.trim().is_empty() {
            return Err(SchedulerError::Protocol(format!(
                "任务 {} 缺少识别配置",
                item.id
            )));
        }
        Ok(item)
    }
}

/// 从队列收到的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    /// 是否为重新投递（非首次投递）
    pub redelivered: bool,
}

/// 待发布的消息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// 任务超过失败上限被淘汰时回传给调用方的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub id: String,
    pub error: String,
    pub failure_count: u32,
}
