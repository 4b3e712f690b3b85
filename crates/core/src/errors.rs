use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("无效的任务: {0}")]
    InvalidTask(String),

    #[error("未知的关联ID: {correlation_id}")]
    UnknownCorrelation { correlation_id: String },

    #[error("Worker未找到: {queue}")]
    WorkerNotFound { queue: String },

    #[error("Worker {queue} 已在处理任务 {task_id:?}")]
    WorkerBusy {
        queue: String,
        task_id: Option<String>,
    },

    #[error("Worker {queue} 当前空闲")]
    WorkerNotBusy { queue: String },

    #[error("没有可供匹配的Worker")]
    NoWorkers,

    #[error("Worker索引越界: {index} (共 {len} 个)")]
    WorkerIndexOutOfRange { index: usize, len: usize },

    #[error("未知的识别配置: {profile}")]
    UnknownProfile { profile: String },

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("查询服务错误: {0}")]
    Lookup(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为可以记录后继续处理的消息级错误
    pub fn is_message_level(&self) -> bool {
        matches!(
            self,
            SchedulerError::Protocol(_)
                | SchedulerError::Serialization(_)
                | SchedulerError::UnknownProfile { .. }
                | SchedulerError::InvalidTask(_)
                | SchedulerError::UnknownCorrelation { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
