use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use scheduler_config::DispatcherConfig;
use scheduler_core::{
    models::{FailureNotice, OutboundMessage, Task},
    traits::MessageQueue,
    SchedulerResult,
};
use scheduler_infrastructure::DispatcherMetrics;

use crate::state::{SchedulerSignal, SharedState, SweepReport};

/// Worker失效检测配置
#[derive(Debug, Clone)]
pub struct WorkerFailureDetectorConfig {
    /// 检测间隔（秒）
    pub detection_interval_seconds: u64,
    /// 静默多久视为失效（秒）
    pub silence_threshold_seconds: i64,
}

impl Default for WorkerFailureDetectorConfig {
    fn default() -> Self {
        Self {
            detection_interval_seconds: 30,
            silence_threshold_seconds: 100,
        }
    }
}

impl From<&DispatcherConfig> for WorkerFailureDetectorConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            detection_interval_seconds: config.sweep_interval_seconds,
            silence_threshold_seconds: config.sweep_threshold_seconds,
        }
    }
}

/// 一轮检测的结果
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DetectionReport {
    pub sweep: SweepReport,
    pub evicted_tasks: Vec<String>,
}

impl DetectionReport {
    pub fn is_empty(&self) -> bool {
        self.sweep.is_empty() && self.evicted_tasks.is_empty()
    }
}

/// Worker失效检测器
///
/// 定期移除心跳静默的Worker，将其任务重新入队，
/// 并淘汰失败次数达到上限或结果迟迟无法转发的任务。
pub struct WorkerFailureDetector {
    state: SharedState,
    signal: SchedulerSignal,
    message_queue: Arc<dyn MessageQueue>,
    config: WorkerFailureDetectorConfig,
    metrics: DispatcherMetrics,
}

impl WorkerFailureDetector {
    pub fn new(
        state: SharedState,
        signal: SchedulerSignal,
        message_queue: Arc<dyn MessageQueue>,
        config: Option<WorkerFailureDetectorConfig>,
        metrics: DispatcherMetrics,
    ) -> Self {
        Self {
            state,
            signal,
            message_queue,
            config: config.unwrap_or_default(),
            metrics,
        }
    }

    /// 执行检测循环直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动Worker失效检测循环 (间隔: {}s, 阈值: {}s)",
            self.config.detection_interval_seconds, self.config.silence_threshold_seconds
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.detection_interval_seconds));
        // 第一次tick立即完成，跳过
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.detect_once().await {
                        error!("Worker失效检测时出错: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到停止信号，退出Worker失效检测循环");
                    break;
                }
            }
        }
    }

    /// 执行一轮检测
    pub async fn detect_once(&self) -> SchedulerResult<DetectionReport> {
        let now = Utc::now();
        let (sweep, evicted, unredelivered) = {
            let mut state = self.state.lock().await;
            let sweep = state.sweep(now, self.config.silence_threshold_seconds);
            let evicted = state.evict_exhausted();
            let unredelivered =
                state.evict_unredelivered(now, self.config.silence_threshold_seconds);
            (sweep, evicted, unredelivered)
        };

        if !sweep.is_empty() {
            info!(
                "检测到 {} 个失效的Worker，{} 个任务重新入队",
                sweep.removed_workers.len(),
                sweep.requeued_tasks.len()
            );
            self.metrics.record_requeues(sweep.requeued_tasks.len());
        }

        let mut evicted_tasks = Vec::with_capacity(evicted.len());
        for task in evicted {
            error!(
                "任务 {} 失败 {} 次，已达上限，放弃处理",
                task.id, task.failure_count
            );
            let reason = format!("任务在 {} 次Worker失效后被放弃", task.failure_count);
            self.notify_failure(&task, reason).await;
            evicted_tasks.push(task.id);
        }
        for task in unredelivered {
            error!(
                "任务 {} 的结果转发失败后未收到重新投递，放弃处理",
                task.id
            );
            self.notify_failure(&task, "任务结果转发失败".to_string())
                .await;
            evicted_tasks.push(task.id);
        }
        self.metrics.record_evictions(evicted_tasks.len());

        let report = DetectionReport {
            sweep,
            evicted_tasks,
        };
        if !report.is_empty() {
            self.signal.notify();
        } else {
            debug!("本轮未检测到失效Worker");
        }
        Ok(report)
    }

    async fn notify_failure(&self, task: &Task, reason: String) {
        let Some(reply_to) = task.origin.reply_to.as_deref() else {
            return;
        };

        let notice = FailureNotice {
            id: task.id.clone(),
            error: reason,
            failure_count: task.failure_count,
        };
        let body = match serde_json::to_vec(&notice) {
            Ok(body) => body,
            Err(e) => {
                error!("序列化任务 {} 的失败通知失败: {}", task.id, e);
                return;
            }
        };

        let message = OutboundMessage::new(body).with_correlation_id(
            task.origin
                .correlation_id
                .clone()
                .unwrap_or_else(|| task.id.clone()),
        );
        if let Err(e) = self.message_queue.publish_message(reply_to, &message).await {
            error!("发送任务 {} 的失败通知到 {} 失败: {}", task.id, reply_to, e);
        }
    }
}
