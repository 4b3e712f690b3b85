use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use scheduler_config::MessageQueueConfig;
use scheduler_core::{
    models::{Delivery, MessageOrigin, RegistrationMessage, Task, WorkItem},
    traits::{DurationLookup, MessageQueue, ModelTypeLookup},
    SchedulerError, SchedulerResult,
};
use scheduler_infrastructure::DispatcherMetrics;

use crate::state::{ResponseDisposition, SchedulerSignal, SharedState};

/// 监听器订阅的队列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerQueues {
    pub heartbeat: String,
    pub work: String,
    pub response: String,
}

impl From<&MessageQueueConfig> for ListenerQueues {
    fn from(config: &MessageQueueConfig) -> Self {
        Self {
            heartbeat: config.heartbeat_queue.clone(),
            work: config.work_queue.clone(),
            response: config.response_queue.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Heartbeat,
    Work,
    Response,
}

impl Channel {
    fn consumer_tag(self) -> &'static str {
        match self {
            Channel::Heartbeat => "dispatcher-heartbeat",
            Channel::Work => "dispatcher-work",
            Channel::Response => "dispatcher-response",
        }
    }
}

/// 状态监听器
///
/// 消费心跳、任务和结果三个队列，更新共享状态并通知调度循环。
pub struct StateListener {
    state: SharedState,
    signal: SchedulerSignal,
    message_queue: Arc<dyn MessageQueue>,
    duration_lookup: Arc<dyn DurationLookup>,
    type_lookup: Arc<dyn ModelTypeLookup>,
    queues: ListenerQueues,
    metrics: DispatcherMetrics,
}

impl StateListener {
    pub fn new(
        state: SharedState,
        signal: SchedulerSignal,
        message_queue: Arc<dyn MessageQueue>,
        duration_lookup: Arc<dyn DurationLookup>,
        type_lookup: Arc<dyn ModelTypeLookup>,
        queues: ListenerQueues,
        metrics: DispatcherMetrics,
    ) -> Self {
        Self {
            state,
            signal,
            message_queue,
            duration_lookup,
            type_lookup,
            queues,
            metrics,
        }
    }

    /// 声明监听的三个队列
    pub async fn declare_queues(&self) -> SchedulerResult<()> {
        for queue in [&self.queues.heartbeat, &self.queues.work, &self.queues.response] {
            self.message_queue.create_queue(queue, true).await?;
        }
        Ok(())
    }

    /// 同时运行三个消费循环，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) {
        let (heartbeat, work, response) = tokio::join!(
            self.consume(Channel::Heartbeat, shutdown_rx.resubscribe()),
            self.consume(Channel::Work, shutdown_rx.resubscribe()),
            self.consume(Channel::Response, shutdown_rx.resubscribe()),
        );

        for (channel, result) in [
            (Channel::Heartbeat, heartbeat),
            (Channel::Work, work),
            (Channel::Response, response),
        ] {
            if let Err(e) = result {
                error!("{:?} 消费循环异常退出: {}", channel, e);
            }
        }
        info!("状态监听器已停止");
    }

    fn queue_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Heartbeat => &self.queues.heartbeat,
            Channel::Work => &self.queues.work,
            Channel::Response => &self.queues.response,
        }
    }

    async fn consume(
        &self,
        channel: Channel,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> SchedulerResult<()> {
        let queue = self.queue_for(channel).to_string();
        let mut stream = self
            .message_queue
            .consume(&queue, channel.consumer_tag())
            .await?;
        info!("开始消费队列 {}", queue);

        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.handle_delivery(channel, &delivery).await,
                    Some(Err(e)) => error!("从队列 {} 接收消息失败: {}", queue, e),
                    None => {
                        warn!("队列 {} 的消费者已关闭", queue);
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止消费队列 {}", queue);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_delivery(&self, channel: Channel, delivery: &Delivery) {
        match channel {
            Channel::Heartbeat => {
                if let Err(e) = self.process_registration(delivery).await {
                    warn!("丢弃无效的注册消息: {}", e);
                    self.metrics.record_dropped_message();
                }
                self.ack(delivery).await;
            }
            Channel::Work => {
                match self.process_work_item(delivery).await {
                    Ok(()) => self.metrics.record_task_received(),
                    Err(e) => {
                        warn!("丢弃无法处理的任务消息: {}", e);
                        self.metrics.record_dropped_message();
                    }
                }
                self.ack(delivery).await;
            }
            Channel::Response => match self.process_response(delivery).await {
                Ok(ResponseDisposition::Ack) => {
                    self.metrics.record_response_forwarded();
                    self.ack(delivery).await;
                }
                Ok(ResponseDisposition::Nack { requeue }) => {
                    self.metrics.record_response_forward_failure();
                    if let Err(e) = self.message_queue.nack_message(delivery, requeue).await {
                        error!("拒绝结果消息失败: {}", e);
                    }
                }
                Err(e @ SchedulerError::UnknownCorrelation { .. }) => {
                    warn!("{}，可能是重复或迟到的结果", e);
                    self.metrics.record_unknown_correlation();
                    self.ack(delivery).await;
                }
                Err(e) => {
                    warn!("丢弃无效的结果消息: {}", e);
                    self.metrics.record_dropped_message();
                    self.ack(delivery).await;
                }
            },
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.message_queue.ack_message(delivery).await {
            error!("确认消息 {} 失败: {}", delivery.delivery_tag, e);
        }
    }

    /// 处理注册/心跳/退出消息
    pub async fn process_registration(&self, delivery: &Delivery) -> SchedulerResult<()> {
        let message = RegistrationMessage::decode(&delivery.body)?;
        debug!("收到Worker {} 的 {:?} 消息", message.queue, message.r#type);

        let changed = {
            let mut state = self.state.lock().await;
            state.apply_registration(&message, Utc::now())?
        };

        if changed {
            self.signal.notify();
        }
        Ok(())
    }

    /// 解析任务消息，查询时长与模型类型后加入任务注册表
    pub async fn process_work_item(&self, delivery: &Delivery) -> SchedulerResult<()> {
        let item = WorkItem::decode(&delivery.body)?;
        let profile = self.type_lookup.resolve(&item.profile)?;
        let expected_duration = self.duration_lookup.expected_duration(&item.id).await?;

        let origin = MessageOrigin {
            payload: delivery.body.clone(),
            reply_to: delivery.reply_to.clone(),
            correlation_id: delivery.correlation_id.clone(),
        };

        let now = Utc::now();
        let task = Task::new(item.id, &profile, expected_duration, now, origin);
        debug!(
            "收到任务 {} (类型: {}, 时长: {:.1}s)",
            task.id, task.required_type, task.expected_duration
        );

        self.state.lock().await.add_task(task, now)?;
        self.signal.notify();
        Ok(())
    }

    /// 处理Worker返回的结果
    pub async fn process_response(
        &self,
        delivery: &Delivery,
    ) -> SchedulerResult<ResponseDisposition> {
        let correlation_id = delivery
            .correlation_id
            .as_deref()
            .ok_or_else(|| SchedulerError::Protocol("结果消息缺少correlation_id".to_string()))?;

        let disposition = self
            .state
            .lock()
            .await
            .process_response(
                correlation_id,
                &delivery.body,
                delivery.redelivered,
                self.message_queue.as_ref(),
                Utc::now(),
            )
            .await?;

        // 无论转发成功与否Worker都已空闲
        self.signal.notify();
        Ok(disposition)
    }
}
