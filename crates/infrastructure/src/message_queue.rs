use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, publisher_confirm::Confirmation, types::FieldTable, BasicProperties, Channel,
    Connection, ConnectionProperties, Queue,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use scheduler_config::MessageQueueConfig;
use scheduler_core::{
    models::{Delivery, OutboundMessage},
    traits::{DeliveryStream, MessageQueue},
    SchedulerError, SchedulerResult,
};

/// RabbitMQ消息队列实现
///
/// 所有发布、消费与确认都在同一个通道上进行，delivery_tag在通道内有效。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    /// 创建新的RabbitMQ消息队列实例
    pub async fn new(config: MessageQueueConfig) -> SchedulerResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| {
            SchedulerError::MessageQueue(format!(
                "连接RabbitMQ超时 ({}s)",
                config.connection_timeout_seconds
            ))
        })?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("设置预取数量失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        Ok(Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            config,
        })
    }

    /// 声明队列
    async fn declare_queue(
        &self,
        channel: &Channel,
        queue_name: &str,
        durable: bool,
    ) -> SchedulerResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    fn properties_for(message: &OutboundMessage) -> BasicProperties {
        let mut properties = BasicProperties::default().with_delivery_mode(2); // 2 = persistent
        if let Some(correlation_id) = &message.correlation_id {
            properties = properties.with_correlation_id(correlation_id.as_str().into());
        }
        if let Some(reply_to) = &message.reply_to {
            properties = properties.with_reply_to(reply_to.as_str().into());
        }
        properties
    }

    fn to_delivery(delivery: lapin::message::Delivery) -> Delivery {
        Delivery {
            delivery_tag: delivery.delivery_tag,
            reply_to: delivery
                .properties
                .reply_to()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            correlation_id: delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(|s| s.as_str().to_string()),
            redelivered: delivery.redelivered,
            body: delivery.data,
        }
    }

    pub fn config(&self) -> &MessageQueueConfig {
        &self.config
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    /// 发布消息到指定队列
    ///
    /// 以mandatory方式发布，无法路由的消息会被退回并视为发布失败。
    async fn publish_message(&self, queue: &str, message: &OutboundMessage) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;

        let confirm = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &message.body,
                Self::properties_for(message),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
            })?;

        // 等待确认
        let confirmation = confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        match confirmation {
            Confirmation::Nack(_) => {
                return Err(SchedulerError::MessageQueue(format!(
                    "队列 {queue} 拒绝了发布的消息"
                )));
            }
            Confirmation::Ack(Some(returned)) => {
                return Err(SchedulerError::MessageQueue(format!(
                    "消息无法路由到队列 {queue}，已被退回: {} {}",
                    returned.reply_code,
                    returned.reply_text.as_str()
                )));
            }
            Confirmation::Ack(None) | Confirmation::NotRequested => {}
        }

        debug!("消息已发布到队列: {}", queue);
        Ok(())
    }

    /// 订阅队列，消息需显式确认
    async fn consume(&self, queue: &str, consumer_tag: &str) -> SchedulerResult<DeliveryStream> {
        let channel = self.channel.lock().await;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建消费者失败: {e}")))?;

        debug!("为队列 {} 创建消费者: {}", queue, consumer_tag);

        let stream = consumer.map(|result| {
            result
                .map(Self::to_delivery)
                .map_err(|e| SchedulerError::MessageQueue(format!("接收消息失败: {e}")))
        });
        Ok(stream.boxed())
    }

    /// 确认消息处理完成
    async fn ack_message(&self, delivery: &Delivery) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))
    }

    /// 拒绝消息
    async fn nack_message(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery.delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝消息失败: {e}")))?;

        if !requeue {
            warn!("消息 {} 被拒绝且不再重新投递", delivery.delivery_tag);
        }
        Ok(())
    }

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        self.declare_queue(&channel, queue, durable).await?;
        Ok(())
    }

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let channel = self.channel.lock().await;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) => {
                // 检查是否是队列不存在的错误
                let error_msg = e.to_string();
                if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                    debug!("队列 {} 不存在，返回大小为0", queue);
                    Ok(0)
                } else {
                    Err(SchedulerError::MessageQueue(format!(
                        "获取队列 {queue} 信息失败: {e}"
                    )))
                }
            }
        }
    }

    /// 关闭连接
    async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
