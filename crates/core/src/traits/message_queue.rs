use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    models::{Delivery, OutboundMessage},
    SchedulerResult,
};

/// 投递流：消费者持续产出的消息
pub type DeliveryStream = BoxStream<'static, SchedulerResult<Delivery>>;

/// 消息队列抽象接口
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列，返回前确认中间件已接收
    async fn publish_message(&self, queue: &str, message: &OutboundMessage) -> SchedulerResult<()>;

    /// 订阅指定队列，消息需显式确认
    async fn consume(&self, queue: &str, consumer_tag: &str) -> SchedulerResult<DeliveryStream>;

    /// 确认消息处理完成
    async fn ack_message(&self, delivery: &Delivery) -> SchedulerResult<()>;

    /// 拒绝消息，`requeue` 为真时重新入队并标记为重新投递
    async fn nack_message(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32>;

    /// 关闭底层连接
    async fn close(&self) -> SchedulerResult<()> {
        Ok(())
    }
}
