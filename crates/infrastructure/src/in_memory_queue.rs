use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use scheduler_core::{
    models::{Delivery, OutboundMessage},
    traits::{DeliveryStream, MessageQueue},
    SchedulerError, SchedulerResult,
};

/// 内存消息队列实现
///
/// 使用 Tokio channels 实现，语义与RabbitMQ一致：消息需显式确认，
/// 拒绝并重新入队的消息以 `redelivered = true` 再次投递。
/// 每个队列同一时刻只允许一个消费者。
#[derive(Debug, Default)]
pub struct InMemoryMessageQueue {
    queues: Arc<RwLock<HashMap<String, QueueChannels>>>,
    /// 已投递未确认的消息：delivery_tag -> (队列名, 消息)
    unacked: Arc<Mutex<HashMap<u64, (String, Delivery)>>>,
    next_tag: AtomicU64,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::UnboundedSender<Delivery>,
    /// 被消费者取走后为None
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
    /// 尚未被消费者取出的消息数
    size: Arc<AtomicU32>,
    _durable: bool,
}

impl QueueChannels {
    fn new(durable: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
            size: Arc::new(AtomicU32::new(0)),
            _durable: durable,
        }
    }

    fn push(&self, delivery: Delivery) -> SchedulerResult<()> {
        self.sender
            .send(delivery)
            .map_err(|_| SchedulerError::MessageQueue("内存队列已关闭".to_string()))?;
        self.size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl InMemoryMessageQueue {
    /// 创建新的内存消息队列实例
    pub fn new() -> Self {
        info!("创建内存消息队列");
        Self::default()
    }

    async fn enqueue(&self, queue: &str, delivery: Delivery) -> SchedulerResult<()> {
        {
            let queues = self.queues.read().await;
            if let Some(channels) = queues.get(queue) {
                return channels.push(delivery);
            }
        }

        let mut queues = self.queues.write().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueChannels::new(false))
            .push(delivery)
    }

    /// 已投递但未确认的消息数
    pub async fn unacked_count(&self) -> usize {
        self.unacked.lock().await.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &OutboundMessage) -> SchedulerResult<()> {
        let delivery = Delivery {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed) + 1,
            body: message.body.clone(),
            reply_to: message.reply_to.clone(),
            correlation_id: message.correlation_id.clone(),
            redelivered: false,
        };

        self.enqueue(queue, delivery).await?;
        debug!("消息已发布到内存队列: {}", queue);
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> SchedulerResult<DeliveryStream> {
        let mut queues = self.queues.write().await;
        let channels = queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueChannels::new(false));

        let receiver = channels.receiver.take().ok_or_else(|| {
            SchedulerError::MessageQueue(format!("队列 {queue} 已有消费者"))
        })?;
        let size = Arc::clone(&channels.size);
        let unacked = Arc::clone(&self.unacked);
        let queue_name = queue.to_string();

        debug!("为内存队列 {} 创建消费者: {}", queue, consumer_tag);

        let stream = stream::unfold(receiver, move |mut receiver| {
            let size = Arc::clone(&size);
            let unacked = Arc::clone(&unacked);
            let queue_name = queue_name.clone();
            async move {
                let delivery = receiver.recv().await?;
                size.fetch_sub(1, Ordering::Relaxed);
                unacked
                    .lock()
                    .await
                    .insert(delivery.delivery_tag, (queue_name, delivery.clone()));
                Some((Ok(delivery), receiver))
            }
        });

        Ok(stream.boxed())
    }

    async fn ack_message(&self, delivery: &Delivery) -> SchedulerResult<()> {
        match self.unacked.lock().await.remove(&delivery.delivery_tag) {
            Some(_) => Ok(()),
            None => Err(SchedulerError::MessageQueue(format!(
                "未知的delivery_tag: {}",
                delivery.delivery_tag
            ))),
        }
    }

    async fn nack_message(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()> {
        let (queue, mut original) = self
            .unacked
            .lock()
            .await
            .remove(&delivery.delivery_tag)
            .ok_or_else(|| {
                SchedulerError::MessageQueue(format!(
                    "未知的delivery_tag: {}",
                    delivery.delivery_tag
                ))
            })?;

        if requeue {
            original.delivery_tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            original.redelivered = true;
            self.enqueue(&queue, original).await?;
        } else {
            warn!("消息 {} 被拒绝且不再重新投递", delivery.delivery_tag);
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueChannels::new(durable));
        debug!("内存队列 {} 已创建", queue);
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let queues = self.queues.read().await;
        Ok(queues
            .get(queue)
            .map(|c| c.size.load(Ordering::Relaxed))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("等待消息超时")
            .expect("流已结束")
            .expect("接收消息失败")
    }

    #[tokio::test]
    async fn test_publish_and_consume_preserves_properties() {
        let mq = InMemoryMessageQueue::new();
        mq.create_queue("q", true).await.unwrap();
        mq.publish_message(
            "q",
            &OutboundMessage::new(b"hello".to_vec())
                .with_correlation_id("c1")
                .with_reply_to("r1"),
        )
        .await
        .unwrap();
        assert_eq!(mq.get_queue_size("q").await.unwrap(), 1);

        let mut stream = mq.consume("q", "test").await.unwrap();
        let delivery = next(&mut stream).await;
        assert_eq!(delivery.body, b"hello".to_vec());
        assert_eq!(delivery.correlation_id.as_deref(), Some("c1"));
        assert_eq!(delivery.reply_to.as_deref(), Some("r1"));
        assert!(!delivery.redelivered);
        assert_eq!(mq.get_queue_size("q").await.unwrap(), 0);
        assert_eq!(mq.unacked_count().await, 1);

        mq.ack_message(&delivery).await.unwrap();
        assert_eq!(mq.unacked_count().await, 0);
        assert!(mq.ack_message(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let mq = InMemoryMessageQueue::new();
        let mut stream = mq.consume("q", "test").await.unwrap();
        mq.publish_message("q", &OutboundMessage::new(b"x".to_vec()))
            .await
            .unwrap();

        let first = next(&mut stream).await;
        mq.nack_message(&first, true).await.unwrap();

        let second = next(&mut stream).await;
        assert!(second.redelivered);
        assert_eq!(second.body, first.body);
        assert_ne!(second.delivery_tag, first.delivery_tag);

        mq.nack_message(&second, false).await.unwrap();
        assert_eq!(mq.unacked_count().await, 0);
        assert_eq!(mq.get_queue_size("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_consumer_per_queue() {
        let mq = InMemoryMessageQueue::new();
        let _stream = mq.consume("q", "a").await.unwrap();
        assert!(mq.consume("q", "b").await.is_err());
    }
}
