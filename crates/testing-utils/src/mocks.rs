//! 测试替身
//!
//! 不依赖真实的消息中间件或外部HTTP服务。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scheduler_core::{
    models::{Delivery, ModelProfile, OutboundMessage},
    traits::{DeliveryStream, DurationLookup, MessageQueue, ModelTypeLookup},
    SchedulerError, SchedulerResult,
};

/// Mock消息队列
///
/// 发布的消息按队列保存，确认与拒绝按delivery_tag记录。
/// `consume` 返回一个永不产出的流。
#[derive(Debug, Clone, Default)]
pub struct MockMessageQueue {
    published: Arc<Mutex<HashMap<String, Vec<OutboundMessage>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    stalled: Arc<Mutex<HashSet<String>>>,
    acked: Arc<Mutex<Vec<u64>>>,
    nacked: Arc<Mutex<Vec<(u64, bool)>>>,
    queues: Arc<Mutex<HashSet<String>>>,
}

impl MockMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后发布到该队列的消息都会失败
    pub fn fail_queue(&self, queue: &str) {
        self.failing.lock().unwrap().insert(queue.to_string());
    }

    pub fn recover_queue(&self, queue: &str) {
        self.failing.lock().unwrap().remove(queue);
        self.stalled.lock().unwrap().remove(queue);
    }

    /// 之后发布到该队列的消息永远得不到确认
    pub fn stall_queue(&self, queue: &str) {
        self.stalled.lock().unwrap().insert(queue.to_string());
    }

    pub fn published(&self, queue: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.nacked.lock().unwrap().clone()
    }

    pub fn created_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.queues.lock().unwrap().iter().cloned().collect();
        queues.sort();
        queues
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
        self.acked.lock().unwrap().clear();
        self.nacked.lock().unwrap().clear();
    }
}

#[async_trait]
impl MessageQueue for MockMessageQueue {
    async fn publish_message(&self, queue: &str, message: &OutboundMessage) -> SchedulerResult<()> {
        if self.failing.lock().unwrap().contains(queue) {
            return Err(SchedulerError::MessageQueue(format!(
                "模拟发布到队列 {queue} 失败"
            )));
        }
        let stalled = self.stalled.lock().unwrap().contains(queue);
        if stalled {
            futures::future::pending::<()>().await;
        }
        self.published
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn consume(&self, _queue: &str, _consumer_tag: &str) -> SchedulerResult<DeliveryStream> {
        Ok(stream::pending().boxed())
    }

    async fn ack_message(&self, delivery: &Delivery) -> SchedulerResult<()> {
        self.acked.lock().unwrap().push(delivery.delivery_tag);
        Ok(())
    }

    async fn nack_message(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()> {
        self.nacked
            .lock()
            .unwrap()
            .push((delivery.delivery_tag, requeue));
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> SchedulerResult<()> {
        self.queues.lock().unwrap().insert(queue.to_string());
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        Ok(self.published(queue).len() as u32)
    }
}

/// 对所有任务返回同一时长
#[derive(Debug, Clone)]
pub struct StaticDurationLookup {
    duration: f64,
    overrides: HashMap<String, f64>,
}

impl StaticDurationLookup {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            overrides: HashMap::new(),
        }
    }

    pub fn with_duration(mut self, item_id: &str, duration: f64) -> Self {
        self.overrides.insert(item_id.to_string(), duration);
        self
    }
}

#[async_trait]
impl DurationLookup for StaticDurationLookup {
    async fn expected_duration(&self, item_id: &str) -> SchedulerResult<f64> {
        Ok(self
            .overrides
            .get(item_id)
            .copied()
            .unwrap_or(self.duration))
    }
}

/// 固定的识别配置表
#[derive(Debug, Clone, Default)]
pub struct MockTypeLookup {
    profiles: HashMap<String, ModelProfile>,
}

impl MockTypeLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(
        mut self,
        key: &str,
        model_type: &str,
        real_time_factor: f64,
        load_seconds: f64,
    ) -> Self {
        self.profiles.insert(
            key.to_string(),
            ModelProfile {
                model_type: model_type.to_string(),
                real_time_factor,
                load_seconds,
            },
        );
        self
    }
}

impl ModelTypeLookup for MockTypeLookup {
    fn resolve(&self, profile: &str) -> SchedulerResult<ModelProfile> {
        self.profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownProfile {
                profile: profile.to_string(),
            })
    }
}
