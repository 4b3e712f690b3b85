use std::sync::Arc;

use tracing::{debug, info};

use scheduler_config::{MessageQueueConfig, MessageQueueType};
use scheduler_core::{traits::MessageQueue, SchedulerError, SchedulerResult};

use crate::{InMemoryMessageQueue, RabbitMQMessageQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> SchedulerResult<Arc<dyn MessageQueue>> {
        debug!("创建消息队列，类型: {:?}", config.r#type);
        Self::validate_config(config)?;

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("初始化RabbitMQ消息队列");
                let rabbitmq = RabbitMQMessageQueue::new(config.clone()).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("初始化内存消息队列");
                Ok(Arc::new(InMemoryMessageQueue::new()))
            }
        }
    }

    pub fn validate_config(config: &MessageQueueConfig) -> SchedulerResult<()> {
        if config.r#type == MessageQueueType::Rabbitmq {
            if config.url.is_empty() {
                return Err(SchedulerError::Configuration(
                    "RabbitMQ配置缺失：需要提供有效的AMQP URL".to_string(),
                ));
            }
            if !config.url.starts_with("amqp://") && !config.url.starts_with("amqps://") {
                return Err(SchedulerError::Configuration(
                    "RabbitMQ URL必须以amqp://或amqps://开头".to_string(),
                ));
            }
        }

        for name in config.queue_names() {
            if name.trim().is_empty() {
                return Err(SchedulerError::Configuration("队列名称不能为空".to_string()));
            }
        }
        Ok(())
    }

    pub fn get_type_string(config: &MessageQueueConfig) -> &'static str {
        match config.r#type {
            MessageQueueType::Rabbitmq => "rabbitmq",
            MessageQueueType::InMemory => "in_memory",
        }
    }
}
