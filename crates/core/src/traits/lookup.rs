use async_trait::async_trait;

use crate::{models::ModelProfile, SchedulerResult};

/// 按任务ID查询预计处理时长（音频时长，秒）
#[async_trait]
pub trait DurationLookup: Send + Sync {
    async fn expected_duration(&self, item_id: &str) -> SchedulerResult<f64>;
}

/// 按识别配置键解析所需模型类型
pub trait ModelTypeLookup: Send + Sync {
    fn resolve(&self, profile: &str) -> SchedulerResult<ModelProfile>;
}
