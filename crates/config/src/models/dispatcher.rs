use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 心跳时间戳超过该秒数即视为过期：过期心跳被忽略，静默超过该时长的Worker在调度前被剔除
    pub heartbeat_stale_seconds: i64,
    /// 后台存活扫描间隔
    pub sweep_interval_seconds: u64,
    /// 后台扫描剔除阈值
    pub sweep_threshold_seconds: i64,
    /// 任务因Worker丢失而重新入队的次数上限
    pub max_task_failures: u32,
    /// 切换模型类型的固定重载代价（秒）
    pub reload_penalty_seconds: f64,
    /// 每等待一秒带来的代价抵扣
    pub delay_cost_per_second: f64,
    /// 分发或转发消息时等待发布确认的超时
    #[serde(default = "default_publish_timeout_seconds")]
    pub publish_timeout_seconds: u64,
}

fn default_publish_timeout_seconds() -> u64 {
    10
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            heartbeat_stale_seconds: 120,
            sweep_interval_seconds: 30,
            sweep_threshold_seconds: 100,
            max_task_failures: 3,
            reload_penalty_seconds: 60.0,
            delay_cost_per_second: 1.0,
            publish_timeout_seconds: default_publish_timeout_seconds(),
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.heartbeat_stale_seconds <= 0 {
            return Err(crate::ConfigError::Validation(
                "dispatcher.heartbeat_stale_seconds must be greater than 0".to_string(),
            ));
        }
        if self.sweep_threshold_seconds <= 0 {
            return Err(crate::ConfigError::Validation(
                "dispatcher.sweep_threshold_seconds must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_seconds(
            self.sweep_interval_seconds,
            "dispatcher.sweep_interval_seconds",
        )?;

        if self.max_task_failures == 0 {
            return Err(crate::ConfigError::Validation(
                "dispatcher.max_task_failures must be greater than 0".to_string(),
            ));
        }

        ValidationUtils::validate_non_negative(
            self.reload_penalty_seconds,
            "dispatcher.reload_penalty_seconds",
        )?;
        ValidationUtils::validate_non_negative(
            self.delay_cost_per_second,
            "dispatcher.delay_cost_per_second",
        )?;
        ValidationUtils::validate_seconds(
            self.publish_timeout_seconds,
            "dispatcher.publish_timeout_seconds",
        )?;

        Ok(())
    }
}
