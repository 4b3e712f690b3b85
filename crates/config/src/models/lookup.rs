use std::collections::HashSet;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 识别配置（profile）到模型类型的映射条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfileConfig {
    pub key: String,
    pub model_type: String,
    /// 处理耗时 = 音频时长 × real_time_factor
    pub real_time_factor: f64,
    /// 加载该模型所需时间（秒）
    pub load_seconds: f64,
}

impl ConfigValidator for ModelProfileConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.key, "lookup.profiles.key")?;
        ValidationUtils::validate_not_empty(&self.model_type, "lookup.profiles.model_type")?;
        ValidationUtils::validate_positive(self.real_time_factor, "lookup.profiles.real_time_factor")?;
        ValidationUtils::validate_non_negative(self.load_seconds, "lookup.profiles.load_seconds")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// 时长查询服务地址，未配置时所有任务使用默认时长
    pub duration_service_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub default_duration_seconds: f64,
    pub profiles: Vec<ModelProfileConfig>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            duration_service_url: None,
            request_timeout_seconds: 5,
            default_duration_seconds: 300.0,
            profiles: vec![ModelProfileConfig {
                key: "default".to_string(),
                model_type: "general".to_string(),
                real_time_factor: 0.5,
                load_seconds: 45.0,
            }],
        }
    }
}

impl ConfigValidator for LookupConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(url) = &self.duration_service_url {
            ValidationUtils::validate_url(url, "lookup.duration_service_url", &["http", "https"])?;
        }
        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "lookup.request_timeout_seconds",
        )?;
        ValidationUtils::validate_positive(
            self.default_duration_seconds,
            "lookup.default_duration_seconds",
        )?;

        if self.profiles.is_empty() {
            return Err(crate::ConfigError::Validation(
                "lookup.profiles cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !seen.insert(profile.key.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "lookup.profiles contains duplicate key: {}",
                    profile.key
                )));
            }
        }

        Ok(())
    }
}
