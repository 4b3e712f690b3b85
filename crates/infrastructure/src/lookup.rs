use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use scheduler_config::{LookupConfig, ModelProfileConfig};
use scheduler_core::{
    models::ModelProfile,
    traits::{DurationLookup, ModelTypeLookup},
    SchedulerError, SchedulerResult,
};

/// 可接受的最大音频时长（秒）
pub const MAX_DURATION_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Deserialize)]
struct DurationResponse {
    duration: f64,
}

/// 通过HTTP服务查询任务的音频时长
///
/// 查询失败、超时或返回无效值时使用默认时长。
#[derive(Debug, Clone)]
pub struct HttpDurationLookup {
    client: reqwest::Client,
    base_url: Option<String>,
    default_duration: f64,
}

impl HttpDurationLookup {
    pub fn new(
        base_url: Option<String>,
        timeout: Duration,
        default_duration: f64,
    ) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            default_duration,
        })
    }

    pub fn from_config(config: &LookupConfig) -> SchedulerResult<Self> {
        Self::new(
            config.duration_service_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
            config.default_duration_seconds,
        )
    }

    async fn fetch(&self, base_url: &str, item_id: &str) -> SchedulerResult<f64> {
        let url = format!("{base_url}/{item_id}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SchedulerError::Lookup(format!("请求 {url} 失败: {e}")))?;

        let body: DurationResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::Lookup(format!("解析 {url} 的响应失败: {e}")))?;

        if !(0.0..=MAX_DURATION_SECONDS).contains(&body.duration) {
            return Err(SchedulerError::Lookup(format!(
                "{url} 返回了无效的时长: {}",
                body.duration
            )));
        }
        Ok(body.duration)
    }
}

#[async_trait]
impl DurationLookup for HttpDurationLookup {
    async fn expected_duration(&self, item_id: &str) -> SchedulerResult<f64> {
        let Some(base_url) = self.base_url.as_deref() else {
            return Ok(self.default_duration);
        };

        match self.fetch(base_url, item_id).await {
            Ok(duration) => {
                debug!("任务 {} 的预计时长: {:.1}s", item_id, duration);
                Ok(duration)
            }
            Err(e) => {
                warn!(
                    "查询任务 {} 的时长失败，使用默认值 {}s: {}",
                    item_id, self.default_duration, e
                );
                Ok(self.default_duration)
            }
        }
    }
}

/// 基于配置表的模型类型查询
#[derive(Debug, Clone, Default)]
pub struct ProfileTypeLookup {
    profiles: HashMap<String, ModelProfile>,
}

impl ProfileTypeLookup {
    pub fn new(entries: &[ModelProfileConfig]) -> Self {
        let profiles = entries
            .iter()
            .map(|entry| {
                (
                    entry.key.clone(),
                    ModelProfile {
                        model_type: entry.model_type.clone(),
                        real_time_factor: entry.real_time_factor,
                        load_seconds: entry.load_seconds,
                    },
                )
            })
            .collect();
        Self { profiles }
    }

    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(&config.profiles)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl ModelTypeLookup for ProfileTypeLookup {
    fn resolve(&self, profile: &str) -> SchedulerResult<ModelProfile> {
        self.profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownProfile {
                profile: profile.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 启动只响应一次的HTTP服务，返回其地址
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/durations")
    }

    #[tokio::test]
    async fn test_duration_from_service() {
        let url = serve_once("200 OK", r#"{"duration": 42.5}"#).await;
        let lookup = HttpDurationLookup::new(Some(url), Duration::from_secs(2), 300.0).unwrap();
        assert_eq!(lookup.expected_duration("job-1").await.unwrap(), 42.5);
    }

    #[tokio::test]
    async fn test_duration_falls_back_on_error_status() {
        let url = serve_once("404 Not Found", "{}").await;
        let lookup = HttpDurationLookup::new(Some(url), Duration::from_secs(2), 300.0).unwrap();
        assert_eq!(lookup.expected_duration("job-1").await.unwrap(), 300.0);
    }

    #[tokio::test]
    async fn test_duration_falls_back_on_invalid_value() {
        let url = serve_once("200 OK", r#"{"duration": -1.0}"#).await;
        let lookup = HttpDurationLookup::new(Some(url), Duration::from_secs(2), 120.0).unwrap();
        assert_eq!(lookup.expected_duration("job-1").await.unwrap(), 120.0);
    }

    #[tokio::test]
    async fn test_duration_falls_back_on_out_of_range_value() {
        let url = serve_once("200 OK", r#"{"duration": 1e15}"#).await;
        let lookup = HttpDurationLookup::new(Some(url), Duration::from_secs(2), 120.0).unwrap();
        assert_eq!(lookup.expected_duration("job-1").await.unwrap(), 120.0);
    }

    #[tokio::test]
    async fn test_duration_without_service_uses_default() {
        let lookup = HttpDurationLookup::from_config(&LookupConfig::default()).unwrap();
        assert_eq!(lookup.expected_duration("job-1").await.unwrap(), 300.0);
    }

    #[test]
    fn test_profile_lookup() {
        let lookup = ProfileTypeLookup::new(&[ModelProfileConfig {
            key: "sl-SI".to_string(),
            model_type: "slovene".to_string(),
            real_time_factor: 0.4,
            load_seconds: 30.0,
        }]);

        let profile = lookup.resolve("sl-SI").unwrap();
        assert_eq!(profile.model_type, "slovene");
        assert_eq!(profile.real_time_factor, 0.4);
        assert!(matches!(
            lookup.resolve("en-US"),
            Err(SchedulerError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn test_profile_lookup_from_default_config() {
        let lookup = ProfileTypeLookup::from_config(&LookupConfig::default());
        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.resolve("default").unwrap().model_type, "general");
    }
}
