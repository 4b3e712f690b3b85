use std::sync::Arc;

use anyhow::{Context, Result};
use scheduler_config::AppConfig;
use scheduler_core::traits::{DurationLookup, MessageQueue, ModelTypeLookup};
use scheduler_dispatcher::{
    CostBasedStrategy, CostModel, DispatchController, ListenerQueues, SchedulerSignal,
    SchedulerState, SharedState, StateListener, WorkerFailureDetector,
    WorkerFailureDetectorConfig,
};
use scheduler_infrastructure::{
    init_metrics, DispatcherMetrics, HttpDurationLookup, MessageQueueFactory, ProfileTypeLookup,
};
use tokio::sync::broadcast;
use tracing::{error, info};

/// 调度服务
///
/// 持有共享状态以及围绕它运行的三个组件：状态监听器、调度循环和Worker失效检测器。
pub struct Application {
    config: AppConfig,
    message_queue: Arc<dyn MessageQueue>,
    state: SharedState,
    listener: Arc<StateListener>,
    controller: Arc<DispatchController>,
    detector: Arc<WorkerFailureDetector>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        if config.observability.metrics_enabled {
            init_metrics(&config.observability.metrics_bind_address)?;
        }

        info!(
            "连接消息队列 ({}): {}",
            MessageQueueFactory::get_type_string(&config.message_queue),
            mask_amqp_url(&config.message_queue.url)
        );
        let message_queue = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("连接消息队列失败")?;

        let duration_lookup: Arc<dyn DurationLookup> = Arc::new(
            HttpDurationLookup::from_config(&config.lookup).context("创建时长查询客户端失败")?,
        );
        let type_lookup: Arc<dyn ModelTypeLookup> =
            Arc::new(ProfileTypeLookup::from_config(&config.lookup));

        Self::with_components(config, message_queue, duration_lookup, type_lookup).await
    }

    /// 使用给定的消息队列与查询服务组装应用
    pub async fn with_components(
        config: AppConfig,
        message_queue: Arc<dyn MessageQueue>,
        duration_lookup: Arc<dyn DurationLookup>,
        type_lookup: Arc<dyn ModelTypeLookup>,
    ) -> Result<Self> {
        let metrics = DispatcherMetrics::new();
        let signal = SchedulerSignal::new();
        let state = SchedulerState::from_config(
            &config.dispatcher,
            config.message_queue.response_queue.clone(),
        )
        .into_shared();

        let listener = Arc::new(StateListener::new(
            state.clone(),
            signal.clone(),
            Arc::clone(&message_queue),
            duration_lookup,
            type_lookup,
            ListenerQueues::from(&config.message_queue),
            metrics.clone(),
        ));
        listener
            .declare_queues()
            .await
            .context("声明调度队列失败")?;

        let controller = Arc::new(DispatchController::new(
            state.clone(),
            signal.clone(),
            Arc::new(CostBasedStrategy::new(CostModel::from(&config.dispatcher))),
            Arc::clone(&message_queue),
            metrics.clone(),
        ));

        let detector = Arc::new(WorkerFailureDetector::new(
            state.clone(),
            signal,
            Arc::clone(&message_queue),
            Some(WorkerFailureDetectorConfig::from(&config.dispatcher)),
            metrics,
        ));

        Ok(Self {
            config,
            message_queue,
            state,
            listener,
            controller,
            detector,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// 运行所有组件直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动调度服务");

        let listener_handle = {
            let listener = Arc::clone(&self.listener);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { listener.run(shutdown_rx).await })
        };

        let controller_handle = {
            let controller = Arc::clone(&self.controller);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { controller.run(shutdown_rx).await })
        };

        let detector_handle = {
            let detector = Arc::clone(&self.detector);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { detector.run(shutdown_rx).await })
        };

        let (listener, controller, detector) =
            tokio::join!(listener_handle, controller_handle, detector_handle);
        for (name, result) in [
            ("状态监听器", listener),
            ("调度循环", controller),
            ("Worker失效检测器", detector),
        ] {
            if let Err(e) = result {
                error!("{}异常退出: {}", name, e);
            }
        }

        self.message_queue
            .close()
            .await
            .context("关闭消息队列失败")?;

        info!("调度服务已停止");
        Ok(())
    }
}

/// 屏蔽AMQP URL中的敏感信息
fn mask_amqp_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
