use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics::{Counter, Gauge, Histogram};
use tracing::{debug, info};

/// 调度器指标
///
/// 未安装全局recorder时所有记录操作都是空操作，测试中可直接使用。
#[derive(Clone)]
pub struct DispatcherMetrics {
    tasks_received_total: Counter,
    tasks_dispatched_total: Counter,
    dispatch_failures_total: Counter,
    tasks_requeued_total: Counter,
    tasks_evicted_total: Counter,
    responses_forwarded_total: Counter,
    response_forward_failures_total: Counter,
    unknown_correlations_total: Counter,
    messages_dropped_total: Counter,

    live_workers: Gauge,
    busy_workers: Gauge,
    pending_tasks: Gauge,

    scheduling_pass_duration: Histogram,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self {
            tasks_received_total: counter!("dispatcher_tasks_received_total"),
            tasks_dispatched_total: counter!("dispatcher_tasks_dispatched_total"),
            dispatch_failures_total: counter!("dispatcher_dispatch_failures_total"),
            tasks_requeued_total: counter!("dispatcher_tasks_requeued_total"),
            tasks_evicted_total: counter!("dispatcher_tasks_evicted_total"),
            responses_forwarded_total: counter!("dispatcher_responses_forwarded_total"),
            response_forward_failures_total: counter!(
                "dispatcher_response_forward_failures_total"
            ),
            unknown_correlations_total: counter!("dispatcher_unknown_correlations_total"),
            messages_dropped_total: counter!("dispatcher_messages_dropped_total"),
            live_workers: gauge!("dispatcher_live_workers"),
            busy_workers: gauge!("dispatcher_busy_workers"),
            pending_tasks: gauge!("dispatcher_pending_tasks"),
            scheduling_pass_duration: histogram!("dispatcher_scheduling_pass_duration_seconds"),
        }
    }

    /// 注册指标说明，需在安装recorder之后调用
    pub fn describe() {
        describe_counter!("dispatcher_tasks_received_total", "Accepted work messages");
        describe_counter!(
            "dispatcher_tasks_dispatched_total",
            "Tasks sent to a worker queue"
        );
        describe_counter!(
            "dispatcher_dispatch_failures_total",
            "Dispatch attempts that could not be published"
        );
        describe_counter!(
            "dispatcher_tasks_requeued_total",
            "Tasks returned to pending after their worker was lost"
        );
        describe_counter!(
            "dispatcher_tasks_evicted_total",
            "Tasks dropped after reaching the failure ceiling"
        );
        describe_counter!(
            "dispatcher_responses_forwarded_total",
            "Worker responses relayed to the original caller"
        );
        describe_counter!(
            "dispatcher_response_forward_failures_total",
            "Worker responses that could not be relayed"
        );
        describe_counter!(
            "dispatcher_unknown_correlations_total",
            "Responses whose correlation id is not tracked"
        );
        describe_counter!(
            "dispatcher_messages_dropped_total",
            "Malformed or unresolvable inbound messages"
        );
        describe_gauge!("dispatcher_live_workers", "Workers currently registered");
        describe_gauge!("dispatcher_busy_workers", "Workers holding a task");
        describe_gauge!("dispatcher_pending_tasks", "Tasks eligible for matching");
        describe_histogram!(
            "dispatcher_scheduling_pass_duration_seconds",
            "Duration of one scheduling pass"
        );
    }

    pub fn record_task_received(&self) {
        self.tasks_received_total.increment(1);
    }

    pub fn record_dispatch(&self, task_id: &str, worker: &str) {
        self.tasks_dispatched_total.increment(1);
        debug!(task_id = task_id, worker = worker, "Task dispatched");
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures_total.increment(1);
    }

    pub fn record_requeues(&self, count: usize) {
        if count > 0 {
            self.tasks_requeued_total.increment(count as u64);
        }
    }

    pub fn record_evictions(&self, count: usize) {
        if count > 0 {
            self.tasks_evicted_total.increment(count as u64);
        }
    }

    pub fn record_response_forwarded(&self) {
        self.responses_forwarded_total.increment(1);
    }

    pub fn record_response_forward_failure(&self) {
        self.response_forward_failures_total.increment(1);
    }

    pub fn record_unknown_correlation(&self) {
        self.unknown_correlations_total.increment(1);
    }

    pub fn record_dropped_message(&self) {
        self.messages_dropped_total.increment(1);
    }

    /// 更新注册表规模
    pub fn update_registry(&self, live_workers: usize, busy_workers: usize, pending_tasks: usize) {
        self.live_workers.set(live_workers as f64);
        self.busy_workers.set(busy_workers as f64);
        self.pending_tasks.set(pending_tasks as f64);
    }

    pub fn record_scheduling_pass(&self, duration_seconds: f64) {
        self.scheduling_pass_duration.record(duration_seconds);
    }
}

impl Default for DispatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 安装Prometheus exporter，在给定地址提供 `/metrics`
///
/// 必须在Tokio运行时内调用。
pub fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    DispatcherMetrics::describe();
    info!("Prometheus指标已启用，监听地址: {}", addr);
    Ok(())
}
