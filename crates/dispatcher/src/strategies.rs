use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use scheduler_config::DispatcherConfig;
use scheduler_core::{
    models::{TaskGroups, TaskView, WorkerSnapshot},
    traits::MatchingStrategy,
    SchedulerError, SchedulerResult,
};

/// 空任务组的代价，表示该列不可用
pub const UNAVAILABLE_COST: f64 = f64::MAX;

/// 代价模型参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// 切换模型类型的代价（秒）
    pub reload_penalty: f64,
    /// 每等待一秒抵扣的代价
    pub delay_cost_per_second: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            reload_penalty: 60.0,
            delay_cost_per_second: 1.0,
        }
    }
}

impl From<&DispatcherConfig> for CostModel {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            reload_penalty: config.reload_penalty_seconds,
            delay_cost_per_second: config.delay_cost_per_second,
        }
    }
}

impl CostModel {
    fn reload_for(&self, worker: &WorkerSnapshot, model_type: &str) -> f64 {
        if worker.is_specialized_for(model_type) {
            0.0
        } else {
            self.reload_penalty
        }
    }

    fn wait_credit(&self, task: &TaskView, now: DateTime<Utc>) -> f64 {
        task.waited_secs(now) * self.delay_cost_per_second
    }
}

/// 基于代价的匹配策略
///
/// 先做全局最优匹配（模型亲和），找不到时用模拟时间线做负载均衡兜底。
#[derive(Debug, Clone, Default)]
pub struct CostBasedStrategy {
    model: CostModel,
}

impl CostBasedStrategy {
    pub fn new(model: CostModel) -> Self {
        Self { model }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.model
    }

    /// 代价矩阵：行为Worker，列为按类型名排序的任务组
    pub fn cost_matrix(
        &self,
        workers: &[WorkerSnapshot],
        groups: &TaskGroups,
        now: DateTime<Utc>,
    ) -> Vec<Vec<f64>> {
        workers
            .iter()
            .map(|worker| {
                groups
                    .iter()
                    .map(|(model_type, tasks)| match tasks.first() {
                        None => UNAVAILABLE_COST,
                        Some(oldest) => {
                            self.model.reload_for(worker, model_type)
                                - self.model.wait_credit(oldest, now)
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// 全局最优匹配：按本Worker代价从低到高，选第一个本Worker为全局最小的列
    fn best_fit(
        &self,
        matrix: &[Vec<f64>],
        groups: &TaskGroups,
        worker_index: usize,
    ) -> Option<String> {
        let own = &matrix[worker_index];
        let mut ranking: Vec<usize> = (0..own.len()).collect();
        ranking.sort_by(|&a, &b| own[a].total_cmp(&own[b]));

        for column in ranking {
            let cost = own[column];
            if cost >= UNAVAILABLE_COST {
                continue;
            }

            // 代价相同时下标较小的Worker胜出
            let is_global_min = matrix.iter().enumerate().all(|(index, row)| {
                row[column] > cost || (row[column] == cost && index >= worker_index)
            });

            if is_global_min {
                let (model_type, tasks) = groups.iter().nth(column)?;
                let task = tasks.first()?;
                trace!(
                    "最优匹配: Worker {} 选择类型 {} 的任务 {} (代价 {:.2})",
                    worker_index,
                    model_type,
                    task.id,
                    cost
                );
                return Some(task.id.clone());
            }
        }

        None
    }

    /// 模拟时间线：对每个类型按先来先服务把任务贪心分给预计最早空闲的Worker
    ///
    /// 类型按键顺序扫描，本Worker第一次成为负载最小者时即选中该任务，不再比较后续类型。
    fn simulated_timeline(
        &self,
        workers: &[WorkerSnapshot],
        groups: &TaskGroups,
        worker_index: usize,
        now: DateTime<Utc>,
    ) -> Option<String> {
        for (model_type, tasks) in groups {
            let mut load: Vec<f64> = workers
                .iter()
                .map(|w| w.remaining_busy_secs + self.model.reload_for(w, model_type))
                .collect();

            for task in tasks {
                let (min_index, min_value) = load
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f64::INFINITY), |acc, (i, v)| if v < acc.1 { (i, v) } else { acc });

                let own = load[worker_index];
                if own <= min_value {
                    trace!(
                        "模拟时间线: Worker {} 选择类型 {} 的任务 {} (预计负载 {:.2})",
                        worker_index,
                        model_type,
                        task.id,
                        own
                    );
                    return Some(task.id.clone());
                }

                load[min_index] += task.processing_secs - self.model.wait_credit(task, now);
            }
        }

        None
    }
}

impl MatchingStrategy for CostBasedStrategy {
    fn select_for(
        &self,
        workers: &[WorkerSnapshot],
        groups: &TaskGroups,
        worker_index: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<String>> {
        if workers.is_empty() {
            return Err(SchedulerError::NoWorkers);
        }
        if worker_index >= workers.len() {
            return Err(SchedulerError::WorkerIndexOutOfRange {
                index: worker_index,
                len: workers.len(),
            });
        }
        if workers[worker_index].busy {
            debug!("Worker {} 正忙，跳过匹配", workers[worker_index].queue);
            return Ok(None);
        }
        if groups.values().all(|tasks| tasks.is_empty()) {
            return Ok(None);
        }

        let matrix = self.cost_matrix(workers, groups, now);
        if let Some(task_id) = self.best_fit(&matrix, groups, worker_index) {
            return Ok(Some(task_id));
        }

        Ok(self.simulated_timeline(workers, groups, worker_index, now))
    }

    fn name(&self) -> &str {
        "CostBased"
    }
}
