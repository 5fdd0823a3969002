//! master 任务
//!
//! 向每个 worker 发送分配，收集结果通道上的 WorkerOutcome 并生成报告

use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use common::{FailureReason, Testcase, WorkerAssignment, WorkerOutcome};

use super::report::RunReport;

/// master 持有的 worker 分配通道
pub struct WorkerTarget {
    pub index: usize,
    pub host: String,
    pub assignments: mpsc::Sender<WorkerAssignment>,
}

pub struct Master {
    run_id: Uuid,
    testcase: Testcase,
    targets: Vec<WorkerTarget>,
    results: mpsc::Receiver<WorkerOutcome>,
}

impl Master {
    pub fn new(
        run_id: Uuid,
        testcase: Testcase,
        targets: Vec<WorkerTarget>,
        results: mpsc::Receiver<WorkerOutcome>,
    ) -> Self {
        Self {
            run_id,
            testcase,
            targets,
            results,
        }
    }

    /// 结果通道的所有发送端关闭后返回报告
    pub async fn run(mut self) -> RunReport {
        let started_at = Utc::now();
        let mut expected: BTreeMap<usize, String> = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(self.targets.len());

        info!(
            run_id = %self.run_id,
            testcase = %self.testcase.name,
            workers = self.targets.len(),
            "Dispatching testcase"
        );

        for target in std::mem::take(&mut self.targets) {
            let assignment = WorkerAssignment {
                run_id: self.run_id,
                worker_index: target.index,
                host: target.host.clone(),
                testcase: self.testcase.clone(),
            };

            match target.assignments.send(assignment).await {
                Ok(()) => {
                    debug!(run_id = %self.run_id, worker_index = target.index, host = %target.host, "Assignment sent");
                    expected.insert(target.index, target.host);
                }
                Err(_) => {
                    error!(run_id = %self.run_id, worker_index = target.index, "worker 已退出，无法发送分配");
                    outcomes.push(WorkerOutcome::errored(
                        self.run_id,
                        target.index,
                        target.host,
                        "worker exited before receiving its assignment".to_string(),
                        FailureReason::Unknown,
                        started_at,
                    ));
                }
            }
            // 发送端在此释放，worker 处理完即退出
        }

        while let Some(outcome) = self.results.recv().await {
            if outcome.run_id != self.run_id {
                debug!(run_id = %outcome.run_id, "Ignoring outcome from another run");
                continue;
            }
            if expected.remove(&outcome.worker_index).is_none() {
                debug!(worker_index = outcome.worker_index, "Ignoring duplicate outcome");
                continue;
            }
            outcomes.push(outcome);
        }

        // 未上报结果的 worker（例如任务 panic）
        for (index, host) in expected {
            error!(run_id = %self.run_id, worker_index = index, host = %host, "worker 未返回结果");
            outcomes.push(WorkerOutcome::errored(
                self.run_id,
                index,
                host,
                "worker stopped without reporting an outcome".to_string(),
                FailureReason::Unknown,
                started_at,
            ));
        }

        let report = RunReport::new(self.run_id, self.testcase.name.clone(), started_at, outcomes);
        info!(run_id = %self.run_id, "{}", report.summary());
        report
    }
}
