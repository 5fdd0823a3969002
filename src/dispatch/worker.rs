//! worker 任务
//!
//! 从分配通道接收测试用例，在对应主机上执行后把结果写入结果通道

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::{ExecutionResult, WorkerAssignment, WorkerOutcome};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::ssh::{RemoteConnector, RemoteShell};
use crate::telemetry::metric_names;

pub struct Worker {
    index: usize,
    config: Arc<AppConfig>,
    connector: Arc<dyn RemoteConnector>,
}

impl Worker {
    pub fn new(index: usize, config: Arc<AppConfig>, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            index,
            config,
            connector,
        }
    }

    /// 处理分配直到通道关闭
    pub async fn run(
        self,
        mut assignments: mpsc::Receiver<WorkerAssignment>,
        results: mpsc::Sender<WorkerOutcome>,
    ) {
        debug!(worker_index = self.index, "Worker started");

        while let Some(assignment) = assignments.recv().await {
            let outcome = self.execute(&assignment).await;
            if results.send(outcome).await.is_err() {
                error!(worker_index = self.index, run_id = %assignment.run_id, "结果通道已关闭，丢弃结果");
                break;
            }
        }

        debug!(worker_index = self.index, "Worker stopped");
    }

    /// 执行一个分配：连接、上传、执行命令、下载、断开
    pub async fn execute(&self, assignment: &WorkerAssignment) -> WorkerOutcome {
        let started_at = Utc::now();
        let host = assignment.host.as_str();

        info!(
            worker_index = assignment.worker_index,
            host = %host,
            run_id = %assignment.run_id,
            testcase = %assignment.testcase.name,
            "Running testcase on worker"
        );

        let ssh_config = self.config.ssh.for_host(host, None);
        let outcome = match self.connector.connect(&ssh_config).await {
            Ok(shell) => {
                let outcome = self.run_steps(shell.as_ref(), assignment, started_at).await;
                if let Err(e) = shell.close().await {
                    warn!(worker_index = assignment.worker_index, host = %host, "关闭会话失败: {}", e);
                }
                outcome
            }
            Err(e) => errored(assignment, &e, started_at),
        };

        metrics::counter!(metric_names::WORKER_OUTCOMES, "status" => outcome.status.as_str())
            .increment(1);

        match &outcome.error {
            Some(err) => warn!(
                worker_index = assignment.worker_index,
                host = %host,
                status = outcome.status.as_str(),
                "Worker finished with error: {}",
                err
            ),
            None => info!(
                worker_index = assignment.worker_index,
                host = %host,
                status = outcome.status.as_str(),
                exit_code = ?outcome.execution.as_ref().and_then(|e| e.exit_code),
                "Worker finished"
            ),
        }

        outcome
    }

    async fn run_steps(
        &self,
        shell: &dyn RemoteShell,
        assignment: &WorkerAssignment,
        started_at: DateTime<Utc>,
    ) -> WorkerOutcome {
        let testcase = &assignment.testcase;

        for upload in &testcase.uploads {
            if let Err(e) = shell.put_file(&upload.local_path, &upload.remote_path).await {
                return errored(assignment, &e, started_at);
            }
        }

        let execution: ExecutionResult = match shell.exec(&testcase.command, testcase.timeout_secs).await {
            Ok(execution) => execution,
            Err(e) => return errored(assignment, &e, started_at),
        };

        // 命令失败时也取回产物，便于排查
        for download in &testcase.downloads {
            if let Err(e) = shell.get_file(&download.remote_path, &download.local_path).await {
                return errored(assignment, &e, started_at).with_execution(execution);
            }
        }

        WorkerOutcome::from_execution(assignment, execution, started_at)
    }
}

fn errored(assignment: &WorkerAssignment, error: &AppError, started_at: DateTime<Utc>) -> WorkerOutcome {
    WorkerOutcome::errored(
        assignment.run_id,
        assignment.worker_index,
        assignment.host.clone(),
        error.to_string(),
        error.failure_reason(),
        started_at,
    )
}
