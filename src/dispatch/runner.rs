//! 测试用例运行器
//!
//! 为每次运行创建一个 master 任务和每个选中 worker 的任务，
//! 等待全部结束后返回报告

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use common::{expand_home, Testcase, WorkerAssignment, WorkerOutcome};

use super::master::{Master, WorkerTarget};
use super::pool::WorkerPool;
use super::report::RunReport;
use super::worker::Worker;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::ssh::{RemoteConnector, SshConnector};

pub struct TestcaseRunner {
    config: Arc<AppConfig>,
    testcase: Testcase,
    connector: Option<Arc<dyn RemoteConnector>>,
    worker_indices: Option<Vec<usize>>,
}

impl TestcaseRunner {
    pub fn new(config: Arc<AppConfig>, testcase: Testcase) -> Self {
        Self {
            config,
            testcase,
            connector: None,
            worker_indices: None,
        }
    }

    /// 替换默认的 SSH 连接器
    pub fn with_connector(mut self, connector: Arc<dyn RemoteConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 指定参与运行的 worker，覆盖 dispatch.worker_indices
    pub fn with_workers(mut self, indices: Vec<usize>) -> Self {
        self.worker_indices = Some(indices);
        self
    }

    /// 选中的 worker 下标：去重并保持顺序，为空时选择全部
    pub fn selected_indices(&self, pool: &WorkerPool) -> Result<Vec<usize>> {
        let requested = self
            .worker_indices
            .as_deref()
            .unwrap_or(self.config.dispatch.worker_indices.as_slice());

        if requested.is_empty() {
            return Ok((0..pool.len()).collect());
        }

        let mut selected = Vec::with_capacity(requested.len());
        for &index in requested {
            if index >= pool.len() {
                return Err(AppError::WorkerIndexOutOfRange {
                    index,
                    len: pool.len(),
                });
            }
            if !selected.contains(&index) {
                selected.push(index);
            }
        }
        Ok(selected)
    }

    async fn connector(&self) -> Result<Arc<dyn RemoteConnector>> {
        if let Some(connector) = &self.connector {
            return Ok(connector.clone());
        }

        let known_hosts = self.config.ssh.known_hosts_file.as_deref().map(expand_home);
        let connector = SshConnector::from_known_hosts_file(known_hosts.as_deref()).await?;
        Ok(Arc::new(connector))
    }

    /// 在选中的 worker 上运行测试用例，所有任务结束后返回
    pub async fn run(&self) -> Result<RunReport> {
        let pool = self.config.worker_pool()?;
        let indices = self.selected_indices(&pool)?;
        let connector = self.connector().await?;
        let run_id = Uuid::new_v4();

        info!(
            run_id = %run_id,
            testcase = %self.testcase.name,
            workers = ?indices,
            "Starting run"
        );

        let (result_tx, result_rx) = mpsc::channel::<WorkerOutcome>(indices.len().max(1));
        let mut targets = Vec::with_capacity(indices.len());
        let mut workers = Vec::with_capacity(indices.len());

        for index in indices {
            let host = pool
                .get(index)
                .ok_or(AppError::WorkerIndexOutOfRange {
                    index,
                    len: pool.len(),
                })?
                .to_string();

            let (assign_tx, assign_rx) = mpsc::channel::<WorkerAssignment>(1);
            let worker = Worker::new(index, self.config.clone(), connector.clone());
            workers.push((index, tokio::spawn(worker.run(assign_rx, result_tx.clone()))));
            targets.push(WorkerTarget {
                index,
                host,
                assignments: assign_tx,
            });
        }
        // master 在所有 worker 释放发送端后结束收集
        drop(result_tx);

        let master = Master::new(run_id, self.testcase.clone(), targets, result_rx);
        let master = tokio::spawn(master.run());

        for (index, handle) in workers {
            if let Err(e) = handle.await {
                error!(run_id = %run_id, worker_index = index, "Worker task failed: {}", e);
            }
        }

        master
            .await
            .map_err(|e| AppError::Internal(format!("master task failed: {}", e)))
    }

    /// 只在一个 worker 上运行，不经过 master
    pub async fn run_worker(&self, index: usize) -> Result<WorkerOutcome> {
        let pool = self.config.worker_pool()?;
        let host = pool
            .get(index)
            .ok_or(AppError::WorkerIndexOutOfRange {
                index,
                len: pool.len(),
            })?
            .to_string();

        let connector = self.connector().await?;
        let assignment = WorkerAssignment {
            run_id: Uuid::new_v4(),
            worker_index: index,
            host,
            testcase: self.testcase.clone(),
        };

        Ok(Worker::new(index, self.config.clone(), connector)
            .execute(&assignment)
            .await)
    }
}
