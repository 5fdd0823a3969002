//! 分发协议消息定义
//!
//! master 通过分配通道把测试用例发给 worker，
//! worker 通过结果通道把执行结果发回 master

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::{ExecutionResult, FailureReason};
use crate::testcase::Testcase;

/// 测试用例分配（master -> worker）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    /// 本次运行 ID
    pub run_id: Uuid,

    /// worker 在地址列表中的位置
    pub worker_index: usize,

    /// worker 地址
    pub host: String,

    /// 待执行的测试用例
    pub testcase: Testcase,
}

/// 执行结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// 命令以 0 退出
    Passed,
    /// 命令已执行但非零退出或超时
    Failed,
    /// 命令未能执行（连接、认证、传输等错误）
    Errored,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
        }
    }
}

/// worker 执行结果（worker -> master）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub run_id: Uuid,

    pub worker_index: usize,

    pub host: String,

    pub status: OutcomeStatus,

    /// 命令输出（命令未执行时为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,

    /// 错误详情
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,
}

impl WorkerOutcome {
    /// 根据命令执行结果生成 Passed 或 Failed
    pub fn from_execution(
        assignment: &WorkerAssignment,
        execution: ExecutionResult,
        started_at: DateTime<Utc>,
    ) -> Self {
        let (status, failure_reason) = if execution.is_success() {
            (OutcomeStatus::Passed, None)
        } else if execution.timed_out {
            (OutcomeStatus::Failed, Some(FailureReason::CommandTimeout))
        } else {
            (OutcomeStatus::Failed, Some(FailureReason::CommandFailed))
        };

        Self {
            run_id: assignment.run_id,
            worker_index: assignment.worker_index,
            host: assignment.host.clone(),
            status,
            execution: Some(execution),
            error: None,
            failure_reason,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 命令未能完成
    pub fn errored(
        run_id: Uuid,
        worker_index: usize,
        host: String,
        error: String,
        failure_reason: FailureReason,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            worker_index,
            host,
            status: OutcomeStatus::Errored,
            execution: None,
            error: Some(error),
            failure_reason: Some(failure_reason),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 保留已执行的命令输出，同时标记后续步骤的错误
    pub fn with_execution(mut self, execution: ExecutionResult) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == OutcomeStatus::Passed
    }
}
