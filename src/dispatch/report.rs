//! 运行报告

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use common::{OutcomeStatus, WorkerOutcome};

/// 简要模式下失败输出的截断长度
const BRIEF_OUTPUT_LEN: usize = 400;
const OUTPUT_INDENT: &str = "      ";

/// 一次运行的全部 worker 结果
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// 测试用例名称
    pub testcase: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 按 worker 下标排序
    pub outcomes: Vec<WorkerOutcome>,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        testcase: String,
        started_at: DateTime<Utc>,
        mut outcomes: Vec<WorkerOutcome>,
    ) -> Self {
        outcomes.sort_by_key(|o| o.worker_index);
        Self {
            run_id,
            testcase,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(OutcomeStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(OutcomeStatus::Failed)
    }

    pub fn errored(&self) -> usize {
        self.count(OutcomeStatus::Errored)
    }

    /// 至少有一个 worker 且全部通过
    pub fn all_passed(&self) -> bool {
        !self.outcomes.is_empty() && self.passed() == self.outcomes.len()
    }

    pub fn outcome(&self, worker_index: usize) -> Option<&WorkerOutcome> {
        self.outcomes.iter().find(|o| o.worker_index == worker_index)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// 单行摘要
    pub fn summary(&self) -> String {
        format!(
            "{}: {} workers, {} passed, {} failed, {} errored ({:.2}s)",
            self.testcase,
            self.outcomes.len(),
            self.passed(),
            self.failed(),
            self.errored(),
            self.duration_secs()
        )
    }

    /// 文本报告：每个 worker 一行，命令输出缩进附在其后，最后是摘要。
    /// brief 为 true 时只附上未通过 worker 的截断输出
    pub fn render(&self, brief: bool) -> String {
        let mut out = String::new();

        for outcome in &self.outcomes {
            let detail = match (&outcome.execution, &outcome.error) {
                (_, Some(error)) => error.clone(),
                (Some(execution), None) => match execution.exit_code {
                    Some(code) => format!("exit {} ({:.2}s)", code, execution.duration_secs),
                    None if execution.timed_out => {
                        format!("timed out ({:.2}s)", execution.duration_secs)
                    }
                    None => format!("no exit status ({:.2}s)", execution.duration_secs),
                },
                (None, None) => String::new(),
            };
            let line = format!(
                "[{:>3}] {:<16} {:<8} {}",
                outcome.worker_index,
                outcome.host,
                outcome.status.as_str(),
                detail
            );
            out.push_str(line.trim_end());
            out.push('\n');

            let Some(execution) = &outcome.execution else {
                continue;
            };
            let output = if !brief {
                execution.full_output()
            } else if outcome.status != OutcomeStatus::Passed {
                execution.output_summary(BRIEF_OUTPUT_LEN)
            } else {
                continue;
            };
            for line in output.lines() {
                out.push_str(OUTPUT_INDENT);
                out.push_str(line);
                out.push('\n');
            }
        }

        out.push_str(&self.summary());
        out
    }
}
