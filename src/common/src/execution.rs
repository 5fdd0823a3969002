//! 统一执行结果模型
//!
//! 定义远程命令执行的通用结果类型，可被会话客户端和分发器共享

use serde::{Deserialize, Serialize};

/// 执行结果 - 远程命令的完整输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 退出码（服务端未上报时为 None）
    pub exit_code: Option<i32>,

    /// 标准输出
    pub stdout: String,

    /// 标准错误
    pub stderr: String,

    /// 执行时长（秒）
    pub duration_secs: f64,

    /// 是否超时
    pub timed_out: bool,
}

impl ExecutionResult {
    /// 创建成功结果
    pub fn success(stdout: String, duration_secs: f64) -> Self {
        Self {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            duration_secs,
            timed_out: false,
        }
    }

    /// 创建失败结果
    pub fn failure(exit_code: i32, stdout: String, stderr: String, duration_secs: f64) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout,
            stderr,
            duration_secs,
            timed_out: false,
        }
    }

    /// 创建超时结果，保留已收到的输出
    pub fn timeout(stdout: String, stderr: String, duration_secs: f64) -> Self {
        Self {
            exit_code: None,
            stdout,
            stderr,
            duration_secs,
            timed_out: true,
        }
    }

    /// 判断是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// 返回 (stdout, stderr)
    pub fn output(&self) -> (String, String) {
        (self.stdout.clone(), self.stderr.clone())
    }

    /// 获取完整输出（stdout + stderr）
    pub fn full_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
            .trim()
            .to_string()
    }

    /// 获取输出摘要（限制长度）
    pub fn output_summary(&self, max_len: usize) -> String {
        let full = self.full_output();
        if full.chars().count() <= max_len {
            full
        } else {
            let truncated: String = full.chars().take(max_len).collect();
            format!("{}...", truncated)
        }
    }
}

/// 失败原因分类
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 网络错误
    NetworkError,
    /// 认证失败
    AuthFailed,
    /// 主机密钥被拒绝
    HostKeyRejected,
    /// 连接超时
    ConnectionTimeout,
    /// 命令超时
    CommandTimeout,
    /// 命令执行失败（非零退出码）
    CommandFailed,
    /// 文件传输失败
    TransferFailed,
    /// 未知错误
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::AuthFailed => "auth_failed",
            Self::HostKeyRejected => "host_key_rejected",
            Self::ConnectionTimeout => "connection_timeout",
            Self::CommandTimeout => "command_timeout",
            Self::CommandFailed => "command_failed",
            Self::TransferFailed => "transfer_failed",
            Self::Unknown => "unknown",
        }
    }
}
