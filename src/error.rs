//! 统一错误模型
//! 定义会话客户端和分发器的所有错误类型

use common::FailureReason;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("SSH connection error: {0}")]
    SshConnectionError(String),

    #[error("SSH authentication failed: {0}")]
    SshAuthenticationError(String),

    #[error("SSH execution error: {0}")]
    SshExecutionError(String),

    #[error("Host key rejected for {host}: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("File transfer error: {0}")]
    TransferError(String),

    #[error("Worker index {index} out of range (pool has {len} workers)")]
    WorkerIndexOutOfRange { index: usize, len: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AppError {
    /// 错误对应的失败原因分类
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            AppError::SshConnectionError(_) => FailureReason::NetworkError,
            AppError::SshAuthenticationError(_) => FailureReason::AuthFailed,
            AppError::HostKeyRejected { .. } => FailureReason::HostKeyRejected,
            AppError::Timeout(_) => FailureReason::ConnectionTimeout,
            AppError::SshExecutionError(_) => FailureReason::CommandFailed,
            AppError::TransferError(_) => FailureReason::TransferFailed,
            AppError::IoError(_)
            | AppError::Config(_)
            | AppError::Internal(_)
            | AppError::WorkerIndexOutOfRange { .. } => FailureReason::Unknown,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Timeout(msg) => format!("Timeout: {}", msg),
            AppError::Internal(msg) => format!("Internal error: {}", msg),
            AppError::SshConnectionError(_) => "SSH connection failed".to_string(),
            AppError::SshAuthenticationError(_) => "SSH authentication failed".to_string(),
            AppError::SshExecutionError(_) => "SSH command execution failed".to_string(),
            AppError::HostKeyRejected { host, .. } => format!("Host key rejected for {}", host),
            AppError::TransferError(_) => "File transfer failed".to_string(),
            AppError::WorkerIndexOutOfRange { index, len } => {
                format!("Worker index {} out of range (0..{})", index, len)
            }
            AppError::IoError(_) => "IO error".to_string(),
        }
    }

    // 便捷方法
    pub fn config(msg: &str) -> Self {
        AppError::Config(msg.to_string())
    }

    pub fn timeout(msg: &str) -> Self {
        AppError::Timeout(msg.to_string())
    }

    pub fn transfer(msg: &str) -> Self {
        AppError::TransferError(msg.to_string())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
