//! 错误处理单元测试
//!
//! 测试应用错误类型的各种行为

use mmtest::common::FailureReason;
use mmtest::error::AppError;

// ==================== 失败原因映射 ====================

#[test]
fn test_failure_reasons() {
    assert_eq!(
        AppError::HostKeyRejected {
            host: "2.2.2.103:22".to_string(),
            reason: "fingerprint mismatch".to_string()
        }
        .failure_reason(),
        FailureReason::HostKeyRejected
    );
    assert_eq!(
        AppError::SshExecutionError("channel closed".to_string()).failure_reason(),
        FailureReason::CommandFailed
    );
    assert_eq!(AppError::config("bad key").failure_reason(), FailureReason::Unknown);
    assert_eq!(
        AppError::WorkerIndexOutOfRange { index: 9, len: 9 }.failure_reason(),
        FailureReason::Unknown
    );
}

// ==================== 用户消息测试 ====================

#[test]
fn test_user_messages_no_sensitive_info() {
    let error = AppError::SshConnectionError("2.2.2.104:22: Connection refused".to_string());
    assert_eq!(error.user_message(), "SSH connection failed");

    let error = AppError::Config("passphrase hunter2 rejected".to_string());
    assert!(!error.user_message().contains("hunter2"));

    let error = AppError::HostKeyRejected {
        host: "2.2.2.105".to_string(),
        reason: "expected 3f1c".to_string(),
    };
    assert_eq!(error.user_message(), "Host key rejected for 2.2.2.105");
}

// ==================== 错误转换测试 ====================

#[test]
fn test_from_io_error() {
    let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let error: AppError = io_error.into();
    assert!(matches!(error, AppError::IoError(_)));
    assert!(error.to_string().contains("denied"));
}

#[test]
fn test_from_config_error() {
    let error: AppError = config::ConfigError::Message("missing field".to_string()).into();
    assert!(matches!(error, AppError::Config(_)));
    assert_eq!(error.to_string(), "Configuration error: missing field");
}

#[test]
fn test_display_messages() {
    assert_eq!(
        AppError::WorkerIndexOutOfRange { index: 12, len: 9 }.to_string(),
        "Worker index 12 out of range (pool has 9 workers)"
    );
    assert_eq!(AppError::transfer("scp: /tmp/x: No such file").to_string(), "File transfer error: scp: /tmp/x: No such file");
}
