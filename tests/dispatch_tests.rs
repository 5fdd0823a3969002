//! 多机分发集成测试
//!
//! 使用模拟连接器验证 master/worker 的分配与结果收集

mod common;

use crate::common::{create_test_config, Call, HostBehavior, MockConnector};
use mmtest::common::{FailureReason, OutcomeStatus, Testcase};
use mmtest::dispatch::TestcaseRunner;
use mmtest::error::AppError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn runner(testcase: Testcase, connector: &Arc<MockConnector>) -> TestcaseRunner {
    TestcaseRunner::new(Arc::new(create_test_config()), testcase).with_connector(connector.clone())
}

// ==================== worker 选择 ====================

#[tokio::test]
async fn test_run_defaults_to_all_workers() {
    let connector = Arc::new(MockConnector::new());

    let report = runner(Testcase::diagnostic(), &connector).run().await.unwrap();

    assert_eq!(report.outcomes.len(), 9);
    assert!(report.all_passed());
    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.worker_index).collect();
    assert_eq!(indices, (0..9).collect::<Vec<_>>());
    assert_eq!(report.outcomes[0].host, "2.2.2.103");
    assert_eq!(report.outcomes[8].host, "2.2.2.111");

    let exec = connector.calls_for("2.2.2.107");
    assert!(exec.contains(&Call::Exec {
        command: "ls -al".to_string(),
        timeout_secs: None
    }));
}

#[tokio::test]
async fn test_run_selected_workers_only() {
    let connector = Arc::new(MockConnector::new());

    let report = runner(Testcase::diagnostic(), &connector)
        .with_workers(vec![4, 1, 4])
        .run()
        .await
        .unwrap();

    let indices: Vec<usize> = report.outcomes.iter().map(|o| o.worker_index).collect();
    assert_eq!(indices, vec![1, 4]);
    assert_eq!(connector.hosts_connected(), vec!["2.2.2.104", "2.2.2.107"]);
}

#[tokio::test]
async fn test_run_uses_configured_indices() {
    let connector = Arc::new(MockConnector::new());
    let mut config = create_test_config();
    config.dispatch.worker_indices = vec![0];

    let report = TestcaseRunner::new(Arc::new(config), Testcase::diagnostic())
        .with_connector(connector.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].host, "2.2.2.103");
}

#[tokio::test]
async fn test_run_with_explicit_addresses() {
    let connector = Arc::new(MockConnector::new());
    let mut config = create_test_config();
    config.workers.addresses = vec!["lab-a".to_string(), "lab-b".to_string()];

    let report = TestcaseRunner::new(Arc::new(config), Testcase::diagnostic())
        .with_connector(connector.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(connector.hosts_connected(), vec!["lab-a", "lab-b"]);
}

#[tokio::test]
async fn test_out_of_range_index_is_rejected_before_dispatch() {
    let connector = Arc::new(MockConnector::new());

    let result = runner(Testcase::diagnostic(), &connector)
        .with_workers(vec![0, 9])
        .run()
        .await;

    match result {
        Err(AppError::WorkerIndexOutOfRange { index, len }) => {
            assert_eq!(index, 9);
            assert_eq!(len, 9);
        }
        other => panic!("Expected WorkerIndexOutOfRange, got {:?}", other.map(|r| r.summary())),
    }
    assert!(connector.calls().is_empty());
}

// ==================== 结果收集 ====================

#[tokio::test]
async fn test_run_returns_after_all_workers_finish() {
    let connector = Arc::new(
        MockConnector::new()
            .with_host("2.2.2.103", HostBehavior::slow(Duration::from_millis(200)))
            .with_host("2.2.2.104", HostBehavior::slow(Duration::from_millis(50))),
    );

    let report = runner(Testcase::diagnostic(), &connector)
        .with_workers(vec![0, 1])
        .run()
        .await
        .unwrap();

    assert_eq!(report.passed(), 2);
    // 两个会话都已关闭
    assert_eq!(connector.calls_for("2.2.2.103").last(), Some(&Call::Close));
    assert_eq!(connector.calls_for("2.2.2.104").last(), Some(&Call::Close));
}

#[tokio::test]
async fn test_connection_failure_is_reported() {
    let connector = Arc::new(MockConnector::new().with_host("2.2.2.104", HostBehavior::refused()));

    let report = runner(Testcase::diagnostic(), &connector)
        .with_workers(vec![0, 1, 2])
        .run()
        .await
        .unwrap();

    assert!(!report.all_passed());
    assert_eq!(report.passed(), 2);
    assert_eq!(report.errored(), 1);

    let outcome = report.outcome(1).unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Errored);
    assert_eq!(outcome.failure_reason, Some(FailureReason::NetworkError));
    assert!(outcome.execution.is_none());
    assert!(outcome.error.as_deref().unwrap().contains("Connection refused"));
    assert_eq!(connector.calls_for("2.2.2.104"), vec![Call::Connect]);
}

#[tokio::test]
async fn test_non_zero_exit_is_failed() {
    let connector = Arc::new(MockConnector::new().with_host("2.2.2.105", HostBehavior::exit(2)));

    let report = runner(Testcase::new("unit", "make test"), &connector)
        .with_workers(vec![2])
        .run()
        .await
        .unwrap();

    let outcome = report.outcome(2).unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.failure_reason, Some(FailureReason::CommandFailed));
    let execution = outcome.execution.as_ref().unwrap();
    assert_eq!(execution.exit_code, Some(2));
    assert!(execution.stderr.contains("command failed"));
    assert_eq!(report.failed(), 1);
}

// ==================== 测试用例步骤 ====================

#[tokio::test]
async fn test_worker_steps_run_in_order() {
    let connector = Arc::new(MockConnector::new());
    let testcase = Testcase::new("suite", "./run_suite.sh")
        .with_upload("fixtures/run_suite.sh", "/tmp/run_suite.sh")
        .with_download("/tmp/report.xml", "out/report.xml")
        .with_timeout(30);

    let report = runner(testcase, &connector)
        .with_workers(vec![3])
        .run()
        .await
        .unwrap();

    assert!(report.all_passed());
    assert_eq!(
        connector.calls_for("2.2.2.106"),
        vec![
            Call::Connect,
            Call::Put {
                local: PathBuf::from("fixtures/run_suite.sh"),
                remote: "/tmp/run_suite.sh".to_string(),
            },
            Call::Exec {
                command: "./run_suite.sh".to_string(),
                timeout_secs: Some(30),
            },
            Call::Get {
                remote: "/tmp/report.xml".to_string(),
                local: PathBuf::from("out/report.xml"),
            },
            Call::Close,
        ]
    );
}

#[tokio::test]
async fn test_download_failure_keeps_command_output() {
    let connector = Arc::new(MockConnector::new().with_host(
        "2.2.2.103",
        HostBehavior {
            fail_download: true,
            ..Default::default()
        },
    ));
    let testcase = Testcase::new("suite", "true").with_download("/tmp/missing.log", "missing.log");

    let report = runner(testcase, &connector)
        .with_workers(vec![0])
        .run()
        .await
        .unwrap();

    let outcome = report.outcome(0).unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Errored);
    assert_eq!(outcome.failure_reason, Some(FailureReason::TransferFailed));
    assert_eq!(outcome.execution.as_ref().unwrap().exit_code, Some(0));
    // 出错后仍然关闭会话
    assert_eq!(connector.calls_for("2.2.2.103").last(), Some(&Call::Close));
}

#[tokio::test]
async fn test_run_worker_single_index() {
    let connector = Arc::new(MockConnector::new());

    let outcome = runner(Testcase::diagnostic(), &connector)
        .run_worker(0)
        .await
        .unwrap();

    assert!(outcome.is_passed());
    assert_eq!(outcome.host, "2.2.2.103");
    assert_eq!(outcome.worker_index, 0);
    assert_eq!(connector.hosts_connected(), vec!["2.2.2.103"]);

    let result = runner(Testcase::diagnostic(), &connector).run_worker(42).await;
    assert!(matches!(
        result,
        Err(AppError::WorkerIndexOutOfRange { index: 42, len: 9 })
    ));
}
