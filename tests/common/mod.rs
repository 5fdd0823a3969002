//! 测试公共模块
//! 提供测试配置和模拟 SSH 连接器

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mmtest::{
    common::{ExecutionResult, SshConfig},
    config::{AppConfig, DispatchConfig, LoggingConfig, SshSettings, WorkersConfig},
    error::{AppError, Result},
    ssh::{RemoteConnector, RemoteShell},
};

/// 创建测试配置：默认 9 个 worker（2.2.2.103 - 2.2.2.111）
pub fn create_test_config() -> AppConfig {
    AppConfig {
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "compact".to_string(),
        },
        ssh: SshSettings {
            username: "cyan".to_string(),
            private_key_path: "/keys/id_rsa".to_string(),
            private_key_passphrase: None,
            port: 22,
            connect_timeout_secs: 5,
            handshake_timeout_secs: 5,
            command_timeout_secs: None,
            host_key_verification: "disabled".to_string(),
            known_hosts_file: None,
            system_known_hosts_file: None,
        },
        workers: WorkersConfig {
            addresses: Vec::new(),
            range_start: "2.2.2.103".to_string(),
            range_count: 9,
        },
        dispatch: DispatchConfig {
            worker_indices: Vec::new(),
        },
    }
}

/// 模拟连接上记录的一次调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Put { local: PathBuf, remote: String },
    Exec { command: String, timeout_secs: Option<u64> },
    Get { remote: String, local: PathBuf },
    Close,
}

/// 单个主机的模拟行为
#[derive(Debug, Clone, Default)]
pub struct HostBehavior {
    pub refuse_connection: bool,
    pub exit_code: i32,
    pub delay: Duration,
    pub fail_download: bool,
}

impl HostBehavior {
    pub fn refused() -> Self {
        Self {
            refuse_connection: true,
            ..Default::default()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

type CallLog = Arc<Mutex<Vec<(String, Call)>>>;

/// 按主机返回预设行为的连接器
#[derive(Default)]
pub struct MockConnector {
    behaviors: HashMap<String, HostBehavior>,
    calls: CallLog,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, behavior: HostBehavior) -> Self {
        self.behaviors.insert(host.to_string(), behavior);
        self
    }

    /// 所有调用（主机, 调用）按发生顺序
    pub fn calls(&self) -> Vec<(String, Call)> {
        self.calls.lock().unwrap().clone()
    }

    /// 某个主机上的调用
    pub fn calls_for(&self, host: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, call)| call)
            .collect()
    }

    pub fn hosts_connected(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self
            .calls()
            .into_iter()
            .filter(|(_, call)| *call == Call::Connect)
            .map(|(host, _)| host)
            .collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteShell>> {
        let behavior = self.behaviors.get(&config.host).cloned().unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((config.host.clone(), Call::Connect));

        if behavior.refuse_connection {
            return Err(AppError::SshConnectionError(format!(
                "{}:{}: Connection refused",
                config.host, config.port
            )));
        }

        Ok(Box::new(MockShell {
            host: config.host.clone(),
            behavior,
            calls: self.calls.clone(),
        }))
    }
}

struct MockShell {
    host: String,
    behavior: HostBehavior,
    calls: CallLog,
}

impl MockShell {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((self.host.clone(), call));
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    async fn exec(&self, command: &str, timeout_secs: Option<u64>) -> Result<ExecutionResult> {
        self.record(Call::Exec {
            command: command.to_string(),
            timeout_secs,
        });

        if !self.behavior.delay.is_zero() {
            tokio::time::sleep(self.behavior.delay).await;
        }

        let duration = self.behavior.delay.as_secs_f64();
        if self.behavior.exit_code == 0 {
            Ok(ExecutionResult::success(format!("{}: ok\n", self.host), duration))
        } else {
            Ok(ExecutionResult::failure(
                self.behavior.exit_code,
                String::new(),
                format!("{}: command failed\n", self.host),
                duration,
            ))
        }
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        self.record(Call::Put {
            local: local_path.to_path_buf(),
            remote: remote_path.to_string(),
        });
        Ok(16)
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        self.record(Call::Get {
            remote: remote_path.to_string(),
            local: local_path.to_path_buf(),
        });
        if self.behavior.fail_download {
            return Err(AppError::transfer(&format!(
                "scp: {}: No such file or directory",
                remote_path
            )));
        }
        Ok(32)
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}
