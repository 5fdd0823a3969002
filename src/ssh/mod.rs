//! SSH 模块
//! 会话管理、命令执行、SCP 文件传输和主机密钥存储

pub mod known_hosts;
pub mod scp;
pub mod session;

use std::path::Path;

use async_trait::async_trait;

use common::{ExecutionResult, SshConfig};

use crate::error::Result;

pub use known_hosts::{HostKeyDecision, KnownHostsStore, SharedKnownHosts};
pub use session::RemoteSession;

/// 一条已认证的远程连接
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// 执行命令，timeout_secs 为 None 时使用连接默认超时
    async fn exec(&self, command: &str, timeout_secs: Option<u64>) -> Result<ExecutionResult>;

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64>;

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<u64>;

    async fn close(&self) -> Result<()>;
}

/// 按配置建立远程连接
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteShell>>;
}

#[async_trait]
impl RemoteShell for RemoteSession {
    async fn exec(&self, command: &str, timeout_secs: Option<u64>) -> Result<ExecutionResult> {
        let timeout_secs = timeout_secs.or(self.config().command_timeout_secs);
        self.exec_with_timeout(command, timeout_secs).await
    }

    async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        RemoteSession::put_file(self, local_path, remote_path).await
    }

    async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        RemoteSession::get_file(self, remote_path, local_path).await
    }

    async fn close(&self) -> Result<()> {
        RemoteSession::close(self).await
    }
}

/// 基于 russh 的连接器，所有连接共享同一个主机密钥存储
#[derive(Clone)]
pub struct SshConnector {
    known_hosts: SharedKnownHosts,
}

impl SshConnector {
    pub fn new(known_hosts: SharedKnownHosts) -> Self {
        Self { known_hosts }
    }

    /// 从 known_hosts 文件创建连接器
    pub async fn from_known_hosts_file(path: Option<&Path>) -> Result<Self> {
        Ok(Self::new(KnownHostsStore::shared(path).await?))
    }

    pub fn known_hosts(&self) -> &SharedKnownHosts {
        &self.known_hosts
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, config: &SshConfig) -> Result<Box<dyn RemoteShell>> {
        let session = RemoteSession::connect(config, self.known_hosts.clone()).await?;
        Ok(Box::new(session))
    }
}
