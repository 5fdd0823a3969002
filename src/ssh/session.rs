//! SSH 会话模块
//! 建立并保持一条认证过的 SSH 连接，在其上执行命令和传输文件
//!
//! 使用 russh 库实现 SSH 连接和命令执行

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use russh_keys::load_secret_key;
use russh_keys::PublicKeyBase64;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use common::{ExecutionResult, HostKeyVerification, SshAuth, SshConfig};

use crate::error::{AppError, Result};
use crate::ssh::known_hosts::{
    check_system_known_hosts, fingerprint, HostKeyDecision, KnownHostsStore, SharedKnownHosts,
    SystemHostKey,
};
use crate::ssh::scp;
use crate::telemetry::metric_names;

/// SSH_EXTENDED_DATA_STDERR
const EXTENDED_DATA_STDERR: u32 = 1;

/// 一条认证过的 SSH 连接
pub struct RemoteSession {
    config: SshConfig,
    handle: Handle<SessionHandler>,
}

impl RemoteSession {
    /// 按配置中的 known_hosts 文件打开会话
    pub async fn open(config: &SshConfig) -> Result<Self> {
        let known_hosts = KnownHostsStore::shared(config.known_hosts_file.as_deref()).await?;
        Self::connect(config, known_hosts).await
    }

    /// 建立连接、校验主机密钥并认证
    pub async fn connect(config: &SshConfig, known_hosts: SharedKnownHosts) -> Result<Self> {
        debug!(
            host = %config.host,
            port = config.port,
            user = %config.username,
            "Opening SSH session"
        );

        let stream = timeout(
            Duration::from_secs(config.connect_timeout_secs),
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("TCP连接超时: {}:{}", config.host, config.port)))?
        .map_err(|e| {
            error!(host = %config.host, port = config.port, error = %e, "TCP连接失败");
            AppError::SshConnectionError(format!("{}:{}: {}", config.host, config.port, e))
        })?;

        // 创建 SSH 客户端配置
        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        let handler = SessionHandler {
            host: config.host.clone(),
            port: config.port,
            verification: config.host_key_verification,
            known_hosts,
            system_known_hosts: config.system_known_hosts_file.clone(),
            rejection: Arc::new(std::sync::Mutex::new(None)),
        };
        let rejection = handler.rejection.clone();

        let mut handle = timeout(
            Duration::from_secs(config.handshake_timeout_secs),
            client::connect_stream(client_config, stream, handler),
        )
        .await
        .map_err(|_| AppError::Timeout(format!("SSH握手超时: {}", config.target())))?
        .map_err(|e| {
            let rejected = rejection.lock().ok().and_then(|mut r| r.take());
            match rejected {
                Some(reason) => AppError::HostKeyRejected {
                    host: format!("{}:{}", config.host, config.port),
                    reason,
                },
                None => {
                    error!(host = %config.host, error = %e, "SSH连接失败");
                    AppError::SshConnectionError(format!("SSH连接失败: {}", e))
                }
            }
        })?;

        // 认证
        let authenticated = match &config.auth {
            SshAuth::Key {
                private_key_path,
                passphrase,
            } => {
                let key = load_secret_key(private_key_path, passphrase.as_deref()).map_err(|e| {
                    error!(path = %private_key_path.display(), error = %e, "加载SSH私钥失败");
                    AppError::Config(format!(
                        "加载私钥失败 {}: {}",
                        private_key_path.display(),
                        e
                    ))
                })?;

                handle
                    .authenticate_publickey(config.username.clone(), Arc::new(key))
                    .await
            }
            SshAuth::Password { password } => {
                handle
                    .authenticate_password(config.username.clone(), password)
                    .await
            }
        }
        .map_err(|e| AppError::SshAuthenticationError(format!("{}: {}", config.target(), e)))?;

        if !authenticated {
            error!(remote = %config.target(), "SSH认证失败");
            return Err(AppError::SshAuthenticationError(format!(
                "{}: credentials rejected",
                config.target()
            )));
        }

        info!(remote = %config.target(), "SSH session established");

        Ok(Self {
            config: config.clone(),
            handle,
        })
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// 执行命令，使用会话默认超时
    pub async fn exec(&self, command: &str) -> Result<ExecutionResult> {
        self.exec_with_timeout(command, self.config.command_timeout_secs)
            .await
    }

    /// 执行命令并只返回 (stdout, stderr)
    pub async fn exec_output(&self, command: &str) -> Result<(String, String)> {
        Ok(self.exec(command).await?.output())
    }

    /// 执行命令，timeout_secs 为 None 时一直等待命令结束
    pub async fn exec_with_timeout(
        &self,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<ExecutionResult> {
        let start_time = std::time::Instant::now();

        debug!(host = %self.config.host, command = %command, "Executing SSH command");

        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            error!(error = %e, "打开SSH通道失败");
            AppError::SshConnectionError(format!("打开SSH通道失败: {}", e))
        })?;

        channel.exec(true, command).await.map_err(|e| {
            error!(error = %e, "执行命令失败");
            AppError::SshExecutionError(format!("执行命令失败: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        let mut timed_out = false;
        let deadline = timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs));

        // 读取输出直到通道关闭，exit-status 可能先于剩余数据到达
        loop {
            let msg = match deadline {
                Some(deadline) => match timeout_at(deadline, channel.wait()).await {
                    Ok(msg) => msg,
                    Err(_) => {
                        warn!(host = %self.config.host, command = %command, "命令执行超时");
                        timed_out = true;
                        break;
                    }
                },
                None => channel.wait().await,
            };

            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.extend_from_slice(data);
                }
                Some(ChannelMsg::ExtendedData { ref data, ext }) => {
                    if ext == EXTENDED_DATA_STDERR {
                        stderr.extend_from_slice(data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        let _ = channel.close().await;

        let duration_secs = start_time.elapsed().as_secs_f64();
        metrics::histogram!(metric_names::COMMAND_DURATION).record(duration_secs);

        info!(
            host = %self.config.host,
            exit_code = ?exit_code,
            duration_secs = duration_secs,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            timed_out = timed_out,
            "Command executed"
        );

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let stderr = String::from_utf8_lossy(&stderr).to_string();

        if timed_out {
            return Ok(ExecutionResult::timeout(stdout, stderr, duration_secs));
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_secs,
            timed_out,
        })
    }

    /// 通过 SCP 上传本地文件，返回写入的字节数
    pub async fn put_file(&self, local_path: &Path, remote_path: &str) -> Result<u64> {
        let channel = self.open_channel().await?;
        let bytes = scp::upload(channel, local_path, remote_path).await?;

        info!(
            host = %self.config.host,
            local = %local_path.display(),
            remote = %remote_path,
            bytes = bytes,
            "File uploaded"
        );
        Ok(bytes)
    }

    /// 通过 SCP 下载远程文件，返回读取的字节数
    pub async fn get_file(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        let channel = self.open_channel().await?;
        let bytes = scp::download(channel, remote_path, local_path).await?;

        info!(
            host = %self.config.host,
            remote = %remote_path,
            local = %local_path.display(),
            bytes = bytes,
            "File downloaded"
        );
        Ok(bytes)
    }

    /// 断开连接
    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(|e| AppError::SshConnectionError(format!("断开连接失败: {}", e)))?;

        debug!(host = %self.config.host, "SSH session closed");
        Ok(())
    }

    async fn open_channel(&self) -> Result<russh::Channel<client::Msg>> {
        self.handle.channel_open_session().await.map_err(|e| {
            error!(error = %e, "打开SSH通道失败");
            AppError::SshConnectionError(format!("打开SSH通道失败: {}", e))
        })
    }
}

/// SSH 客户端会话处理器
pub struct SessionHandler {
    host: String,
    port: u16,
    verification: HostKeyVerification,
    known_hosts: SharedKnownHosts,
    system_known_hosts: Option<PathBuf>,
    /// 主机密钥被拒绝的原因，供连接失败时区分错误类型
    rejection: Arc<std::sync::Mutex<Option<String>>>,
}

impl SessionHandler {
    fn reject(&self, reason: String) {
        if let Ok(mut slot) = self.rejection.lock() {
            *slot = Some(reason);
        }
    }
}

#[async_trait]
impl client::Handler for SessionHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = fingerprint(&server_public_key.public_key_base64());
        let host_key = format!("{}:{}", self.host, self.port);

        let system = match &self.system_known_hosts {
            Some(path) if self.verification != HostKeyVerification::Disabled => {
                check_system_known_hosts(&self.host, self.port, server_public_key, path)
            }
            _ => SystemHostKey::Absent,
        };

        let mut store = self.known_hosts.lock().await;
        let decision = store.check_with_system(
            &self.host,
            self.port,
            &fingerprint,
            self.verification,
            &system,
        );

        match &decision {
            HostKeyDecision::Trusted => {
                debug!(host = %host_key, "Host key verified");
            }
            HostKeyDecision::Learned => {
                info!(
                    host = %host_key,
                    fingerprint = %fingerprint,
                    "First time connecting - accepting host key"
                );
                if let Err(e) = store.save().await {
                    warn!(host = %host_key, error = %e, "Failed to persist known host");
                }
            }
            HostKeyDecision::Mismatch { expected } => {
                error!(
                    host = %host_key,
                    expected = %expected,
                    actual = %fingerprint,
                    "Host key mismatch - REJECTING CONNECTION"
                );
                self.reject(format!(
                    "fingerprint changed (expected {}, got {})",
                    expected, fingerprint
                ));
            }
            HostKeyDecision::Unknown => {
                error!(host = %host_key, "Unknown host in strict mode - rejecting connection");
                self.reject("unknown host in strict mode".to_string());
            }
            HostKeyDecision::Unverified => {
                warn!(host = %host_key, "Host key verification DISABLED - accepting all keys");
            }
        }

        Ok(decision.accepted())
    }
}
