//! SSH 连接配置模型
//!
//! 统一的 SSH 配置定义，可被会话客户端和分发器共享

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：首次连接时接受并记录新密钥，之后验证
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

impl std::fmt::Display for HostKeyVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Strict => "strict",
            Self::Accept => "accept",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// SSH 认证方式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAuth {
    /// 私钥认证
    Key {
        /// 私钥文件路径
        private_key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<String>,
    },
    /// 密码认证
    Password { password: String },
}

/// SSH 连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// 主机地址
    pub host: String,

    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// 用户名
    pub username: String,

    /// 认证方式
    pub auth: SshAuth,

    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// 握手超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub handshake_timeout_secs: u64,

    /// 命令执行超时（秒），None 表示一直等待
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// 主机密钥验证策略
    #[serde(default)]
    pub host_key_verification: HostKeyVerification,

    /// known_hosts 存储文件，None 时只在内存中记录
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,

    /// OpenSSH 格式的系统 known_hosts 文件（只读）
    #[serde(default)]
    pub system_known_hosts_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl SshConfig {
    /// 创建新的 SSH 配置
    pub fn new(host: String, username: String, auth: SshAuth) -> Self {
        Self {
            host,
            port: default_ssh_port(),
            username,
            auth,
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_connect_timeout(),
            command_timeout_secs: None,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_file: None,
            system_known_hosts_file: None,
        }
    }

    /// 创建使用私钥认证的配置
    pub fn with_key(
        host: String,
        username: String,
        private_key_path: PathBuf,
        passphrase: Option<String>,
    ) -> Self {
        Self::new(
            host,
            username,
            SshAuth::Key {
                private_key_path,
                passphrase,
            },
        )
    }

    /// 创建使用密码认证的配置
    pub fn with_password(host: String, username: String, password: String) -> Self {
        Self::new(host, username, SshAuth::Password { password })
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout_secs: u64) -> Self {
        self.connect_timeout_secs = timeout_secs;
        self
    }

    /// 设置握手超时
    pub fn with_handshake_timeout(mut self, timeout_secs: u64) -> Self {
        self.handshake_timeout_secs = timeout_secs;
        self
    }

    /// 设置命令超时
    pub fn with_command_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.command_timeout_secs = timeout_secs;
        self
    }

    /// 设置主机密钥验证策略
    pub fn with_host_key_verification(mut self, verification: HostKeyVerification) -> Self {
        self.host_key_verification = verification;
        self
    }

    /// 设置 known_hosts 存储文件
    pub fn with_known_hosts_file(mut self, path: Option<PathBuf>) -> Self {
        self.known_hosts_file = path;
        self
    }

    /// 设置系统 known_hosts 文件
    pub fn with_system_known_hosts_file(mut self, path: Option<PathBuf>) -> Self {
        self.system_known_hosts_file = path;
        self
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// 展开以 `~/` 开头的路径，`$HOME` 未设置时原样返回
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}
