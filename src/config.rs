//! 配置系统
//! 依次加载默认值、可选配置文件和环境变量，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment, File};
use secrecy::{ExposeSecret, Secret};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use common::{expand_home, HostKeyVerification, SshAuth, SshConfig};

use crate::dispatch::WorkerPool;

/// 环境变量前缀，例如 MMTEST_SSH__USERNAME
pub const ENV_PREFIX: &str = "MMTEST";

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshSettings {
    /// SSH 用户名
    pub username: String,
    /// 私钥文件路径，支持 ~/ 前缀
    pub private_key_path: String,
    /// 私钥密码（可选，使用 Secret 包装，防止日志泄露）
    #[serde(default)]
    pub private_key_passphrase: Option<Secret<String>>,
    /// 默认端口
    pub port: u16,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 握手超时（秒）
    pub handshake_timeout_secs: u64,
    /// 命令执行超时（秒），不设置则一直等待
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// 主机密钥验证策略（strict/accept/disabled）
    pub host_key_verification: String,
    /// known_hosts 存储文件路径（可选）
    #[serde(default)]
    pub known_hosts_file: Option<String>,
    /// OpenSSH known_hosts 文件，只读，用于识别用户已信任的主机
    #[serde(default)]
    pub system_known_hosts_file: Option<String>,
}

impl SshSettings {
    /// 主机密钥验证策略（已在 validate 中检查过）
    pub fn verification(&self) -> HostKeyVerification {
        self.host_key_verification.parse().unwrap_or_default()
    }

    /// 创建用于特定主机的 SshConfig
    pub fn for_host(&self, host: &str, port: Option<u16>) -> SshConfig {
        let auth = SshAuth::Key {
            private_key_path: expand_home(&self.private_key_path),
            passphrase: self
                .private_key_passphrase
                .as_ref()
                .map(|p| p.expose_secret().clone()),
        };

        SshConfig::new(host.to_string(), self.username.clone(), auth)
            .with_port(port.unwrap_or(self.port))
            .with_connect_timeout(self.connect_timeout_secs)
            .with_handshake_timeout(self.handshake_timeout_secs)
            .with_command_timeout(self.command_timeout_secs)
            .with_host_key_verification(self.verification())
            .with_known_hosts_file(self.known_hosts_file.as_deref().map(expand_home))
            .with_system_known_hosts_file(self.system_known_hosts_file.as_deref().map(expand_home))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// 显式的 worker 地址列表，非空时优先于地址段
    #[serde(default, deserialize_with = "deserialize_list")]
    pub addresses: Vec<String>,
    /// 连续 IPv4 地址段的起始地址
    pub range_start: String,
    /// 地址段长度
    pub range_count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    /// 参与运行的 worker 下标，为空表示全部
    #[serde(default, deserialize_with = "deserialize_list")]
    pub worker_indices: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ssh: SshSettings,
    pub workers: WorkersConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// 列表字段既接受数组，也接受逗号分隔的字符串或单个数值
/// （环境变量中只有一个元素时会被解析成标量）
fn deserialize_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    struct ListVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for ListVisitor<T>
    where
        T: Deserialize<'de> + FromStr,
        T::Err: fmt::Display,
    {
        type Value = Vec<T>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a list or a comma-separated string")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<T>, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(items)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Vec<T>, E> {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.parse::<T>().map_err(E::custom))
                .collect()
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Vec<T>, E> {
            self.visit_str(&value.to_string())
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Vec<T>, E> {
            self.visit_str(&value.to_string())
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Vec<T>, E> {
            self.visit_str(&value.to_string())
        }

        fn visit_unit<E: de::Error>(self) -> Result<Vec<T>, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(ListVisitor(PhantomData))
}

impl AppConfig {
    /// 只从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// 加载配置：默认值 < 配置文件 < 环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // SSH 默认配置
            .set_default("ssh.username", "cyan")?
            .set_default("ssh.private_key_path", "~/.ssh/id_rsa")?
            .set_default("ssh.port", 22)?
            .set_default("ssh.connect_timeout_secs", 10)?
            .set_default("ssh.handshake_timeout_secs", 10)?
            .set_default("ssh.host_key_verification", "accept")?
            .set_default("ssh.known_hosts_file", "~/.mmtest/known_hosts.json")?
            .set_default("ssh.system_known_hosts_file", "~/.ssh/known_hosts")?
            // Worker 地址段：2.2.2.103 - 2.2.2.111
            .set_default("workers.range_start", "2.2.2.103")?
            .set_default("workers.range_count", 9)?;

        if let Some(path) = path {
            settings = settings.add_source(File::from(path).required(true));
        }

        // 从环境变量加载配置（前缀为 MMTEST_）
        settings = settings.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("workers.addresses")
                .with_list_parse_key("dispatch.worker_indices")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 根据 workers 配置构建地址池
    pub fn worker_pool(&self) -> Result<WorkerPool, ConfigError> {
        if !self.workers.addresses.is_empty() {
            return Ok(WorkerPool::new(self.workers.addresses.clone()));
        }

        let start: Ipv4Addr = self.workers.range_start.parse().map_err(|_| {
            ConfigError::Message(format!(
                "Invalid workers.range_start: {}",
                self.workers.range_start
            ))
        })?;

        WorkerPool::from_range(start, self.workers.range_count)
            .ok_or_else(|| ConfigError::Message("workers range overflows IPv4 space".to_string()))
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        if self.ssh.port == 0 {
            return Err(ConfigError::Message("ssh.port must be > 0".to_string()));
        }

        if self.ssh.username.trim().is_empty() {
            return Err(ConfigError::Message("ssh.username must not be empty".to_string()));
        }

        self.ssh
            .host_key_verification
            .parse::<HostKeyVerification>()
            .map_err(ConfigError::Message)?;

        if self.ssh.connect_timeout_secs == 0 || self.ssh.handshake_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh connect/handshake timeouts must be > 0".to_string(),
            ));
        }

        let pool = self.worker_pool()?;
        if pool.is_empty() {
            return Err(ConfigError::Message("worker pool is empty".to_string()));
        }

        for &index in &self.dispatch.worker_indices {
            if index >= pool.len() {
                return Err(ConfigError::Message(format!(
                    "dispatch.worker_indices contains {} but only {} workers are configured",
                    index,
                    pool.len()
                )));
            }
        }

        Ok(())
    }
}
