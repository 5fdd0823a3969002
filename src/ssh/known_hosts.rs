//! 主机密钥存储
//!
//! 以 JSON 形式记录 `host:port -> sha256 指纹`，
//! 按 HostKeyVerification 策略决定是否接受服务端密钥。
//! OpenSSH 的 known_hosts 文件只读参与判断

use russh_keys::key::PublicKey;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use common::HostKeyVerification;

use crate::error::{AppError, Result};

/// 多个会话共享的主机密钥存储
pub type SharedKnownHosts = Arc<Mutex<KnownHostsStore>>;

/// 主机密钥检查结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyDecision {
    /// 与已记录的指纹一致
    Trusted,
    /// 首次连接，已记录
    Learned,
    /// 指纹与记录不一致
    Mismatch { expected: String },
    /// 严格模式下的未知主机
    Unknown,
    /// 验证已禁用
    Unverified,
}

impl HostKeyDecision {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Trusted | Self::Learned | Self::Unverified)
    }
}

/// 系统 known_hosts 中的记录状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemHostKey {
    Match,
    /// 同类型密钥的记录不一致
    Changed { line: usize },
    Absent,
}

/// 查询 OpenSSH known_hosts 文件，文件不存在或无法解析时视为没有记录
pub fn check_system_known_hosts(
    host: &str,
    port: u16,
    key: &PublicKey,
    path: &Path,
) -> SystemHostKey {
    match russh_keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => SystemHostKey::Match,
        Ok(false) => SystemHostKey::Absent,
        Err(russh_keys::Error::KeyChanged { line }) => SystemHostKey::Changed { line },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read system known hosts");
            SystemHostKey::Absent
        }
    }
}

/// 计算公钥（base64 编码）的 sha256 指纹
pub fn fingerprint(public_key_base64: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_base64.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct KnownHostsStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl KnownHostsStore {
    /// 不落盘的存储
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 从文件加载，文件不存在时返回空存储
    pub async fn load(path: &Path) -> Result<Self> {
        let entries = match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AppError::Config(format!("Invalid known hosts file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = entries.len(), "Known hosts loaded");

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// 打开存储并包装为共享句柄
    pub async fn shared(path: Option<&Path>) -> Result<SharedKnownHosts> {
        let store = match path {
            Some(path) => Self::load(path).await?,
            None => Self::in_memory(),
        };
        Ok(Arc::new(Mutex::new(store)))
    }

    fn entry_key(host: &str, port: u16) -> String {
        format!("{}:{}", host, port)
    }

    pub fn get(&self, host: &str, port: u16) -> Option<&str> {
        self.entries.get(&Self::entry_key(host, port)).map(String::as_str)
    }

    pub fn insert(&mut self, host: &str, port: u16, fingerprint: &str) {
        self.entries
            .insert(Self::entry_key(host, port), fingerprint.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 按策略检查服务端指纹，Accept 模式下会记录新主机（需调用 save 落盘）
    pub fn check(
        &mut self,
        host: &str,
        port: u16,
        fingerprint: &str,
        mode: HostKeyVerification,
    ) -> HostKeyDecision {
        if mode == HostKeyVerification::Disabled {
            return HostKeyDecision::Unverified;
        }

        match self.get(host, port) {
            Some(stored) if stored == fingerprint => HostKeyDecision::Trusted,
            Some(stored) => HostKeyDecision::Mismatch {
                expected: stored.to_string(),
            },
            None if mode == HostKeyVerification::Accept => {
                self.insert(host, port, fingerprint);
                HostKeyDecision::Learned
            }
            None => HostKeyDecision::Unknown,
        }
    }

    /// 先参考系统 known_hosts，没有记录时再按 check 处理
    pub fn check_with_system(
        &mut self,
        host: &str,
        port: u16,
        fingerprint: &str,
        mode: HostKeyVerification,
        system: &SystemHostKey,
    ) -> HostKeyDecision {
        if mode == HostKeyVerification::Disabled {
            return HostKeyDecision::Unverified;
        }

        match system {
            SystemHostKey::Changed { line } => HostKeyDecision::Mismatch {
                expected: format!("system known_hosts line {}", line),
            },
            SystemHostKey::Match => match self.get(host, port) {
                Some(stored) if stored != fingerprint => HostKeyDecision::Mismatch {
                    expected: stored.to_string(),
                },
                _ => HostKeyDecision::Trusted,
            },
            SystemHostKey::Absent => self.check(host, port, fingerprint, mode),
        }
    }

    /// 写回文件（先写临时文件再改名）
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| AppError::Internal(format!("Failed to encode known hosts: {}", e)))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        debug!(path = %path.display(), entries = self.entries.len(), "Known hosts saved");
        Ok(())
    }
}
