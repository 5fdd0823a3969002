//! 测试用例模型
//!
//! 一个测试用例就是在 worker 上执行的一条 shell 命令，
//! 执行前可上传文件，执行后可取回产物

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 默认诊断命令
pub const DIAGNOSTIC_COMMAND: &str = "ls -al";

/// 单个文件传输
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    /// 本地路径
    pub local_path: PathBuf,
    /// 远程路径
    pub remote_path: String,
}

/// 测试用例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testcase {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// 测试用例名称
    pub name: String,

    /// 在 worker 上执行的命令
    pub command: String,

    /// 执行前上传到 worker 的文件
    #[serde(default)]
    pub uploads: Vec<FileTransfer>,

    /// 执行后从 worker 取回的文件
    #[serde(default)]
    pub downloads: Vec<FileTransfer>,

    /// 覆盖会话默认的命令超时（秒）
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Testcase {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            command: command.into(),
            uploads: Vec::new(),
            downloads: Vec::new(),
            timeout_secs: None,
        }
    }

    /// 列出 worker 的工作目录
    pub fn diagnostic() -> Self {
        Self::new("diagnostic", DIAGNOSTIC_COMMAND)
    }

    pub fn with_upload(mut self, local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        self.uploads.push(FileTransfer {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        });
        self
    }

    pub fn with_download(
        mut self,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        self.downloads.push(FileTransfer {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    /// 从 JSON 解析测试用例
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
