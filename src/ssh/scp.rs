//! SCP 文件传输
//!
//! 在会话的新通道上运行 `scp -t`（上传）或 `scp -f`（下载），
//! 只支持单个普通文件

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::telemetry::metric_names;

const CHUNK_SIZE: usize = 32 * 1024;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// 文件记录头 `C<mode> <size> <name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl FileHeader {
    pub fn parse(line: &str) -> Result<Self> {
        let record = line
            .trim_end_matches('\n')
            .strip_prefix('C')
            .ok_or_else(|| AppError::transfer(&format!("unexpected scp record: {:?}", line)))?;

        let mut parts = record.splitn(3, ' ');
        let (Some(mode), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AppError::transfer(&format!("malformed scp header: {:?}", line)));
        };

        let mode = u32::from_str_radix(mode, 8)
            .map_err(|_| AppError::transfer(&format!("invalid file mode in header: {:?}", line)))?;
        let size = size
            .parse::<u64>()
            .map_err(|_| AppError::transfer(&format!("invalid file size in header: {:?}", line)))?;

        if name.is_empty() || name.contains('/') || name == ".." {
            return Err(AppError::transfer(&format!("invalid file name in header: {:?}", name)));
        }

        Ok(Self {
            mode,
            size,
            name: name.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("C{:04o} {} {}\n", self.mode & 0o7777, self.size, self.name)
    }
}

/// 单引号包裹，供远程 shell 使用
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// 上传本地文件到 remote_path
pub async fn upload(channel: Channel<Msg>, local_path: &Path, remote_path: &str) -> Result<u64> {
    let metadata = tokio::fs::metadata(local_path).await.map_err(|e| {
        AppError::transfer(&format!("cannot read {}: {}", local_path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(AppError::transfer(&format!(
            "{} is not a regular file",
            local_path.display()
        )));
    }

    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::transfer(&format!("invalid file name: {}", local_path.display())))?;

    let header = FileHeader {
        mode: file_mode(&metadata),
        size: metadata.len(),
        name: name.to_string(),
    };

    let mut scp = ScpChannel::new(channel);
    scp.exec(&format!("scp -t {}", shell_quote(remote_path)))
        .await?;
    scp.read_ack().await?;

    debug!(header = %header.encode().trim_end(), remote = %remote_path, "Sending scp header");
    scp.send(header.encode().as_bytes()).await?;
    scp.read_ack().await?;

    let mut file = tokio::fs::File::open(local_path).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        scp.send(&buf[..n]).await?;
        sent += n as u64;
    }

    if sent != header.size {
        return Err(AppError::transfer(&format!(
            "{} changed during upload ({} of {} bytes)",
            local_path.display(),
            sent,
            header.size
        )));
    }

    scp.send(&[0]).await?;
    scp.read_ack().await?;
    scp.finish().await;

    metrics::counter!(metric_names::TRANSFER_BYTES, "direction" => "upload").increment(sent);
    Ok(sent)
}

/// 下载 remote_path 到本地；local_path 是已存在的目录时沿用远程文件名
pub async fn download(channel: Channel<Msg>, remote_path: &str, local_path: &Path) -> Result<u64> {
    let mut scp = ScpChannel::new(channel);
    scp.exec(&format!("scp -f {}", shell_quote(remote_path)))
        .await?;
    scp.send(&[0]).await?;

    let header = loop {
        let line = scp.read_record().await?;
        match line.as_bytes().first() {
            Some(b'C') => break FileHeader::parse(&line)?,
            // 时间戳记录，确认后继续
            Some(b'T') => scp.send(&[0]).await?,
            Some(b'D') | Some(b'E') => {
                return Err(AppError::transfer(&format!(
                    "{} is a directory, recursive copy is not supported",
                    remote_path
                )))
            }
            _ => {
                return Err(AppError::transfer(&format!(
                    "unexpected scp record: {:?}",
                    line
                )))
            }
        }
    };

    let target = resolve_local_target(local_path, &header.name).await;
    let partial = partial_path(&target);

    // 先写入同目录下的临时文件，收到最终确认后再改名
    let received = match receive_file(&mut scp, &partial, header.size).await {
        Ok(()) => tokio::fs::rename(&partial, &target).await.map_err(|e| {
            AppError::transfer(&format!("cannot write {}: {}", target.display(), e))
        }),
        Err(e) => Err(e),
    };
    if let Err(e) = received {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    scp.send(&[0]).await?;
    scp.finish().await;

    debug!(remote = %remote_path, local = %target.display(), bytes = header.size, "scp download finished");
    metrics::counter!(metric_names::TRANSFER_BYTES, "direction" => "download")
        .increment(header.size);
    Ok(header.size)
}

async fn receive_file(scp: &mut ScpChannel, path: &Path, size: u64) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::transfer(&format!("cannot write {}: {}", path.display(), e)))?;

    scp.send(&[0]).await?;

    let mut remaining = size;
    while remaining > 0 {
        let chunk = scp.read_chunk(remaining).await?;
        file.write_all(&chunk).await?;
        remaining -= chunk.len() as u64;
    }
    file.flush().await?;

    scp.read_ack().await
}

/// 下载过程中使用的临时文件 `.<name>.part`
fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.part", name))
}

async fn resolve_local_target(local_path: &Path, remote_name: &str) -> PathBuf {
    match tokio::fs::metadata(local_path).await {
        Ok(metadata) if metadata.is_dir() => local_path.join(remote_name),
        _ => local_path.to_path_buf(),
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    match metadata.permissions().mode() & 0o7777 {
        0 => DEFAULT_FILE_MODE,
        mode => mode,
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    DEFAULT_FILE_MODE
}

/// 在 SSH 通道之上提供按字节读取
struct ScpChannel {
    channel: Channel<Msg>,
    buffer: VecDeque<u8>,
    stderr: Vec<u8>,
}

impl ScpChannel {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            buffer: VecDeque::new(),
            stderr: Vec::new(),
        }
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| AppError::SshExecutionError(format!("启动 scp 失败: {}", e)))
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| AppError::transfer(&format!("channel write failed: {}", e)))
    }

    /// 拉取下一段数据，通道结束时返回 false
    async fn fill(&mut self) -> bool {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { ref data }) => {
                    self.buffer.extend(data.iter().copied());
                    return true;
                }
                Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                    self.stderr.extend_from_slice(data);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return false,
                _ => {}
            }
        }
    }

    fn closed_error(&self) -> AppError {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            AppError::transfer("remote scp closed the channel unexpectedly")
        } else {
            AppError::transfer(stderr)
        }
    }

    async fn read_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.buffer.pop_front() {
                return Ok(byte);
            }
            if !self.fill().await {
                return Err(self.closed_error());
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte().await?;
            if byte == b'\n' {
                break;
            }
            line.push(byte);
        }
        Ok(String::from_utf8_lossy(&line).to_string())
    }

    /// 读取一条控制记录，远端错误记录（0x01/0x02）转换为错误
    async fn read_record(&mut self) -> Result<String> {
        let first = self.read_byte().await?;
        match first {
            1 | 2 => {
                let message = self.read_line().await?;
                Err(AppError::transfer(message.trim()))
            }
            _ => {
                let rest = self.read_line().await?;
                let mut line = String::with_capacity(rest.len() + 1);
                line.push(first as char);
                line.push_str(&rest);
                Ok(line)
            }
        }
    }

    async fn read_ack(&mut self) -> Result<()> {
        match self.read_byte().await? {
            0 => Ok(()),
            1 | 2 => {
                let message = self.read_line().await?;
                Err(AppError::transfer(message.trim()))
            }
            other => Err(AppError::transfer(&format!(
                "unexpected scp acknowledgement byte: {:#04x}",
                other
            ))),
        }
    }

    async fn read_chunk(&mut self, max: u64) -> Result<Vec<u8>> {
        if self.buffer.is_empty() && !self.fill().await {
            return Err(self.closed_error());
        }
        let take = self.buffer.len().min(max.min(CHUNK_SIZE as u64) as usize);
        Ok(self.buffer.drain(..take).collect())
    }

    /// 发送 EOF 并等待远端关闭通道
    async fn finish(mut self) {
        let _ = self.channel.eof().await;
        while let Some(msg) = self.channel.wait().await {
            if matches!(msg, ChannelMsg::Close) {
                break;
            }
        }
        let _ = self.channel.close().await;
    }
}
