//! Streaming dump → compress pipeline.
//!
//! The dump tool and the compressor run as two child processes. A producer
//! task reads the dump's stdout in fixed-size chunks and hands them over a
//! bounded channel to a consumer task that writes them into the compressor's
//! stdin. A slow compressor fills the channel, the producer stops reading,
//! and the dump tool blocks on its full pipe, so memory stays bounded by
//! `CHUNK_SIZE * PIPE_DEPTH` no matter how large the database is.

use crate::backup::compression::{calculate_sha256, seven_zip_command};
use crate::config::{DumpFormat, ServerConfig, ToolsConfig};
use crate::database::{describe_target, dump_command};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 64 * 1024;
const PIPE_DEPTH: usize = 16;
const STDERR_TAIL: usize = 4 * 1024;

/// One external program in the pipeline.
#[derive(Debug, Clone)]
pub struct StageCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl StageCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[cfg(test)]
    pub fn arg_list(&self) -> &[OsString] {
        &self.args
    }

    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        command
    }
}

/// Archive produced by a successful pipeline run. Deleted by the caller once
/// uploaded or abandoned.
#[derive(Debug, Clone)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// Uncompressed bytes that flowed from the dump tool to the compressor.
    pub dump_bytes: u64,
    pub sha256: Option<String>,
}

impl ArchiveArtifact {
    pub fn discard(&self) {
        remove_archive(&self.path);
    }
}

/// Removes an archive that is finished with, logging anything but "not found".
fn remove_archive(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove archive {}: {}", path.display(), e);
        }
    }
}

pub struct ArchiveRequest<'a> {
    pub server: &'a ServerConfig,
    pub format: DumpFormat,
    pub archive_path: &'a Path,
    pub passphrase: Option<&'a str>,
}

/// Produces an archive for one server.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn create(&self, request: &ArchiveRequest<'_>) -> Result<ArchiveArtifact>;
}

/// `pg_dump` piped into `7z`.
pub struct DumpCompressPipeline {
    tools: ToolsConfig,
    timeout: Option<Duration>,
}

impl DumpCompressPipeline {
    pub fn new(tools: ToolsConfig, timeout: Option<Duration>) -> Self {
        Self { tools, timeout }
    }

    async fn stream(&self, dump: &StageCommand, compressor: &StageCommand) -> Result<u64> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, stream_dump(dump, compressor))
                .await
                .map_err(|_| {
                    BackupError::Dump(format!("pipeline timed out after {}s", limit.as_secs()))
                })?,
            None => stream_dump(dump, compressor).await,
        }
    }
}

#[async_trait]
impl Archiver for DumpCompressPipeline {
    async fn create(&self, request: &ArchiveRequest<'_>) -> Result<ArchiveArtifact> {
        let server = request.server;
        let start = Instant::now();

        // 7z appends to an existing archive instead of replacing it
        if request.archive_path.exists() {
            std::fs::remove_file(request.archive_path)?;
        }

        let entry_name = format!("{}.{}", server.id, request.format.entry_extension());
        let dump = dump_command(
            &self.tools.pg_dump,
            &server.connection_string,
            request.format,
            &server.exclude_tables,
        );
        let compressor = seven_zip_command(
            &self.tools.seven_zip,
            request.archive_path,
            &entry_name,
            request.passphrase,
        );

        info!(
            "Dumping {} ({} format) into {}",
            describe_target(&server.connection_string),
            request.format,
            request.archive_path.display()
        );

        let dump_bytes = match self.stream(&dump, &compressor).await {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_archive(request.archive_path);
                return Err(e);
            }
        };

        let size = std::fs::metadata(request.archive_path)
            .map_err(|e| {
                BackupError::Compression(format!(
                    "compressor reported success but {} is unreadable: {}",
                    request.archive_path.display(),
                    e
                ))
            })?
            .len();
        let sha256 = calculate_sha256(request.archive_path).ok();

        info!(
            "Archive ready: {} bytes from {} dumped bytes in {} sec",
            size,
            dump_bytes,
            start.elapsed().as_secs()
        );

        Ok(ArchiveArtifact {
            path: request.archive_path.to_path_buf(),
            size,
            dump_bytes,
            sha256,
        })
    }
}

/// Runs `dump` with its stdout streamed into `compressor`'s stdin.
///
/// Returns the number of bytes streamed. A non-zero compressor exit is a
/// [`BackupError::Compression`]; otherwise a non-zero dump exit is a
/// [`BackupError::Dump`].
pub async fn stream_dump(dump: &StageCommand, compressor: &StageCommand) -> Result<u64> {
    let mut dump_child = dump
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BackupError::Dump(format!("failed to start {}: {}", dump.name(), e)))?;

    let mut compress_child = compressor
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            BackupError::Compression(format!("failed to start {}: {}", compressor.name(), e))
        })?;

    let dump_out = dump_child
        .stdout
        .take()
        .ok_or_else(|| BackupError::Dump("dump stdout unavailable".to_string()))?;
    let compress_in = compress_child
        .stdin
        .take()
        .ok_or_else(|| BackupError::Compression("compressor stdin unavailable".to_string()))?;

    let dump_stderr = tokio::spawn(read_tail(dump_child.stderr.take()));
    let compress_stderr = tokio::spawn(read_tail(compress_child.stderr.take()));

    let (tx, rx) = mpsc::channel::<Vec<u8>>(PIPE_DEPTH);
    let producer = tokio::spawn(produce(dump_out, tx));
    let consumer = tokio::spawn(consume(rx, compress_in));
    let (produced, consumed) = tokio::join!(producer, consumer);

    let dump_status = dump_child.wait().await?;
    let compress_status = compress_child.wait().await?;
    let dump_stderr = dump_stderr.await.unwrap_or_default();
    let compress_stderr = compress_stderr.await.unwrap_or_default();

    if !compress_status.success() {
        return Err(BackupError::Compression(exit_message(
            &compressor.name(),
            compress_status,
            &compress_stderr,
        )));
    }
    if !dump_status.success() {
        return Err(BackupError::Dump(exit_message(
            &dump.name(),
            dump_status,
            &dump_stderr,
        )));
    }

    let produced = produced
        .map_err(|e| BackupError::Dump(format!("dump reader task failed: {}", e)))?
        .map_err(|e| BackupError::Dump(format!("reading dump output: {}", e)))?;
    let consumed = consumed
        .map_err(|e| BackupError::Compression(format!("compressor writer task failed: {}", e)))?
        .map_err(|e| BackupError::Compression(format!("writing to compressor: {}", e)))?;

    if produced != consumed {
        return Err(BackupError::Compression(format!(
            "compressor accepted {} of {} dumped bytes",
            consumed, produced
        )));
    }

    debug!("Streamed {} bytes from {} to {}", consumed, dump.name(), compressor.name());
    Ok(consumed)
}

async fn produce<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        if tx.send(buffer[..bytes_read].to_vec()).await.is_err() {
            // consumer is gone; its own error explains why
            break;
        }
        total += bytes_read as u64;
    }

    Ok(total)
}

async fn consume<W>(mut rx: mpsc::Receiver<Vec<u8>>, mut writer: W) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;

    while let Some(chunk) = rx.recv().await {
        writer.write_all(&chunk).await?;
        total += chunk.len() as u64;
    }

    writer.shutdown().await?;
    Ok(total)
}

async fn read_tail<R>(reader: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };

    let mut tail: Vec<u8> = Vec::new();
    let mut buffer = vec![0u8; 8 * 1024];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buffer[..n]);
                if tail.len() > STDERR_TAIL * 2 {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
        }
    }

    let start = tail.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&tail[start..]).trim().to_string()
}

fn exit_message(name: &str, status: ExitStatus, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("{} exited with {}", name, status)
    } else {
        format!("{} exited with {}: {}", name, status, stderr)
    }
}
