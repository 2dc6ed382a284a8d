use crate::backup::lock::RunLock;
use crate::backup::pipeline::{ArchiveArtifact, ArchiveRequest, Archiver, DumpCompressPipeline};
use crate::backup::schedule::{is_due, next_due};
use crate::backup::validate::{validate, MIN_ARCHIVE_SIZE};
use crate::config::{AppConfig, DumpFormat, ServerConfig, StorageTarget};
use crate::database::describe_target;
use crate::error::{BackupError, Result};
use crate::history::{RunEntry, RunHistory};
use crate::notify::{notify, HealthEvent, HealthNotifier, HttpHealthNotifier};
use crate::upload::{B2Uploader, BackupUploader, UploadReceipt};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Only back up this server.
    pub server: Option<String>,
    /// Ignore the frequency gate.
    pub force: bool,
    pub format: DumpFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Successful attempts whose archive size drifted from the previous one.
    pub warnings: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerOutcome {
    Skipped,
    Succeeded { warning: bool },
    Failed,
}

#[derive(Debug)]
struct Attempt {
    size: u64,
    warning: Option<String>,
    receipt: UploadReceipt,
}

/// Runs one backup pass over the configured servers.
///
/// The orchestrator owns its configuration snapshot; edits to the config file
/// after construction never reach an in-flight run.
pub struct BackupOrchestrator {
    config: AppConfig,
    history: Arc<RunHistory>,
    lock: RunLock,
    archiver: Arc<dyn Archiver>,
    uploader: Arc<dyn BackupUploader>,
    notifier: Arc<dyn HealthNotifier>,
}

impl BackupOrchestrator {
    pub fn new(
        config: AppConfig,
        history: Arc<RunHistory>,
        archiver: Arc<dyn Archiver>,
        uploader: Arc<dyn BackupUploader>,
        notifier: Arc<dyn HealthNotifier>,
    ) -> Self {
        let lock = RunLock::new(config.lock_path.clone());
        Self {
            config,
            history,
            lock,
            archiver,
            uploader,
            notifier,
        }
    }

    /// Wires up `pg_dump`/`7z`, Backblaze B2 and HTTP health checks.
    pub fn from_config(config: AppConfig, history: Arc<RunHistory>) -> Result<Self> {
        let timeouts = &config.timeouts;
        let archiver = DumpCompressPipeline::new(
            config.tools.clone(),
            timeouts.pipeline_secs.map(Duration::from_secs),
        );
        let uploader = B2Uploader::new(timeouts.upload_secs.map(Duration::from_secs))?;
        let notifier = HttpHealthNotifier::new(Duration::from_secs(timeouts.notify_secs))?;

        Ok(Self::new(
            config,
            history,
            Arc::new(archiver),
            Arc::new(uploader),
            Arc::new(notifier),
        ))
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let servers: Vec<&ServerConfig> = match &request.server {
            Some(id) => vec![self.config.server(id).ok_or_else(|| {
                BackupError::Config(format!("no server with id '{}' is configured", id))
            })?],
            None => self.config.servers.iter().collect(),
        };

        let token = self.lock.acquire()?;
        debug!("Holding run lock at {}", self.lock.path().display());
        let start = Instant::now();
        info!(
            "Backup run started: {} server(s), format {}, force={}",
            servers.len(),
            request.format,
            request.force
        );

        let work_dir = self.work_dir()?;
        let mut summary = RunSummary::default();

        for server in servers {
            match self.process_server(server, request, work_dir.path()).await {
                ServerOutcome::Skipped => summary.skipped += 1,
                ServerOutcome::Succeeded { warning } => {
                    summary.attempted += 1;
                    summary.succeeded += 1;
                    if warning {
                        summary.warnings += 1;
                    }
                }
                ServerOutcome::Failed => {
                    summary.attempted += 1;
                    summary.failed += 1;
                }
            }
        }

        drop(work_dir);
        token.release();

        info!(
            "Backup run finished in {} sec: {} attempted, {} skipped, {} succeeded, {} failed",
            start.elapsed().as_secs(),
            summary.attempted,
            summary.skipped,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    fn work_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pgbak-");
        let dir = match &self.config.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn process_server(
        &self,
        server: &ServerConfig,
        request: &RunRequest,
        work_dir: &Path,
    ) -> ServerOutcome {
        let now = Utc::now();

        let last_success = match self.history.last_success(&server.id) {
            Ok(last) => last,
            Err(e) => {
                error!("Cannot read run log for server '{}': {}", server.id, e);
                return self.fail(server, e).await;
            }
        };
        let last_time = last_success.as_ref().map(|r| r.timestamp);

        if !is_due(server.frequency_hrs, last_time, now, request.force) {
            if let Some(due_at) = next_due(server.frequency_hrs, last_time, now) {
                info!("Skipping server '{}': next backup due at {}", server.id, due_at);
            }
            return ServerOutcome::Skipped;
        }

        info!(
            "Backing up server '{}' ({})",
            server.id,
            describe_target(&server.connection_string)
        );
        notify(
            self.notifier.as_ref(),
            &server.health_check,
            &server.id,
            HealthEvent::Start,
        )
        .await;

        let previous_size = last_success.and_then(|r| r.file_size);
        match self
            .attempt(server, request.format, previous_size, now, work_dir)
            .await
        {
            Ok(attempt) => {
                notify(
                    self.notifier.as_ref(),
                    &server.health_check,
                    &server.id,
                    HealthEvent::Success,
                )
                .await;

                let mut entry = RunEntry::success(&server.id, Utc::now(), attempt.size);
                entry.note = attempt.warning.clone();
                self.log(&entry);

                info!(
                    "Backup of '{}' completed: {:.2} MB stored as {} ({})",
                    server.id,
                    attempt.size as f64 / 1024.0 / 1024.0,
                    attempt.receipt.file_name,
                    attempt.receipt.file_id
                );
                ServerOutcome::Succeeded {
                    warning: attempt.warning.is_some(),
                }
            }
            Err(e) => {
                error!("Backup of '{}' failed: {}", server.id, e);
                self.fail(server, e).await
            }
        }
    }

    async fn fail(&self, server: &ServerConfig, err: BackupError) -> ServerOutcome {
        notify(
            self.notifier.as_ref(),
            &server.health_check,
            &server.id,
            HealthEvent::Fail,
        )
        .await;
        self.log(&RunEntry::failure(&server.id, Utc::now(), err.to_string()));
        ServerOutcome::Failed
    }

    fn log(&self, entry: &RunEntry) {
        if let Err(e) = self.history.record(entry) {
            error!(
                "Failed to record {} for server '{}': {}",
                entry.outcome, entry.server_id, e
            );
        }
    }

    async fn attempt(
        &self,
        server: &ServerConfig,
        format: DumpFormat,
        previous_size: Option<u64>,
        started: DateTime<Utc>,
        work_dir: &Path,
    ) -> Result<Attempt> {
        let target = server.resolve_storage(&self.config.storage)?;
        let destination_key = archive_file_name(&server.archive_name, &server.id, started);
        let archive_path = work_dir.join(destination_key.replace('/', "_"));

        let passphrase = server.resolve_passphrase(&self.config.default_archive_password);
        if passphrase.is_none() {
            warn!("No archive password for server '{}'; archive will not be encrypted", server.id);
        }

        let artifact = self
            .archiver
            .create(&ArchiveRequest {
                server,
                format,
                archive_path: &archive_path,
                passphrase,
            })
            .await?;

        let result = self
            .check_and_upload(&artifact, &target, &destination_key, previous_size)
            .await;
        artifact.discard();
        result
    }

    async fn check_and_upload(
        &self,
        artifact: &ArchiveArtifact,
        target: &StorageTarget,
        destination_key: &str,
        previous_size: Option<u64>,
    ) -> Result<Attempt> {
        let check = validate(artifact.size, previous_size);
        if !check.accepted {
            return Err(BackupError::SizeRejected {
                size: artifact.size,
                minimum: MIN_ARCHIVE_SIZE,
            });
        }

        let warning = if check.warning {
            warn!("Size anomaly for {}: {}", destination_key, check.reason);
            Some(check.reason)
        } else {
            None
        };

        info!(
            "Uploading {} ({} bytes, {} before compression) to {}",
            destination_key,
            artifact.size,
            artifact.dump_bytes,
            self.uploader.name()
        );
        let receipt = self.uploader.upload(artifact, target, destination_key).await?;

        Ok(Attempt {
            size: artifact.size,
            warning,
            receipt,
        })
    }
}

/// Expands `{server}` and `{timestamp}` in the archive name template.
pub fn archive_file_name(template: &str, server_id: &str, at: DateTime<Utc>) -> String {
    let template = template.trim();
    let base = if template.is_empty() { server_id } else { template };
    let name = base
        .replace("{server}", server_id)
        .replace("{timestamp}", &at.format("%Y%m%dT%H%M%S").to_string());

    if name.ends_with(".7z") {
        name
    } else {
        format!("{}.7z", name)
    }
}
