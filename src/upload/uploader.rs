use crate::backup::pipeline::ArchiveArtifact;
use crate::config::StorageTarget;
use crate::error::Result;
use async_trait::async_trait;

/// What the storage service acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
}

#[async_trait]
pub trait BackupUploader: Send + Sync {
    /// Stores the whole artifact under `destination_key` or fails; partial
    /// uploads are never resumed.
    async fn upload(
        &self,
        artifact: &ArchiveArtifact,
        target: &StorageTarget,
        destination_key: &str,
    ) -> Result<UploadReceipt>;

    fn name(&self) -> &'static str;
}
