mod b2;
mod uploader;

pub use b2::B2Uploader;
pub use uploader::{BackupUploader, UploadReceipt};
