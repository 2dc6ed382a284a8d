use super::uploader::{BackupUploader, UploadReceipt};
use crate::backup::pipeline::ArchiveArtifact;
use crate::config::StorageTarget;
use crate::error::{BackupError, Result, UploadErrorKind};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const B2_AUTHORIZE_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backblaze B2 native API client.
pub struct B2Uploader {
    client: Client,
    authorize_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    account_id: String,
    authorization_token: String,
    api_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBuckets<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct BucketList {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrl<'a> {
    bucket_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    file_id: String,
    file_name: String,
    content_length: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl B2Uploader {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("pgbak/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BackupError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            authorize_url: B2_AUTHORIZE_URL.to_string(),
        })
    }

    async fn authorize(&self, target: &StorageTarget) -> Result<Authorization> {
        let response = self
            .client
            .get(&self.authorize_url)
            .basic_auth(&target.key_id, Some(&target.app_key))
            .send()
            .await?;

        let auth: Authorization = check(response, "authorize account").await?.json().await?;
        debug!("Authorized B2 account {}", auth.account_id);
        Ok(auth)
    }

    async fn find_bucket(&self, auth: &Authorization, bucket_name: &str) -> Result<String> {
        let url = format!("{}/b2api/v2/b2_list_buckets", auth.api_url);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &auth.authorization_token)
            .json(&ListBuckets {
                account_id: &auth.account_id,
                bucket_name,
            })
            .send()
            .await?;

        let list: BucketList = check(response, "list buckets").await?.json().await?;
        list.buckets
            .into_iter()
            .find(|b| b.bucket_name == bucket_name)
            .map(|b| b.bucket_id)
            .ok_or_else(|| {
                BackupError::upload(
                    UploadErrorKind::Rejected,
                    format!("bucket '{}' not found or not accessible", bucket_name),
                )
            })
    }

    async fn get_upload_url(&self, auth: &Authorization, bucket_id: &str) -> Result<UploadUrl> {
        let url = format!("{}/b2api/v2/b2_get_upload_url", auth.api_url);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &auth.authorization_token)
            .json(&GetUploadUrl { bucket_id })
            .send()
            .await?;

        let upload_url: UploadUrl = check(response, "get upload url").await?.json().await?;
        Ok(upload_url)
    }
}

#[async_trait]
impl BackupUploader for B2Uploader {
    async fn upload(
        &self,
        artifact: &ArchiveArtifact,
        target: &StorageTarget,
        destination_key: &str,
    ) -> Result<UploadReceipt> {
        info!(
            "Uploading {} ({} bytes) to B2 bucket {}",
            destination_key, artifact.size, target.bucket
        );

        let auth = self.authorize(target).await?;
        let bucket_id = self.find_bucket(&auth, &target.bucket).await?;
        let upload_url = self.get_upload_url(&auth, &bucket_id).await?;

        let file = tokio::fs::File::open(&artifact.path).await.map_err(|e| {
            BackupError::upload(
                UploadErrorKind::Rejected,
                format!("cannot open {}: {}", artifact.path.display(), e),
            )
        })?;

        let mut request = self
            .client
            .post(&upload_url.upload_url)
            .header(AUTHORIZATION, &upload_url.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(destination_key))
            .header(CONTENT_TYPE, "application/x-7z-compressed")
            .header(CONTENT_LENGTH, artifact.size)
            .header("X-Bz-Content-Sha1", "do_not_verify");
        if let Some(sha256) = &artifact.sha256 {
            request = request.header("X-Bz-Info-sha256", sha256);
        }

        let response = request.body(Body::from(file)).send().await?;
        let uploaded: UploadedFile = check(response, "upload file").await?.json().await?;

        if uploaded.content_length != artifact.size {
            return Err(BackupError::upload(
                UploadErrorKind::Rejected,
                format!(
                    "B2 stored {} bytes but the archive has {}",
                    uploaded.content_length, artifact.size
                ),
            ));
        }

        info!("Uploaded {} as file {}", uploaded.file_name, uploaded.file_id);
        Ok(UploadReceipt {
            file_id: uploaded.file_id,
            file_name: uploaded.file_name,
            size: uploaded.content_length,
        })
    }

    fn name(&self) -> &'static str {
        "Backblaze B2"
    }
}

async fn check(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let error: ApiError = serde_json::from_str(&text).unwrap_or_default();
    let kind = classify(status.as_u16(), &error.code);
    let detail = if error.message.is_empty() { text } else { error.message };

    Err(BackupError::upload(
        kind,
        format!("{} failed: {} {} {}", action, status, error.code, detail),
    ))
}

/// Maps a B2 error response onto the upload error taxonomy.
fn classify(status: u16, code: &str) -> UploadErrorKind {
    match (status, code) {
        (_, "cap_exceeded" | "storage_cap_exceeded" | "transaction_cap_exceeded" | "too_big") => {
            UploadErrorKind::Quota
        }
        (401, _) | (_, "bad_auth_token" | "expired_auth_token" | "unauthorized") => {
            UploadErrorKind::Auth
        }
        (408 | 429, _) | (500..=599, _) => UploadErrorKind::Transient,
        _ => UploadErrorKind::Rejected,
    }
}

fn encode_file_name(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}
