use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_glacier::config::Credentials;
use aws_sdk_glacier::error::DisplayErrorContext;
use aws_sdk_glacier::Client;
use aws_smithy_types::byte_stream::ByteStream;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, info};

use crate::cli::{AwsCredentials, UploadOptions, MAX_PART_SIZE_MIB, MIB};
use crate::treehash::{self, Hash};

/// Upper bound on the number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// "-" selects the account that owns the credentials.
const ACCOUNT_ID: &str = "-";

/// Byte range of one part, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Content-Range value expected by UploadMultipartPart.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }
}

/// The three service calls a multipart archive upload is made of.
#[async_trait]
pub trait VaultApi: Send + Sync {
    async fn initiate_upload(&self, vault: &str, description: &str, part_size: u64)
        -> Result<String>;

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: PartRange,
        checksum: &str,
        body: Vec<u8>,
    ) -> Result<()>;

    async fn complete_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> Result<String>;
}

/// Upload one file into a vault and return the archive id.
#[async_trait]
pub trait ArchiveUploader: Send + Sync {
    async fn upload(&self, vault: &str, path: &Path, description: &str) -> Result<String>;
}

/// Create a Glacier client with the given credentials and region
pub async fn create_glacier_client(credentials: &AwsCredentials) -> Client {
    let provider = Credentials::new(
        credentials.access_key_id.clone(),
        credentials.secret_access_key.clone(),
        None,
        None,
        "environment",
    );

    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(credentials.region.clone()))
        .credentials_provider(provider)
        .load()
        .await;

    Client::new(&config)
}

#[async_trait]
impl VaultApi for Client {
    async fn initiate_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<String> {
        let resp = self
            .initiate_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .archive_description(description)
            .part_size(part_size.to_string())
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(e)))
            .with_context(|| format!("Failed to initiate multipart upload to vault {}", vault))?;

        resp.upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Service returned no upload id"))
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: PartRange,
        checksum: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        self.upload_multipart_part()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .range(range.content_range())
            .checksum(checksum)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(e)))
            .with_context(|| format!("Failed to upload part {}", range.index))?;

        Ok(())
    }

    async fn complete_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        checksum: &str,
    ) -> Result<String> {
        let resp = self
            .complete_multipart_upload()
            .account_id(ACCOUNT_ID)
            .vault_name(vault)
            .upload_id(upload_id)
            .archive_size(archive_size.to_string())
            .checksum(checksum)
            .send()
            .await
            .map_err(|e| anyhow!("{}", DisplayErrorContext(e)))
            .context("Failed to complete multipart upload")?;

        resp.archive_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Service returned no archive id"))
    }
}

/// Smallest power-of-two multiple of `requested` that splits `file_size`
/// into at most [`MAX_PARTS`] parts.
pub fn required_part_size(file_size: u64, requested: u64) -> Result<u64> {
    let max = MAX_PART_SIZE_MIB * MIB;
    let mut part_size = requested.max(MIB);

    while file_size.div_ceil(part_size) > MAX_PARTS {
        part_size *= 2;
    }
    if part_size > max {
        bail!(
            "File of {} bytes needs parts larger than the {} MiB maximum",
            file_size,
            MAX_PART_SIZE_MIB
        );
    }

    Ok(part_size)
}

/// Split `file_size` bytes into consecutive parts of `part_size`.
pub fn plan_parts(file_size: u64, part_size: u64) -> Vec<PartRange> {
    let mut parts = Vec::new();
    let mut start = 0;

    while start < file_size {
        let end = (start + part_size).min(file_size) - 1;
        parts.push(PartRange {
            index: parts.len(),
            start,
            end,
        });
        start = end + 1;
    }

    parts
}

async fn read_part(path: &Path, range: PartRange) -> Result<Vec<u8>> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(range.start)).await?;

    let mut buffer = vec![0u8; range.size() as usize];
    file.read_exact(&mut buffer)
        .await
        .with_context(|| format!("Failed to read part {} of {}", range.index, path.display()))?;

    Ok(buffer)
}

/// Multipart uploader with configurable part size and parallelism.
pub struct ConcurrentUploader<A> {
    api: A,
    options: UploadOptions,
}

impl<A: VaultApi> ConcurrentUploader<A> {
    pub fn new(api: A, options: UploadOptions) -> Self {
        Self { api, options }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        path: &Path,
        range: PartRange,
    ) -> Result<(usize, Vec<Hash>)> {
        let body = read_part(path, range).await?;
        let leaves = treehash::leaf_hashes(&body);
        let checksum = treehash::to_hex(&treehash::combine(&leaves));

        debug!(
            "Uploading part {} ({}) with tree hash {}",
            range.index,
            range.content_range(),
            checksum
        );
        self.api
            .upload_part(vault, upload_id, range, &checksum, body)
            .await?;

        Ok((range.index, leaves))
    }
}

#[async_trait]
impl<A: VaultApi> ArchiveUploader for ConcurrentUploader<A> {
    async fn upload(&self, vault: &str, path: &Path, description: &str) -> Result<String> {
        let file_size = fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        if file_size == 0 {
            bail!(
                "{} is empty; Glacier does not store zero-byte archives",
                path.display()
            );
        }
        let part_size = required_part_size(file_size, self.options.part_size)?;
        let parts = plan_parts(file_size, part_size);
        let concurrency = self.options.concurrency.max(1);

        info!(
            "Uploading {} ({} bytes) to vault {} in {} part(s) of {} bytes",
            path.display(),
            file_size,
            vault,
            parts.len(),
            part_size
        );

        let upload_id = self.api.initiate_upload(vault, description, part_size).await?;
        debug!("Initiated multipart upload {}", upload_id);

        let mut results: Vec<(usize, Vec<Hash>)> = stream::iter(parts)
            .map(|range| self.upload_part(vault, &upload_id, path, range))
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;
        results.sort_by_key(|(index, _)| *index);

        let leaves: Vec<Hash> = results.into_iter().flat_map(|(_, leaves)| leaves).collect();
        let checksum = treehash::to_hex(&treehash::combine(&leaves));

        let archive_id = self
            .api
            .complete_upload(vault, &upload_id, file_size, &checksum)
            .await?;
        info!("Upload completed, archive id {}", archive_id);

        Ok(archive_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Initiate {
            vault: String,
            description: String,
            part_size: u64,
        },
        Part {
            range: PartRange,
            checksum: String,
            body: Vec<u8>,
        },
        Complete {
            archive_size: u64,
            checksum: String,
        },
    }

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<Call>>,
        fail_part: Option<usize>,
    }

    impl RecordingApi {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VaultApi for RecordingApi {
        async fn initiate_upload(
            &self,
            vault: &str,
            description: &str,
            part_size: u64,
        ) -> Result<String> {
            self.calls.lock().unwrap().push(Call::Initiate {
                vault: vault.to_string(),
                description: description.to_string(),
                part_size,
            });
            Ok("upload-1".to_string())
        }

        async fn upload_part(
            &self,
            _vault: &str,
            upload_id: &str,
            range: PartRange,
            checksum: &str,
            body: Vec<u8>,
        ) -> Result<()> {
            assert_eq!(upload_id, "upload-1");
            if self.fail_part == Some(range.index) {
                bail!("connection reset");
            }
            self.calls.lock().unwrap().push(Call::Part {
                range,
                checksum: checksum.to_string(),
                body,
            });
            Ok(())
        }

        async fn complete_upload(
            &self,
            _vault: &str,
            upload_id: &str,
            archive_size: u64,
            checksum: &str,
        ) -> Result<String> {
            assert_eq!(upload_id, "upload-1");
            self.calls.lock().unwrap().push(Call::Complete {
                archive_size,
                checksum: checksum.to_string(),
            });
            Ok("archive-xyz".to_string())
        }
    }

    fn sample_file(len: usize) -> (tempfile::TempDir, std::path::PathBuf, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        (dir, path, data)
    }

    #[test]
    fn test_plan_parts() {
        let parts = plan_parts(2 * MIB + 5, MIB);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].content_range(), "bytes 0-1048575/*");
        assert_eq!(parts[1].start, MIB);
        assert_eq!(parts[2].end, 2 * MIB + 4);
        assert_eq!(parts[2].size(), 5);
        assert!(plan_parts(0, MIB).is_empty());
        assert_eq!(plan_parts(MIB, MIB).len(), 1);
    }

    #[test]
    fn test_required_part_size() {
        assert_eq!(required_part_size(10, 128 * MIB).unwrap(), 128 * MIB);
        assert_eq!(required_part_size(10_000 * MIB, MIB).unwrap(), MIB);
        assert_eq!(required_part_size(10_000 * MIB + 1, MIB).unwrap(), 2 * MIB);
        assert_eq!(
            required_part_size(100_000 * MIB, 128 * MIB).unwrap(),
            128 * MIB
        );
        assert!(required_part_size(4096 * MIB * MAX_PARTS + 1, MIB).is_err());
    }

    #[tokio::test]
    async fn test_sequential_multipart_upload() {
        let (_dir, path, data) = sample_file(3 * MIB as usize + 17);
        let uploader = ConcurrentUploader::new(
            RecordingApi::default(),
            UploadOptions {
                part_size: MIB,
                concurrency: 1,
            },
        );

        let archive_id = uploader.upload("photos", &path, "{\"Path\":\"data.bin\"}").await.unwrap();
        assert_eq!(archive_id, "archive-xyz");

        let calls = uploader.api().calls();
        assert_eq!(calls.len(), 6);
        assert_eq!(
            calls[0],
            Call::Initiate {
                vault: "photos".to_string(),
                description: "{\"Path\":\"data.bin\"}".to_string(),
                part_size: MIB,
            }
        );

        let mut uploaded = Vec::new();
        for (i, call) in calls[1..5].iter().enumerate() {
            match call {
                Call::Part {
                    range,
                    checksum,
                    body,
                } => {
                    assert_eq!(range.index, i);
                    assert_eq!(*checksum, treehash::to_hex(&treehash::tree_hash(body)));
                    uploaded.extend_from_slice(body);
                }
                other => panic!("expected part upload, got {:?}", other),
            }
        }
        assert_eq!(uploaded, data);

        assert_eq!(
            calls[5],
            Call::Complete {
                archive_size: data.len() as u64,
                checksum: treehash::to_hex(&treehash::tree_hash(&data)),
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_upload_keeps_whole_file_checksum() {
        let (_dir, path, data) = sample_file(5 * MIB as usize + 1);
        let uploader = ConcurrentUploader::new(
            RecordingApi::default(),
            UploadOptions {
                part_size: 2 * MIB,
                concurrency: 3,
            },
        );

        uploader.upload("photos", &path, "{}").await.unwrap();

        let calls = uploader.api().calls();
        let parts = calls
            .iter()
            .filter(|call| matches!(call, Call::Part { .. }))
            .count();
        assert_eq!(parts, 3);
        assert_eq!(
            calls.last().unwrap(),
            &Call::Complete {
                archive_size: data.len() as u64,
                checksum: treehash::to_hex(&treehash::tree_hash(&data)),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_part_aborts_without_completing() {
        let (_dir, path, _data) = sample_file(2 * MIB as usize);
        let uploader = ConcurrentUploader::new(
            RecordingApi {
                fail_part: Some(1),
                ..Default::default()
            },
            UploadOptions {
                part_size: MIB,
                concurrency: 1,
            },
        );

        let err = uploader.upload("photos", &path, "{}").await.unwrap_err();

        assert!(err.to_string().contains("connection reset"));
        assert!(!uploader
            .api()
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Complete { .. })));
    }

    #[tokio::test]
    async fn test_empty_file_fails_before_initiating() {
        let (_dir, path, _data) = sample_file(0);
        let uploader = ConcurrentUploader::new(RecordingApi::default(), UploadOptions::default());

        let err = uploader.upload("photos", &path, "{}").await.unwrap_err();

        assert!(err.to_string().contains("zero-byte"));
        assert!(uploader.api().calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_initiating() {
        let uploader = ConcurrentUploader::new(RecordingApi::default(), UploadOptions::default());

        let result = uploader
            .upload("photos", Path::new("/nonexistent/data.bin"), "{}")
            .await;

        assert!(result.is_err());
        assert!(uploader.api().calls().is_empty());
    }
}
