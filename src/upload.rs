use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::cli::UploadRequest;
use crate::description::ArchiveDescription;
use crate::error::UploadError;
use crate::glacier::ArchiveUploader;

/// The path must name an existing regular file.
pub fn check_file(path: &Path) -> Result<(), UploadError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        _ => Err(UploadError::FileNotFound(path.to_path_buf())),
    }
}

/// Main function to run the upload: check the file, describe it, hand it
/// to `uploader` and report the archive id on `out`.
pub async fn run_upload<W: Write>(
    request: &UploadRequest,
    uploader: &dyn ArchiveUploader,
    out: &mut W,
) -> Result<String, UploadError> {
    check_file(&request.file_path)?;

    let description = ArchiveDescription::for_file(&request.file_path)?
        .to_json()
        .map_err(UploadError::Transfer)?;
    debug!("Archive description: {}", description);

    info!(
        "Uploading {} to vault {} in {}",
        request.file_path.display(),
        request.vault_name,
        request.credentials.region
    );
    let archive_id = uploader
        .upload(&request.vault_name, &request.file_path, &description)
        .await
        .map_err(UploadError::Transfer)?;

    writeln!(out, "Success! Archive ID: {}", archive_id)
        .map_err(|e| UploadError::Transfer(e.into()))?;

    Ok(archive_id)
}
