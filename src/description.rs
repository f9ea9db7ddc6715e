use std::ffi::OsStr;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::UploadError;
use crate::utf7;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Archive description in the CloudBerry Explorer / FastGlacier layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveDescription {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "UTCDateModified")]
    pub utc_date_modified: String,
}

impl ArchiveDescription {
    pub fn new(file_name: &OsStr, modified: DateTime<Utc>) -> Self {
        Self {
            path: encode_file_name(file_name),
            utc_date_modified: format!("{}Z", modified.format(TIMESTAMP_FORMAT)),
        }
    }

    /// Build the description from the file's base name and mtime.
    pub fn for_file(path: &Path) -> Result<Self, UploadError> {
        let modified = path
            .metadata()
            .and_then(|metadata| metadata.modified())
            .map_err(|source| UploadError::Metadata {
                path: path.to_path_buf(),
                source,
            })?;

        let file_name = path.file_name().unwrap_or(path.as_os_str());
        Ok(Self::new(file_name, DateTime::<Utc>::from(modified)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The original bytes of the base name, with the UTF-7 transport
    /// encoding undone.
    pub fn decoded_path(&self) -> Result<Vec<u8>> {
        utf7::decode_bytes(&self.path)
    }
}

fn encode_file_name(name: &OsStr) -> String {
    utf7::encode_bytes(name.as_encoded_bytes())
}
