use std::path::PathBuf;

use thiserror::Error;

/// Every way a single invocation can end early.
#[derive(Error, Debug)]
pub enum UploadError {
    /// `--help` or `--version`; clap already rendered the text.
    #[error("{0}")]
    HelpRequested(clap::Error),

    #[error(
        "Usage {program} <vault name> <filename>\n\
         Specify aws_access_key_id, aws_secret_access_key and aws_region_name as environment variables."
    )]
    Usage { program: String },

    #[error("Cannot find the file {}!", .0.display())]
    FileNotFound(PathBuf),

    #[error("Cannot read the metadata of {}: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload failed: {0:#}")]
    Transfer(anyhow::Error),
}

impl UploadError {
    pub fn exit_code(&self) -> u8 {
        match self {
            UploadError::HelpRequested(_) => 0,
            UploadError::FileNotFound(_) => 1,
            UploadError::Usage { .. } => 2,
            UploadError::Metadata { .. } | UploadError::Transfer(_) => 3,
        }
    }

    /// Usage and missing-file messages go to stdout, failures to stderr.
    pub fn to_stdout(&self) -> bool {
        matches!(
            self,
            UploadError::HelpRequested(_) | UploadError::Usage { .. } | UploadError::FileNotFound(_)
        )
    }
}
