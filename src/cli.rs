use clap::error::ErrorKind;
use clap::Parser;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::UploadError;

pub const ACCESS_KEY_ID_VAR: &str = "aws_access_key_id";
pub const SECRET_ACCESS_KEY_VAR: &str = "aws_secret_access_key";
pub const REGION_VAR: &str = "aws_region_name";
pub const DEFAULT_REGION: &str = "eu-west-1";

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_PART_SIZE_MIB: u64 = 128;
/// Largest part the archive service accepts, in MiB.
pub const MAX_PART_SIZE_MIB: u64 = 4096;

/// Command line arguments for the Glacier upload tool
#[derive(Parser, Debug, Clone)]
#[clap(
    name = "glacier-upload",
    version,
    about = "Upload a file to an AWS Glacier vault",
    after_help = "Credentials are read from the aws_access_key_id, aws_secret_access_key and aws_region_name environment variables.\n\
                  Put -- before the vault name when it or the file name starts with '-'."
)]
pub struct Args {
    /// Size of each upload part in MiB (power of two, 1 to 4096)
    #[clap(long, default_value_t = DEFAULT_PART_SIZE_MIB, value_parser = parse_part_size)]
    pub part_size: u64,

    /// Number of parts uploaded concurrently
    #[clap(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrency: u64,

    /// Name of the target vault
    pub vault_name: String,

    /// File to upload
    pub file: PathBuf,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Part size in bytes
    pub part_size: u64,
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE_MIB * MIB,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub vault_name: String,
    pub file_path: PathBuf,
    pub credentials: AwsCredentials,
    pub options: UploadOptions,
}

fn parse_part_size(value: &str) -> Result<u64, String> {
    let mib: u64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number of MiB", value))?;
    if !mib.is_power_of_two() || mib > MAX_PART_SIZE_MIB {
        return Err(format!(
            "part size must be a power of two between 1 and {} MiB",
            MAX_PART_SIZE_MIB
        ));
    }
    Ok(mib)
}

pub fn program_name(argv: &[OsString]) -> String {
    argv.first()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_else(|| "glacier-upload".to_string())
}

/// Parse command line arguments. Any parse failure is reported with the
/// short usage text; only `--help` and `--version` keep clap's output.
pub fn parse_args<I, T>(argv: I) -> Result<Args, UploadError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let argv: Vec<OsString> = argv.into_iter().map(Into::into).collect();

    Args::try_parse_from(&argv).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => UploadError::HelpRequested(e),
        _ => UploadError::Usage {
            program: program_name(&argv),
        },
    })
}

fn required_var(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|value| !value.is_empty()).cloned()
}

/// Process command line arguments and the environment into an UploadRequest
pub fn process_upload_args(
    program: &str,
    args: &Args,
    env: &HashMap<String, String>,
) -> Result<UploadRequest, UploadError> {
    let usage = || UploadError::Usage {
        program: program.to_string(),
    };

    let access_key_id = required_var(env, ACCESS_KEY_ID_VAR).ok_or_else(usage)?;
    let secret_access_key = required_var(env, SECRET_ACCESS_KEY_VAR).ok_or_else(usage)?;
    let region = required_var(env, REGION_VAR).unwrap_or_else(|| DEFAULT_REGION.to_string());

    if args.vault_name.is_empty() {
        return Err(usage());
    }

    Ok(UploadRequest {
        vault_name: args.vault_name.clone(),
        file_path: args.file.clone(),
        credentials: AwsCredentials {
            access_key_id,
            secret_access_key,
            region,
        },
        options: UploadOptions {
            part_size: args.part_size * MIB,
            concurrency: usize::try_from(args.concurrency).unwrap_or(usize::MAX),
        },
    })
}
