use std::collections::HashMap;
use std::process::ExitCode;

use glacier_upload::cli;
use glacier_upload::error::UploadError;
use glacier_upload::glacier::{self, ConcurrentUploader};
use glacier_upload::upload;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

async fn run() -> Result<String, UploadError> {
    // Parse command line arguments
    let argv: Vec<_> = std::env::args_os().collect();
    let args = cli::parse_args(argv.clone())?;
    let program = cli::program_name(&argv);

    // Credentials and region only come from the environment
    let env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    let request = cli::process_upload_args(&program, &args, &env)?;

    let client = glacier::create_glacier_client(&request.credentials).await;
    let uploader = ConcurrentUploader::new(client, request.options);

    upload::run_upload(&request, &uploader, &mut std::io::stdout()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries only the result line
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(UploadError::HelpRequested(e)) => {
            let _ = e.print();
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.to_stdout() {
                println!("{}", e);
            } else {
                eprintln!("{}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}
