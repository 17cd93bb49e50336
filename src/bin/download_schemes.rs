use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use scheme_downloader::app::App;
use scheme_downloader::config::{ConfigLoader, ConfigPaths};
use scheme_downloader::error::SchemeError;
use scheme_downloader::http::{HttpClient, Transport};
use scheme_downloader::keycache::KeyCache;
use scheme_downloader::retry::RetryPolicy;

#[derive(Parser)]
#[command(name = "download-schemes")]
#[command(about = "Download MLST and cgMLST schemes into normalized allele files")]
#[command(version, author)]
struct Cli {
    #[arg(short = 'S', long = "scheme", help = "Only download schemes with this shortname (repeatable)")]
    schemes: Vec<String>,

    #[arg(short = 'C', long, default_value = "config", help = "Directory holding schemes.json and host_config.json")]
    config_dir: Utf8PathBuf,

    #[arg(short = 's', long, default_value = "secrets.json", help = "OAuth consumer and user credentials")]
    secrets_file: Utf8PathBuf,

    #[arg(short = 'c', long, default_value = "secrets_cache.json", help = "Where minted OAuth tokens are kept between runs")]
    secrets_cache_file: Utf8PathBuf,

    #[arg(short = 'o', long, default_value = ".")]
    output_dir: Utf8PathBuf,

    #[arg(short = 'f', long, default_value = "selected_schemes.json", help = "Manifest of downloaded schemes, relative to the output directory")]
    output_schemes_file: Utf8PathBuf,

    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value_t = 10, help = "Attempts per network operation before giving up")]
    max_attempts: u32,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SchemeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SchemeError) -> u8 {
    match error {
        SchemeError::ConfigRead(_)
        | SchemeError::ConfigParse(_)
        | SchemeError::UnknownHostConfig(_)
        | SchemeError::MissingSecret { .. }
        | SchemeError::InvalidScheme { .. } => 2,
        SchemeError::Http { .. }
        | SchemeError::Timeout { .. }
        | SchemeError::HttpStatus { .. }
        | SchemeError::UnexpectedResponse { .. }
        | SchemeError::Auth { .. }
        | SchemeError::AccessRevoked { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let paths = ConfigPaths {
        config_dir: cli.config_dir,
        secrets_file: cli.secrets_file,
        cache_file: cli.secrets_cache_file,
    };
    let schemes = ConfigLoader::schemes(&paths.schemes_file())?.select(&cli.schemes);
    info!(count = schemes.len(), "schemes selected");

    let retry = RetryPolicy::default().with_max_attempts(cli.max_attempts);
    let transport: Arc<dyn Transport> = Arc::new(HttpClient::new()?);
    let keycache = if paths.secrets_file.as_std_path().exists() {
        Some(KeyCache::open(&paths, Arc::clone(&transport), retry.clone())?)
    } else {
        info!(secrets = %paths.secrets_file, "no secrets file, BIGSdb schemes will fail");
        None
    };

    std::fs::create_dir_all(cli.output_dir.as_std_path()).into_diagnostic()?;
    let mut app = App::new(transport, keycache, retry);
    let manifest = app.download_schemes(&schemes, &cli.output_dir)?;

    let manifest_path = cli.output_dir.join(&cli.output_schemes_file);
    manifest.write(&manifest_path)?;
    info!(path = %manifest_path, schemes = manifest.schemes.len(), "wrote manifest");
    debug!(?manifest, "selected schemes");
    Ok(())
}
