use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use kms_secrets::config::{Backend, Config, Operation};
use kms_secrets::key_manager::KeyManager;
use kms_secrets::kms::{AwsKms, KeyService, LocalKms, Retrying};
use kms_secrets::secret_ops::{RunReport, SecretOps};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// kms-secrets - Encrypt and decrypt secrets using AWS KMS
#[derive(Parser)]
#[command(name = "kms-secrets")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an optional JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// AWS region
    #[arg(short, long)]
    region: Option<String>,

    /// AWS profile
    #[arg(short, long)]
    profile: Option<String>,

    /// Filter files matching pattern
    #[arg(short, long)]
    filter: Option<String>,

    /// Working directory for secrets encryption/decryption. Works recursively
    #[arg(short = 'd', long = "dir", default_value = "./")]
    dir: PathBuf,

    /// Key service backend (aws or local)
    #[arg(long)]
    backend: Option<Backend>,

    /// Key file for the local backend
    #[arg(long)]
    key_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt content
    #[command(visible_alias = "e")]
    Encrypt {
        /// KMS key ARN, alias or id
        #[arg(short, long)]
        key_id: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Decrypt content ending in .enc
    #[command(visible_alias = "d")]
    Decrypt {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG to control log level (e.g., RUST_LOG=debug)
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "kms-secrets starting");

    let (op, key_id, common) = match cli.command {
        Commands::Encrypt { key_id, common } => (Operation::Encrypt, key_id, common),
        Commands::Decrypt { common } => (Operation::Decrypt, None, common),
    };

    let cfg = resolve_config(cli.config.as_deref(), key_id, &common)?;
    cfg.validate(op)?;

    let report = match cfg.backend {
        Backend::Aws => {
            let region = cfg.region.as_deref().unwrap_or_default();
            let profile = cfg.profile.as_deref().unwrap_or_default();
            let kms = AwsKms::new(cfg.key_id.clone(), region, profile).await;
            run(&cfg, kms, op, &common.dir).await?
        }
        Backend::Local => {
            let km = match op {
                Operation::Encrypt => KeyManager::open_or_create(&cfg.key_file).await,
                Operation::Decrypt => KeyManager::open(&cfg.key_file).await,
            }
            .with_context(|| format!("loading local key {}", cfg.key_file))?;
            run(&cfg, LocalKms::new(&km), op, &common.dir).await?
        }
    };

    println!(
        "{} file(s) written, {} skipped, {} failed",
        report.written.len(),
        report.skipped.len(),
        report.failures.len()
    );
    for (path, err) in &report.failures {
        eprintln!("  {}: {}", path.display(), err);
    }

    report.into_result()?;
    Ok(())
}

/// Layer command-line flags over the file and environment configuration
fn resolve_config(path: Option<&str>, key_id: Option<String>, common: &CommonArgs) -> Result<Config> {
    let mut cfg = Config::load_with_env(path)?;
    if key_id.is_some() {
        cfg.key_id = key_id;
    }
    if let Some(region) = &common.region {
        cfg.region = Some(region.clone());
    }
    if let Some(profile) = &common.profile {
        cfg.profile = Some(profile.clone());
    }
    if let Some(filter) = &common.filter {
        cfg.filter = filter.clone();
    }
    if let Some(backend) = common.backend {
        cfg.backend = backend;
    }
    if let Some(key_file) = &common.key_file {
        cfg.key_file = key_file.clone();
    }
    Ok(cfg)
}

async fn run<K: KeyService>(cfg: &Config, kms: K, op: Operation, dir: &Path) -> Result<RunReport> {
    let kms = Retrying::new(kms, cfg.retry_attempts, cfg.retry_base_delay());
    let ops = SecretOps::new(kms).with_filter(cfg.file_filter()?);

    let verb = match op {
        Operation::Encrypt => "Encrypting",
        Operation::Decrypt => "Decrypting",
    };
    let spinner = show_spinner().then(|| create_spinner(&format!("{} {}...", verb, dir.display())));

    let result = match op {
        Operation::Encrypt => ops.encrypt(dir).await,
        Operation::Decrypt => ops.decrypt(dir).await,
    };
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    Ok(result?)
}

/// Per-file info lines share stderr with the spinner; only spin when they are off.
fn show_spinner() -> bool {
    !tracing::enabled!(target: "kms_secrets", Level::INFO)
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_only_when_info_logging_is_off() {
        let quiet = fmt().with_env_filter(EnvFilter::new("warn")).finish();
        assert!(tracing::subscriber::with_default(quiet, show_spinner));

        let verbose = fmt().with_env_filter(EnvFilter::new("info")).finish();
        assert!(!tracing::subscriber::with_default(verbose, show_spinner));
    }
}
