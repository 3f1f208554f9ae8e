//! filerelay CLI - Command line host for cloud requests.
//!
//! Lists provider folders, stores provider files and uploads local files.
//! When a provider wants the user to sign in, the auth page opens in the
//! system browser; paste the URL the browser lands on to continue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use filerelay_client::{AuthSurface, ClientConfig, CloudClient, RequestHandle, ResumeSignals};
use filerelay_cloud::{Access, CloudResponse, StorageLocation, StoreOptions};
use filerelay_common::Provider;

const API_KEY_ENV: &str = "FILERELAY_API_KEY";

#[derive(Parser)]
#[command(name = "filerelay")]
#[command(about = "filerelay - Cloud provider requests with browser sign-in")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Api key (overrides the config file and FILERELAY_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a provider folder.
    List {
        /// Provider, e.g. "dropbox" or "googledrive".
        #[arg(short, long)]
        provider: Provider,

        /// Folder path (default: root).
        #[arg(short = 'd', long, default_value = "/")]
        path: String,

        /// Page token from a previous listing.
        #[arg(long)]
        next: Option<String>,
    },

    /// Copy a provider file into storage.
    Store {
        /// Provider holding the file.
        #[arg(short, long)]
        provider: Provider,

        /// File path at the provider.
        #[arg(short = 'f', long)]
        path: String,

        #[command(flatten)]
        target: StoreArgs,
    },

    /// Upload a local file to storage.
    Upload {
        /// Local file.
        file: PathBuf,

        #[command(flatten)]
        target: StoreArgs,
    },
}

#[derive(clap::Args)]
struct StoreArgs {
    /// Storage backend: s3, azure, dropbox, rackspace or gcs.
    #[arg(short, long, default_value = "s3")]
    location: StorageLocation,

    /// Key prefix inside the container.
    #[arg(long)]
    key_prefix: Option<String>,

    /// Bucket or container name.
    #[arg(long)]
    container: Option<String>,

    /// Stored file name.
    #[arg(long)]
    filename: Option<String>,

    /// Storage region.
    #[arg(long)]
    region: Option<String>,

    /// Make the stored file publicly readable.
    #[arg(long)]
    public: bool,
}

impl From<StoreArgs> for StoreOptions {
    fn from(args: StoreArgs) -> Self {
        StoreOptions {
            location: args.location,
            path: args.key_prefix,
            container: args.container,
            filename: args.filename,
            access: args.public.then_some(Access::Public),
            region: args.region,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for results
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = load_config(cli.config.as_deref(), cli.api_key).await?;
    let client = CloudClient::builder(config)
        .auth_surface(AuthSurface::system_browser())
        .isolated_signals()
        .build()
        .context("Failed to create client")?;
    spawn_redirect_reader(client.signals().clone());

    match cli.command {
        Commands::List {
            provider,
            path,
            next,
        } => cmd_list(&client, provider, &path, next).await,

        Commands::Store {
            provider,
            path,
            target,
        } => cmd_store(&client, provider, &path, target.into()).await,

        Commands::Upload { file, target } => cmd_upload(&client, &file, target.into()).await,
    }
}

/// Resolve configuration: file, then environment, then flags.
async fn load_config(path: Option<&Path>, api_key: Option<String>) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.api_key = key;
        }
    }
    if let Some(key) = api_key {
        config.api_key = key;
    }

    if config.api_key.trim().is_empty() {
        anyhow::bail!("No api key. Use --api-key, {} or a config file", API_KEY_ENV);
    }
    Ok(config)
}

/// Post every URL pasted on stdin as a resume signal.
///
/// Runs on a plain thread so a pending read never holds up shutdown.
fn spawn_redirect_reader(signals: ResumeSignals) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match signals.post_str(line) {
                Ok(0) => warn!("No request is waiting for a redirect"),
                Ok(_) => debug!(url = line, "Posted redirect"),
                Err(e) => warn!("{}", e),
            }
        }
    });
}

/// Wait for an operation, cancelling it on Ctrl-C.
async fn wait(handle: RequestHandle) -> Result<CloudResponse> {
    let token = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling request");
            token.cancel();
        }
    });

    let outcome = handle.wait().await;
    interrupt.abort();

    let mut response = outcome.context("Request did not complete")?;
    if let Some(err) = response.error.take() {
        return Err(err).context("Cloud request failed");
    }
    Ok(response)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to format result")?;
    println!("{}", json);
    Ok(())
}

/// List a provider folder.
async fn cmd_list(
    client: &CloudClient,
    provider: Provider,
    path: &str,
    next: Option<String>,
) -> Result<()> {
    info!("Listing {} on {}", path, provider);

    let handle = client
        .folder_list(provider, path, next)
        .context("Invalid listing request")?;
    let response = wait(handle).await?;

    let contents = response.contents().unwrap_or_default();
    print_json(&serde_json::json!({
        "contents": contents,
        "next": response.next_token(),
    }))
}

/// Copy a provider file into storage.
async fn cmd_store(
    client: &CloudClient,
    provider: Provider,
    path: &str,
    options: StoreOptions,
) -> Result<()> {
    info!("Storing {} from {} to {}", path, provider, options.location.wire_name());

    let handle = client
        .store(provider, path, options)
        .context("Invalid store request")?;
    let response = wait(handle).await?;

    let stored = response
        .stored_file()
        .context("Response carried no stored file")?;
    print_json(stored)
}

/// Upload a local file to storage.
async fn cmd_upload(client: &CloudClient, file: &Path, options: StoreOptions) -> Result<()> {
    info!("Uploading {}", file.display());

    let handle = client.upload_file(file, options);
    let mut updates = handle.progress_updates();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let progress = *updates.borrow();
            if let Some(fraction) = progress.fraction() {
                debug!("Uploaded {:.0}%", fraction * 100.0);
            }
        }
    });

    let response = wait(handle).await;
    reporter.abort();

    let response = response?;
    let stored = response
        .stored_file()
        .context("Response carried no stored file")?;
    print_json(stored)
}
