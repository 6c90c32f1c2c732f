use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub staging_dir: String,
    pub database_url: String,
    pub public_base_url: String,
    pub max_file_bytes: u64,
    /// Send failures with their error status instead of `200 OK`.
    pub http_error_status: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image repository API")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_REPO_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_REPO_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image blobs are stored (overrides IMAGE_REPO_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Directory for in-flight uploads (overrides IMAGE_REPO_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Database URL (overrides IMAGE_REPO_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL under which public blobs are served (overrides IMAGE_REPO_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Per-file upload limit in bytes (overrides IMAGE_REPO_MAX_FILE_BYTES)
    #[arg(long)]
    pub max_file_bytes: Option<u64>,

    /// Send failure envelopes with 4xx/5xx statuses instead of 200 (overrides IMAGE_REPO_HTTP_ERROR_STATUS)
    #[arg(long)]
    pub http_error_status: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_REPO_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match parse_env::<u16>("IMAGE_REPO_PORT")? {
            Some(port) => port,
            None => parse_env::<u16>("PORT")?.unwrap_or(5000),
        };
        let env_storage =
            env::var("IMAGE_REPO_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_staging =
            env::var("IMAGE_REPO_STAGING_DIR").unwrap_or_else(|_| "./temp_uploads".into());
        let env_db = env::var("IMAGE_REPO_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/images.db".into());
        let env_public = env::var("IMAGE_REPO_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:5000/blobs".into());
        let env_max =
            parse_env::<u64>("IMAGE_REPO_MAX_FILE_BYTES")?.unwrap_or(DEFAULT_MAX_FILE_BYTES);
        let env_error_status =
            parse_env::<bool>("IMAGE_REPO_HTTP_ERROR_STATUS")?.unwrap_or(false);

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public),
            max_file_bytes: args.max_file_bytes.unwrap_or(env_max),
            http_error_status: args.http_error_status || env_error_status,
        };

        if cfg.max_file_bytes == 0 {
            anyhow::bail!("max file size must be greater than zero");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable.
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
