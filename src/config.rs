use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::str::FromStr;

use crate::services::upload_pipeline::DEFAULT_MAX_IMAGE_BYTES;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix of blob download URLs handed out to clients.
    pub public_base_url: String,
    pub max_image_bytes: u64,
    pub max_request_bytes: usize,
    /// Keep everything in memory; nothing survives a restart.
    pub ephemeral: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Clinostat image log API")]
pub struct Args {
    /// Host to bind to (overrides CLINOSTAT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLINOSTAT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image blobs are stored (overrides CLINOSTAT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CLINOSTAT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base URL used in download links (overrides CLINOSTAT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Per-image size limit in bytes (overrides CLINOSTAT_MAX_IMAGE_BYTES)
    #[arg(long)]
    pub max_image_bytes: Option<u64>,

    /// Request body limit in bytes (overrides CLINOSTAT_MAX_REQUEST_BYTES)
    #[arg(long)]
    pub max_request_bytes: Option<usize>,

    /// Use in-memory stores instead of SQLite and disk
    #[arg(long)]
    pub ephemeral: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::resolve(Args::parse(), |key| env::var(key).ok())
    }

    /// Merge `args` over the variables returned by `lookup` over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let env_host = lookup("CLINOSTAT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parsed(&lookup, "CLINOSTAT_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("CLINOSTAT_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("CLINOSTAT_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/clinostat.db".into());
        let env_max_image =
            parsed(&lookup, "CLINOSTAT_MAX_IMAGE_BYTES")?.unwrap_or(DEFAULT_MAX_IMAGE_BYTES);
        let env_ephemeral = parsed::<bool>(&lookup, "CLINOSTAT_EPHEMERAL")?.unwrap_or(false);

        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_base_url = match args.public_base_url.or_else(|| lookup("CLINOSTAT_PUBLIC_BASE_URL")) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", port),
        };
        let max_image_bytes = args.max_image_bytes.unwrap_or(env_max_image);
        // Room for a handful of maximum-size images plus multipart framing.
        let default_request = (max_image_bytes as usize).saturating_mul(8).saturating_add(64 * 1024);
        let max_request_bytes = match args.max_request_bytes {
            Some(limit) => limit,
            None => parsed(&lookup, "CLINOSTAT_MAX_REQUEST_BYTES")?.unwrap_or(default_request),
        };

        if max_image_bytes == 0 {
            anyhow::bail!("max image size must be greater than zero");
        }

        let cfg = Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url,
            max_image_bytes,
            max_request_bytes,
            ephemeral: args.ephemeral || env_ephemeral,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", key, value))
        })
        .transpose()
}
