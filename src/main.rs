use anyhow::{Context, Result};
use clinostat_log::{
    app,
    backends::{
        DocumentStore, ObjectStore,
        disk_objects::DiskObjectStore,
        identity::LocalIdentity,
        memory::{MemoryDocumentStore, MemoryObjectStore},
        sqlite_documents::{SqliteDocumentStore, run_migrations},
    },
    config::AppConfig,
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting clinostat-log with config: {:?}", cfg);

    let (documents, objects): (Arc<dyn DocumentStore>, Arc<dyn ObjectStore>) = if cfg.ephemeral {
        if migrate {
            anyhow::bail!("--migrate has nothing to do with --ephemeral");
        }
        tracing::warn!("Running with in-memory stores; nothing is persisted");
        (
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryObjectStore::new(cfg.public_base_url.clone())),
        )
    } else {
        // --- Ensure storage directory exists ---
        if !Path::new(&cfg.storage_dir).exists() {
            fs::create_dir_all(&cfg.storage_dir)?;
            tracing::info!("Created storage directory at {}", cfg.storage_dir);
        }

        // --- Initialize SQLite connection ---
        let options = SqliteConnectOptions::from_str(&cfg.database_url)
            .with_context(|| format!("parsing database url `{}`", cfg.database_url))?
            .create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        let db = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .context("connecting to SQLite")?,
        );

        run_migrations(&db).await.context("applying migrations")?;

        // --- Handle migration mode ---
        if migrate {
            tracing::info!("Database migration complete.");
            return Ok(()); // exit after migration
        }

        (
            Arc::new(SqliteDocumentStore::new(db.clone())),
            Arc::new(DiskObjectStore::new(
                db,
                cfg.storage_dir.clone(),
                cfg.public_base_url.clone(),
            )),
        )
    };

    // --- Initialize services ---
    let state = AppState::new(
        Arc::new(LocalIdentity::new()),
        documents,
        objects,
        cfg.max_image_bytes,
    );

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state, cfg.max_request_bytes)).await?;

    Ok(())
}
