//! src/backends/sqlite_documents.rs
//!
//! SqliteDocumentStore: the setup and image collections backed by SQLite.
//! Collection paths are virtual: a setup row carries its owner's `user_id`,
//! an image row carries both `user_id` and `setup_id`. Timestamps are stored
//! as epoch milliseconds so ordering in SQL matches ordering in Rust.

use crate::backends::{BackendError, BackendResult, CollectionChange, DocumentStore};
use crate::models::{
    image::{Crop, DEFAULT_ZOOM, ImageFields, ImageRecord, NewImage},
    scope::{SetupScope, setups_collection},
    setup::Setup,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const CHANGE_FEED_CAPACITY: usize = 256;

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> BackendResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("Running {} migration statements", statements.len());

    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(FromRow)]
struct SetupRow {
    id: Uuid,
    name: String,
    created_at_ms: i64,
}

impl TryFrom<SetupRow> for Setup {
    type Error = BackendError;

    fn try_from(row: SetupRow) -> Result<Self, Self::Error> {
        Ok(Setup {
            id: row.id,
            name: row.name,
            created_at: instant(row.created_at_ms)?,
        })
    }
}

#[derive(FromRow)]
struct ImageRow {
    id: Uuid,
    url: String,
    uploaded_at_ms: i64,
    crop_x: f64,
    crop_y: f64,
    zoom: f64,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = BackendError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        Ok(ImageRecord {
            id: row.id,
            url: row.url,
            uploaded_at: instant(row.uploaded_at_ms)?,
            crop: Crop {
                x: row.crop_x,
                y: row.crop_y,
            },
            zoom: row.zoom,
        })
    }
}

fn instant(ms: i64) -> BackendResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| BackendError::Corrupt(format!("timestamp {} out of range", ms)))
}

/// Document store over a shared SQLite pool.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Arc<SqlitePool>,
    changes: broadcast::Sender<CollectionChange>,
}

impl SqliteDocumentStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { db, changes }
    }

    fn notify(&self, collection: String) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(CollectionChange::new(collection));
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "sqlite"
    }

    async fn list_setups(&self, user_id: &str) -> BackendResult<Vec<Setup>> {
        let rows = sqlx::query_as::<_, SetupRow>(
            "SELECT id, name, created_at_ms FROM setups
             WHERE user_id = ?
             ORDER BY created_at_ms ASC, rowid ASC",
        )
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter().map(Setup::try_from).collect()
    }

    async fn get_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<Setup> {
        sqlx::query_as::<_, SetupRow>(
            "SELECT id, name, created_at_ms FROM setups WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(setup_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("setup {}", setup_id)))?
        .try_into()
    }

    async fn insert_setup(&self, user_id: &str, name: &str) -> BackendResult<Setup> {
        let setup = Setup {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: instant(Utc::now().timestamp_millis())?,
        };

        sqlx::query("INSERT INTO setups (id, user_id, name, created_at_ms) VALUES (?, ?, ?, ?)")
            .bind(setup.id)
            .bind(user_id)
            .bind(&setup.name)
            .bind(setup.created_at.timestamp_millis())
            .execute(&*self.db)
            .await?;

        self.notify(setups_collection(user_id));
        Ok(setup)
    }

    async fn delete_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<()> {
        let result = sqlx::query("DELETE FROM setups WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(setup_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("setup {}", setup_id)));
        }

        self.notify(setups_collection(user_id));
        Ok(())
    }

    async fn list_images(&self, scope: &SetupScope) -> BackendResult<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            "SELECT id, url, uploaded_at_ms, crop_x, crop_y, zoom FROM images
             WHERE user_id = ? AND setup_id = ?
             ORDER BY uploaded_at_ms ASC, rowid ASC",
        )
        .bind(&scope.user_id)
        .bind(scope.setup_id)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter().map(ImageRecord::try_from).collect()
    }

    async fn get_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<ImageRecord> {
        sqlx::query_as::<_, ImageRow>(
            "SELECT id, url, uploaded_at_ms, crop_x, crop_y, zoom FROM images
             WHERE user_id = ? AND setup_id = ? AND id = ?",
        )
        .bind(&scope.user_id)
        .bind(scope.setup_id)
        .bind(image_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("image {}", image_id)))?
        .try_into()
    }

    async fn insert_image(&self, scope: &SetupScope, image: NewImage) -> BackendResult<ImageRecord> {
        let record = ImageRecord {
            id: Uuid::new_v4(),
            url: image.url,
            uploaded_at: instant(image.uploaded_at.timestamp_millis())?,
            crop: Crop::default(),
            zoom: DEFAULT_ZOOM,
        };

        sqlx::query(
            "INSERT INTO images (id, user_id, setup_id, url, uploaded_at_ms, crop_x, crop_y, zoom)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&scope.user_id)
        .bind(scope.setup_id)
        .bind(&record.url)
        .bind(record.uploaded_at.timestamp_millis())
        .bind(record.crop.x)
        .bind(record.crop.y)
        .bind(record.zoom)
        .execute(&*self.db)
        .await?;

        self.notify(scope.images_collection());
        Ok(record)
    }

    async fn update_image(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        fields: &ImageFields,
    ) -> BackendResult<ImageRecord> {
        let row = sqlx::query_as::<_, ImageRow>(
            "UPDATE images SET crop_x = ?, crop_y = ?, zoom = ?, uploaded_at_ms = ?
             WHERE user_id = ? AND setup_id = ? AND id = ?
             RETURNING id, url, uploaded_at_ms, crop_x, crop_y, zoom",
        )
        .bind(fields.crop.x)
        .bind(fields.crop.y)
        .bind(fields.zoom)
        .bind(fields.uploaded_at.timestamp_millis())
        .bind(&scope.user_id)
        .bind(scope.setup_id)
        .bind(image_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("image {}", image_id)))?;

        self.notify(scope.images_collection());
        row.try_into()
    }

    async fn delete_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<()> {
        let result = sqlx::query("DELETE FROM images WHERE user_id = ? AND setup_id = ? AND id = ?")
            .bind(&scope.user_id)
            .bind(scope.setup_id)
            .bind(image_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("image {}", image_id)));
        }

        self.notify(scope.images_collection());
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> BackendResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value == 1 {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "unexpected result: {}",
                value
            )))
        }
    }
}
