//! src/backends/disk_objects.rs
//!
//! DiskObjectStore: blob payloads on local disk, blob metadata in SQLite.
//! Payloads are sharded beneath `base_path/{shard}/{shard}/{key}` so a single
//! `uploads/` prefix does not pile every file into one directory.

use crate::backends::{
    BackendError, BackendResult, BlobHandle, BlobReader, ObjectStore, download_url,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(FromRow)]
struct BlobRow {
    key: String,
    content_type: Option<String>,
    size_bytes: i64,
}

impl From<BlobRow> for BlobHandle {
    fn from(row: BlobRow) -> Self {
        BlobHandle {
            path: row.key,
            content_type: row.content_type,
            size_bytes: row.size_bytes.max(0) as u64,
        }
    }
}

/// Object store writing payloads under `base_path`.
#[derive(Clone)]
pub struct DiskObjectStore {
    /// Shared SQLite connection pool used for blob metadata.
    db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    base_path: PathBuf,

    /// Origin prepended to download URLs.
    public_base_url: String,
}

impl DiskObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or oversized keys, keys that begin with `/`, contain
    /// `..`, backslashes or control characters.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        let invalid = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if invalid {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Two-level shard identifiers: the first two bytes of MD5(key) as hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/{shard}/{shard}/{key}. Parents may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_blob(&self, key: &str) -> BackendResult<BlobHandle> {
        sqlx::query_as::<_, BlobRow>("SELECT key, content_type, size_bytes FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&*self.db)
            .await?
            .map(BlobHandle::from)
            .ok_or_else(|| BackendError::NotFound(format!("blob `{}`", key)))
    }

    /// Write `bytes` to a temp file, fsync, then rename into place.
    async fn write_payload(&self, file_path: &Path, bytes: &Bytes) -> BackendResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BackendError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for DiskObjectStore {
    fn backend_tag(&self) -> &'static str {
        "disk"
    }

    async fn put(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> BackendResult<BlobHandle> {
        self.ensure_key_safe(path)?;
        let file_path = self.object_path(path);
        self.write_payload(&file_path, &bytes).await?;

        let etag = format!("{:x}", md5::compute(&bytes));
        let insert_result = sqlx::query_as::<_, BlobRow>(
            r#"
            INSERT INTO blobs (key, content_type, size_bytes, etag, last_modified_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified_ms = excluded.last_modified_ms
            RETURNING key, content_type, size_bytes
            "#,
        )
        .bind(path)
        .bind(content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(row) => {
                debug!(key = path, size_bytes = bytes.len(), "stored blob");
                Ok(row.into())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(BackendError::Sqlx(err))
            }
        }
    }

    async fn url(&self, handle: &BlobHandle) -> BackendResult<String> {
        Ok(download_url(&self.public_base_url, &handle.path))
    }

    async fn read(&self, path: &str) -> BackendResult<BlobReader> {
        self.ensure_key_safe(path)?;
        let handle = self.fetch_blob(path).await?;
        let file = File::open(self.object_path(path)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NotFound(format!("blob `{}`", path))
            } else {
                BackendError::Io(err)
            }
        })?;

        Ok(BlobReader {
            handle,
            body: ReaderStream::new(file).boxed(),
        })
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.ensure_key_safe(path)?;
        let result = sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(path)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("blob `{}`", path)));
        }

        let file_path = self.object_path(path);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(BackendError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<BlobHandle>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key, content_type, size_bytes FROM blobs");
        if !prefix.is_empty() {
            builder.push(" WHERE key LIKE ");
            builder.push_bind(format!("{}%", escape_like(prefix)));
            builder.push(" ESCAPE '\\'");
        }
        builder.push(" ORDER BY key ASC");

        let rows: Vec<BlobRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows.into_iter().map(BlobHandle::from).collect())
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn ping(&self) -> BackendResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(BackendError::Unavailable("file content mismatch".into()));
        }
        Ok(())
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite_documents::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    async fn store(base: &Path) -> DiskObjectStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite");
        run_migrations(&pool).await.expect("migrate");
        DiskObjectStore::new(Arc::new(pool), base, "http://localhost:3000")
    }

    async fn read_all(reader: BlobReader) -> Vec<u8> {
        let mut body = reader.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn put_read_and_url_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = store(dir.path()).await;

        let handle = store
            .put("uploads/abc_root.png", Some("image/png"), Bytes::from_static(b"png-bytes"))
            .await
            .expect("put");
        assert_eq!(handle.size_bytes, 9);
        assert_eq!(handle.content_type.as_deref(), Some("image/png"));

        let url = store.url(&handle).await.expect("url");
        let path = store.path_from_url(&url).expect("decodable url");
        assert_eq!(path, "uploads/abc_root.png");

        let reader = store.read(&path).await.expect("read");
        assert_eq!(read_all(reader).await, b"png-bytes");
    }

    #[tokio::test]
    async fn delete_removes_payload_and_prunes_shard_dirs() {
        let dir = tempdir().expect("tempdir");
        let store = store(dir.path()).await;
        store
            .put("uploads/one.jpg", None, Bytes::from_static(b"1"))
            .await
            .expect("put");

        store.delete("uploads/one.jpg").await.expect("delete");
        assert!(matches!(
            store.read("uploads/one.jpg").await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("uploads/one.jpg").await,
            Err(BackendError::NotFound(_))
        ));

        let (shard_a, _) = DiskObjectStore::object_shards("uploads/one.jpg");
        assert!(!dir.path().join(shard_a).exists());
    }

    #[tokio::test]
    async fn list_filters_by_literal_prefix() {
        let dir = tempdir().expect("tempdir");
        let store = store(dir.path()).await;
        for key in ["uploads/b.jpg", "uploads/a.jpg", "uploads_x/c.jpg", "other/d.jpg"] {
            store
                .put(key, Some("image/jpeg"), Bytes::from_static(b"x"))
                .await
                .expect("put");
        }

        let keys: Vec<String> = store
            .list("uploads/")
            .await
            .expect("list")
            .into_iter()
            .map(|h| h.path)
            .collect();
        assert_eq!(keys, vec!["uploads/a.jpg", "uploads/b.jpg"]);
    }

    #[tokio::test]
    async fn unsafe_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = store(dir.path()).await;
        for key in ["", "/abs.png", "uploads/../escape.png", "back\\slash.png"] {
            assert!(matches!(
                store.put(key, None, Bytes::from_static(b"x")).await,
                Err(BackendError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn ping_checks_database_and_disk() {
        let dir = tempdir().expect("tempdir");
        let store = store(&dir.path().join("objects")).await;
        store.ping().await.expect("ready");
    }
}
