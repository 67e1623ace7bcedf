//! Collaborator seams: document store, object store, identity provider.
//!
//! The services only ever talk to these traits. Two families of
//! implementations exist:
//! - `sqlite_documents` + `disk_objects`: durable metadata in SQLite and blob
//!   payloads on local disk.
//! - `memory`: process-local stores with fault injection, used for
//!   ephemeral runs and tests.

pub mod disk_objects;
pub mod identity;
pub mod memory;
pub mod sqlite_documents;

use crate::models::{
    image::{ImageFields, ImageRecord, NewImage},
    scope::SetupScope,
    session::{Credential, SessionEvent, SessionUser, SignedIn},
    setup::Setup,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Emitted by a document store after every committed write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionChange {
    /// Path of the collection that changed, e.g. `images/u1/setups`.
    pub collection: String,
}

impl CollectionChange {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }
}

/// Hierarchical document storage for setups and image records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Setups of `user_id`, ascending by creation time.
    async fn list_setups(&self, user_id: &str) -> BackendResult<Vec<Setup>>;

    async fn get_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<Setup>;

    async fn insert_setup(&self, user_id: &str, name: &str) -> BackendResult<Setup>;

    async fn delete_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<()>;

    /// Images of the scope, ascending by `uploaded_at`.
    async fn list_images(&self, scope: &SetupScope) -> BackendResult<Vec<ImageRecord>>;

    async fn get_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<ImageRecord>;

    async fn insert_image(&self, scope: &SetupScope, image: NewImage) -> BackendResult<ImageRecord>;

    /// Overwrite all editable fields of an image and return the new record.
    async fn update_image(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        fields: &ImageFields,
    ) -> BackendResult<ImageRecord>;

    async fn delete_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<()>;

    /// Change feed. Subscribe before reading to avoid missing writes.
    fn changes(&self) -> broadcast::Receiver<CollectionChange>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> BackendResult<()>;
}

/// Reference to a stored blob.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct BlobHandle {
    pub path: String,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

/// Blob payload opened for streaming.
pub struct BlobReader {
    pub handle: BlobHandle,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

/// Binary object storage for uploaded images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn put(&self, path: &str, content_type: Option<&str>, bytes: Bytes)
    -> BackendResult<BlobHandle>;

    /// Retrieval URL of a stored blob.
    async fn url(&self, handle: &BlobHandle) -> BackendResult<String>;

    /// Inverse of `url`: recover the storage path embedded in a URL.
    fn path_from_url(&self, url: &str) -> Option<String> {
        path_from_download_url(url)
    }

    async fn read(&self, path: &str) -> BackendResult<BlobReader>;

    async fn delete(&self, path: &str) -> BackendResult<()>;

    /// Blobs whose path starts with `prefix`, ordered by path.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<BlobHandle>>;

    async fn ping(&self) -> BackendResult<()>;
}

/// Issues and validates user sessions.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and open its first session. An email that already
    /// has an account is `Rejected`.
    async fn sign_up(&self, credential: Credential) -> BackendResult<SignedIn>;

    /// Open a session for an existing account. Unknown emails and wrong
    /// passwords are both `Rejected`.
    async fn sign_in(&self, credential: Credential) -> BackendResult<SignedIn>;

    async fn sign_out(&self, token: &str) -> BackendResult<()>;

    /// User behind a session token, if the session is live.
    async fn resolve(&self, token: &str) -> Option<SessionUser>;

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Build the download URL for `path`: `<base>/o/<base64url(path)>`.
///
/// The path is encoded into a single URL segment so nested keys such as
/// `uploads/<uuid>_name.png` survive routing untouched.
pub fn download_url(public_base_url: &str, path: &str) -> String {
    format!(
        "{}/o/{}",
        public_base_url.trim_end_matches('/'),
        URL_SAFE_NO_PAD.encode(path)
    )
}

/// Decode the `/o/<segment>` part of a download URL back into a path.
pub fn path_from_download_url(url: &str) -> Option<String> {
    let (_, tail) = url.rsplit_once("/o/")?;
    let segment = tail.split(['?', '#']).next()?;
    decode_path_segment(segment)
}

/// Decode a single encoded path segment.
pub fn decode_path_segment(segment: &str) -> Option<String> {
    if segment.is_empty() {
        return None;
    }
    URL_SAFE_NO_PAD
        .decode(segment)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
