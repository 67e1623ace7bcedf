//! src/services/image_catalog.rs
//!
//! `ImageCatalog` is the stateless half of image handling: listing, writing
//! edits, deleting blob + record, and opening live snapshot feeds. The
//! stateful gallery view lives in `image_sync`; the HTTP layer uses this
//! type directly.

use crate::backends::{BackendError, DocumentStore, ObjectStore};
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{
    image::{ImageFields, ImageRecord, SortOrder, sort_images},
    scope::SetupScope,
};
use crate::services::confirm::Confirm;
use std::sync::Arc;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ImageCatalog {
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ImageCatalog {
    pub fn new(documents: Arc<dyn DocumentStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { documents, objects }
    }

    /// One-off ordered read of the scope's images.
    pub async fn list(&self, scope: &SetupScope, order: SortOrder) -> ServiceResult<Vec<ImageRecord>> {
        let mut images = self.documents.list_images(scope).await?;
        sort_images(&mut images, order);
        Ok(images)
    }

    /// Write the full field set of an already validated edit.
    #[instrument(skip(self, fields), fields(scope = %scope))]
    pub async fn apply_edit(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        fields: &ImageFields,
    ) -> ServiceResult<ImageRecord> {
        let record = self
            .documents
            .update_image(scope, image_id, fields)
            .await
            .inspect_err(|err| warn!(%image_id, "image update failed: {}", err))?;
        info!(%image_id, "image updated");
        Ok(record)
    }

    /// Delete one image after the user confirmed it.
    pub async fn delete(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        confirm: &dyn Confirm,
    ) -> ServiceResult<ImageRecord> {
        if !confirm.confirm("Are you sure you want to delete this image? This action cannot be undone.") {
            return Err(ServiceError::Cancelled(format!("deletion of image {}", image_id)));
        }
        self.remove(scope, image_id).await
    }

    /// Delete the blob, then the record.
    ///
    /// A record whose URL does not point into the object store has no blob to
    /// delete; only the record is removed. A blob that is already gone is
    /// treated as deleted.
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn remove(&self, scope: &SetupScope, image_id: Uuid) -> ServiceResult<ImageRecord> {
        let record = self.documents.get_image(scope, image_id).await?;

        match self.objects.path_from_url(&record.url) {
            Some(path) => match self.objects.delete(&path).await {
                Ok(()) => debug!(%path, "blob deleted"),
                Err(BackendError::NotFound(_)) => {
                    warn!(%path, "blob already missing; deleting record only")
                }
                Err(err) => {
                    warn!(%path, "blob delete failed: {}", err);
                    return Err(ServiceError::BackendUnavailable(err));
                }
            },
            None => warn!(url = %record.url, "no storage path in image url; deleting record only"),
        }

        if let Err(source) = self.documents.delete_image(scope, image_id).await {
            warn!(%image_id, "record delete failed after blob removal: {}", source);
            return Err(ServiceError::DanglingImage { image_id, source });
        }

        info!(%image_id, "image deleted");
        Ok(record)
    }

    /// Open a live feed of ordered snapshots for `scope`.
    ///
    /// Must be called inside a Tokio runtime. The first snapshot is the
    /// current state; later ones follow every committed write to the scope's
    /// image collection.
    pub fn watch(&self, scope: SetupScope) -> SnapshotFeed {
        // Subscribe before the first read so no write slips between them.
        let mut changes = self.documents.changes();
        let documents = self.documents.clone();
        let collection = scope.images_collection();
        let (tx, rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            loop {
                match documents.list_images(&scope).await {
                    Ok(images) => {
                        if tx.send(Some(images)).is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!(scope = %scope, "snapshot query failed: {}", err),
                }

                loop {
                    match changes.recv().await {
                        Ok(change) if change.collection == collection => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "change feed lagged; re-reading snapshot");
                            break;
                        }
                        Err(RecvError::Closed) => return,
                    }
                }
            }
        });

        SnapshotFeed { receiver: rx, task }
    }
}

/// Disposable live subscription to one scope's images.
///
/// Dropping the feed (or calling `unsubscribe`) cancels the background
/// listener; nothing is delivered afterwards.
pub struct SnapshotFeed {
    receiver: watch::Receiver<Option<Vec<ImageRecord>>>,
    task: JoinHandle<()>,
}

impl SnapshotFeed {
    /// Wait for the next snapshot. Intermediate snapshots may be skipped;
    /// the latest one is always delivered. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Vec<ImageRecord>> {
        loop {
            self.receiver.changed().await.ok()?;
            if let Some(snapshot) = self.receiver.borrow_and_update().clone() {
                return Some(snapshot);
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for SnapshotFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}
