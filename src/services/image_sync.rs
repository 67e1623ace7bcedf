//! Live gallery view of one setup's images.
//!
//! `ImageSynchronizer` keeps an ordered in-memory copy of the selected
//! setup's image records, fed by a `SnapshotFeed`. Edits are two-phase: the
//! entry shows the new fields as `Pending` while the write is in flight, and
//! either becomes `Confirmed` or reverts to the last authoritative value.

use crate::errors::ServiceResult;
use crate::models::{
    image::{ImageEdit, ImageFields, ImageRecord, SortOrder},
    scope::SetupScope,
};
use crate::services::{confirm::Confirm, image_catalog::ImageCatalog};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Whether an entry reflects the store or an edit still being written.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Confirmed,
    Pending,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct GalleryEntry {
    pub image: ImageRecord,
    pub state: EntryState,
}

/// Receives the full ordered view on every change.
///
/// Called with the view lock held: it must not call back into the
/// synchronizer.
pub type SnapshotListener = Arc<dyn Fn(&[GalleryEntry]) + Send + Sync>;

#[derive(Default)]
struct GalleryView {
    /// Bumped on every (un)subscribe; pumps from older generations are ignored.
    generation: u64,
    scope: Option<SetupScope>,
    order: SortOrder,
    authoritative: Vec<ImageRecord>,
    pending: HashMap<Uuid, ImageFields>,
    entries: Vec<GalleryEntry>,
    listener: Option<SnapshotListener>,
}

impl GalleryView {
    fn is_active(&self, scope: &SetupScope) -> bool {
        self.scope.as_ref() == Some(scope)
    }

    fn render(&mut self) {
        let mut entries: Vec<GalleryEntry> = self
            .authoritative
            .iter()
            .map(|image| match self.pending.get(&image.id) {
                Some(fields) => GalleryEntry {
                    image: image.with_fields(fields),
                    state: EntryState::Pending,
                },
                None => GalleryEntry {
                    image: image.clone(),
                    state: EntryState::Confirmed,
                },
            })
            .collect();

        match self.order {
            SortOrder::Ascending => {
                entries.sort_by(|a, b| a.image.uploaded_at.cmp(&b.image.uploaded_at))
            }
            SortOrder::Descending => {
                entries.sort_by(|a, b| b.image.uploaded_at.cmp(&a.image.uploaded_at))
            }
        }
        self.entries = entries;

        if let Some(listener) = &self.listener {
            listener(&self.entries);
        }
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.scope = None;
        self.authoritative.clear();
        self.pending.clear();
        self.entries.clear();
        self.listener = None;
    }
}

pub struct ImageSynchronizer {
    catalog: ImageCatalog,
    view: Arc<Mutex<GalleryView>>,
    pump: Option<JoinHandle<()>>,
}

impl ImageSynchronizer {
    pub fn new(catalog: ImageCatalog) -> Self {
        Self {
            catalog,
            view: Arc::new(Mutex::new(GalleryView::default())),
            pump: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GalleryView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start following `scope`, replacing any previous subscription.
    ///
    /// The previous view is cleared before this returns, so nothing from the
    /// old scope can show up under the new one. `on_change` then receives
    /// every snapshot of the new scope. Must be called inside a Tokio
    /// runtime.
    pub fn subscribe<F>(&mut self, scope: SetupScope, on_change: F)
    where
        F: Fn(&[GalleryEntry]) + Send + Sync + 'static,
    {
        self.unsubscribe();

        let generation = {
            let mut view = self.lock();
            view.scope = Some(scope.clone());
            view.listener = Some(Arc::new(on_change));
            view.generation
        };

        info!(scope = %scope, "subscribing to setup images");
        let mut feed = self.catalog.watch(scope);
        let shared = Arc::clone(&self.view);
        self.pump = Some(tokio::spawn(async move {
            while let Some(snapshot) = feed.next().await {
                let mut view = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if view.generation != generation {
                    break;
                }
                view.authoritative = snapshot;
                view.render();
            }
        }));
    }

    /// Tear down the current subscription and clear the view.
    pub fn unsubscribe(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let mut view = self.lock();
        if let Some(scope) = &view.scope {
            debug!(scope = %scope, "unsubscribing from setup images");
        }
        view.clear();
    }

    pub fn scope(&self) -> Option<SetupScope> {
        self.lock().scope.clone()
    }

    /// Current ordered view.
    pub fn snapshot(&self) -> Vec<GalleryEntry> {
        self.lock().entries.clone()
    }

    pub fn order(&self) -> SortOrder {
        self.lock().order
    }

    /// Re-sort the local view. Later snapshots keep this order.
    pub fn reorder(&self, order: SortOrder) {
        let mut view = self.lock();
        view.order = order;
        view.render();
    }

    /// Validate and write an edit, showing it as pending meanwhile.
    ///
    /// On write failure the pending overlay is dropped and the entry reverts
    /// to the last value the store reported.
    pub async fn edit_image(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        edit: ImageEdit,
    ) -> ServiceResult<ImageRecord> {
        let fields = edit.validate()?;

        {
            let mut view = self.lock();
            if view.is_active(scope) && view.authoritative.iter().any(|i| i.id == image_id) {
                view.pending.insert(image_id, fields);
                view.render();
            }
        }

        let outcome = self.catalog.apply_edit(scope, image_id, &fields).await;

        let mut view = self.lock();
        if view.is_active(scope) && view.pending.remove(&image_id).is_some() {
            if let Ok(record) = &outcome {
                if let Some(slot) = view.authoritative.iter_mut().find(|i| i.id == image_id) {
                    *slot = record.clone();
                }
            } else {
                debug!(%image_id, "reverting failed edit");
            }
            view.render();
        }
        outcome
    }

    /// Delete an image after confirmation: blob, record, then local entry.
    pub async fn delete_image(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        confirm: &dyn Confirm,
    ) -> ServiceResult<()> {
        self.catalog.delete(scope, image_id, confirm).await?;

        let mut view = self.lock();
        if view.is_active(scope) {
            view.authoritative.retain(|i| i.id != image_id);
            view.pending.remove(&image_id);
            view.render();
        }
        Ok(())
    }
}

impl Drop for ImageSynchronizer {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
