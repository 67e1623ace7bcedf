//! Process-local document and object stores.
//!
//! Both keep everything in memory and support fault injection per
//! operation, which is how partial failures are exercised.

use crate::backends::{
    BackendError, BackendResult, BlobHandle, BlobReader, CollectionChange, DocumentStore,
    ObjectStore, download_url,
};
use crate::models::{
    image::{Crop, DEFAULT_ZOOM, ImageFields, ImageRecord, NewImage, SortOrder, sort_images},
    scope::{SetupScope, setups_collection},
    setup::Setup,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex as StdMutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListSetups,
    GetSetup,
    InsertSetup,
    DeleteSetup,
    ListImages,
    GetImage,
    InsertImage,
    UpdateImage,
    DeleteImage,
    PutBlob,
    ReadBlob,
    DeleteBlob,
    ListBlobs,
}

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    /// Calls that still succeed before failures start.
    successes_left: usize,
    /// `None` keeps failing forever.
    failures_left: Option<usize>,
}

/// Per-operation failure schedule.
#[derive(Debug, Default)]
pub struct FaultInjector {
    plans: StdMutex<HashMap<Operation, FaultPlan>>,
}

impl FaultInjector {
    /// Let `successes` calls of `op` through, then fail exactly one.
    pub fn fail_after(&self, op: Operation, successes: usize) {
        self.set(
            op,
            FaultPlan {
                successes_left: successes,
                failures_left: Some(1),
            },
        );
    }

    /// Fail every call of `op` until `clear` is called.
    pub fn fail_always(&self, op: Operation) {
        self.set(
            op,
            FaultPlan {
                successes_left: 0,
                failures_left: None,
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn set(&self, op: Operation, plan: FaultPlan) {
        self.lock().insert(op, plan);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Operation, FaultPlan>> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, op: Operation) -> BackendResult<()> {
        let mut plans = self.lock();
        let Some(plan) = plans.get_mut(&op) else {
            return Ok(());
        };
        if plan.successes_left > 0 {
            plan.successes_left -= 1;
            return Ok(());
        }
        match plan.failures_left {
            Some(0) => return Ok(()),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        Err(BackendError::Unavailable(format!("injected failure on {:?}", op)))
    }
}

#[derive(Default)]
struct Collections {
    setups: BTreeMap<String, Vec<Setup>>,
    images: HashMap<SetupScope, Vec<ImageRecord>>,
}

/// In-memory document store.
pub struct MemoryDocumentStore {
    collections: Mutex<Collections>,
    changes: broadcast::Sender<CollectionChange>,
    calls: AtomicUsize,
    pub faults: FaultInjector,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            collections: Mutex::new(Collections::default()),
            changes,
            calls: AtomicUsize::new(0),
            faults: FaultInjector::default(),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data operations issued against this store so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn enter(&self, op: Operation) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.faults.check(op)
    }

    fn notify(&self, collection: String) {
        let _ = self.changes.send(CollectionChange::new(collection));
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn list_setups(&self, user_id: &str) -> BackendResult<Vec<Setup>> {
        self.enter(Operation::ListSetups)?;
        let collections = self.collections.lock().await;
        Ok(collections.setups.get(user_id).cloned().unwrap_or_default())
    }

    async fn get_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<Setup> {
        self.enter(Operation::GetSetup)?;
        let collections = self.collections.lock().await;
        collections
            .setups
            .get(user_id)
            .and_then(|setups| setups.iter().find(|s| s.id == setup_id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("setup {}", setup_id)))
    }

    async fn insert_setup(&self, user_id: &str, name: &str) -> BackendResult<Setup> {
        self.enter(Operation::InsertSetup)?;
        let setup = Setup {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: truncate_to_millis(Utc::now()),
        };
        {
            let mut collections = self.collections.lock().await;
            let setups = collections.setups.entry(user_id.to_string()).or_default();
            setups.push(setup.clone());
            setups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        }
        self.notify(setups_collection(user_id));
        Ok(setup)
    }

    async fn delete_setup(&self, user_id: &str, setup_id: Uuid) -> BackendResult<()> {
        self.enter(Operation::DeleteSetup)?;
        {
            let mut collections = self.collections.lock().await;
            let setups = collections
                .setups
                .get_mut(user_id)
                .ok_or_else(|| BackendError::NotFound(format!("setup {}", setup_id)))?;
            let before = setups.len();
            setups.retain(|s| s.id != setup_id);
            if setups.len() == before {
                return Err(BackendError::NotFound(format!("setup {}", setup_id)));
            }
            collections
                .images
                .remove(&SetupScope::new(user_id, setup_id));
        }
        self.notify(setups_collection(user_id));
        Ok(())
    }

    async fn list_images(&self, scope: &SetupScope) -> BackendResult<Vec<ImageRecord>> {
        self.enter(Operation::ListImages)?;
        let collections = self.collections.lock().await;
        let mut images = collections.images.get(scope).cloned().unwrap_or_default();
        sort_images(&mut images, SortOrder::Ascending);
        Ok(images)
    }

    async fn get_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<ImageRecord> {
        self.enter(Operation::GetImage)?;
        let collections = self.collections.lock().await;
        collections
            .images
            .get(scope)
            .and_then(|images| images.iter().find(|i| i.id == image_id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("image {}", image_id)))
    }

    async fn insert_image(&self, scope: &SetupScope, image: NewImage) -> BackendResult<ImageRecord> {
        self.enter(Operation::InsertImage)?;
        let record = ImageRecord {
            id: Uuid::new_v4(),
            url: image.url,
            uploaded_at: truncate_to_millis(image.uploaded_at),
            crop: Crop::default(),
            zoom: DEFAULT_ZOOM,
        };
        self.collections
            .lock()
            .await
            .images
            .entry(scope.clone())
            .or_default()
            .push(record.clone());
        self.notify(scope.images_collection());
        Ok(record)
    }

    async fn update_image(
        &self,
        scope: &SetupScope,
        image_id: Uuid,
        fields: &ImageFields,
    ) -> BackendResult<ImageRecord> {
        self.enter(Operation::UpdateImage)?;
        let updated = {
            let mut collections = self.collections.lock().await;
            let record = collections
                .images
                .get_mut(scope)
                .and_then(|images| images.iter_mut().find(|i| i.id == image_id))
                .ok_or_else(|| BackendError::NotFound(format!("image {}", image_id)))?;
            *record = record.with_fields(fields);
            record.uploaded_at = truncate_to_millis(record.uploaded_at);
            record.clone()
        };
        self.notify(scope.images_collection());
        Ok(updated)
    }

    async fn delete_image(&self, scope: &SetupScope, image_id: Uuid) -> BackendResult<()> {
        self.enter(Operation::DeleteImage)?;
        {
            let mut collections = self.collections.lock().await;
            let images = collections
                .images
                .get_mut(scope)
                .ok_or_else(|| BackendError::NotFound(format!("image {}", image_id)))?;
            let before = images.len();
            images.retain(|i| i.id != image_id);
            if images.len() == before {
                return Err(BackendError::NotFound(format!("image {}", image_id)));
            }
        }
        self.notify(scope.images_collection());
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<CollectionChange> {
        self.changes.subscribe()
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }
}

struct StoredBlob {
    content_type: Option<String>,
    bytes: Bytes,
}

/// In-memory object store.
pub struct MemoryObjectStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    public_base_url: String,
    pub faults: FaultInjector,
}

impl MemoryObjectStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            public_base_url: public_base_url.into(),
            faults: FaultInjector::default(),
        }
    }

    /// Whether a blob is currently stored at `path`.
    pub async fn contains(&self, path: &str) -> bool {
        self.blobs.lock().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn handle_for(path: &str, blob: &StoredBlob) -> BlobHandle {
    BlobHandle {
        path: path.to_string(),
        content_type: blob.content_type.clone(),
        size_bytes: blob.bytes.len() as u64,
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> BackendResult<BlobHandle> {
        self.faults.check(Operation::PutBlob)?;
        if path.is_empty() || path.starts_with('/') || path.contains("..") {
            return Err(BackendError::InvalidKey(path.to_string()));
        }
        let blob = StoredBlob {
            content_type: content_type.map(str::to_string),
            bytes,
        };
        let handle = handle_for(path, &blob);
        self.blobs.lock().await.insert(path.to_string(), blob);
        Ok(handle)
    }

    async fn url(&self, handle: &BlobHandle) -> BackendResult<String> {
        Ok(download_url(&self.public_base_url, &handle.path))
    }

    async fn read(&self, path: &str) -> BackendResult<BlobReader> {
        self.faults.check(Operation::ReadBlob)?;
        let blobs = self.blobs.lock().await;
        let blob = blobs
            .get(path)
            .ok_or_else(|| BackendError::NotFound(format!("blob `{}`", path)))?;
        Ok(BlobReader {
            handle: handle_for(path, blob),
            body: stream::once(futures::future::ready(Ok(blob.bytes.clone()))).boxed(),
        })
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.faults.check(Operation::DeleteBlob)?;
        self.blobs
            .lock()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("blob `{}`", path)))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<BlobHandle>> {
        self.faults.check(Operation::ListBlobs)?;
        let blobs = self.blobs.lock().await;
        Ok(blobs
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| handle_for(path, blob))
            .collect())
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }
}
