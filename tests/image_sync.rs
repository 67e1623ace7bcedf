use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clinostat_log::{
    backends::{
        DocumentStore, ObjectStore,
        memory::{MemoryDocumentStore, MemoryObjectStore, Operation},
    },
    errors::ServiceError,
    models::{
        image::{Crop, ImageEdit, ImageRecord, NewImage, SortOrder},
        scope::SetupScope,
    },
    services::{
        image_catalog::ImageCatalog,
        image_sync::{EntryState, GalleryEntry, ImageSynchronizer},
    },
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use uuid::Uuid;

type Recorded = Arc<Mutex<Vec<Vec<GalleryEntry>>>>;

struct Fixture {
    documents: Arc<MemoryDocumentStore>,
    objects: Arc<MemoryObjectStore>,
    catalog: ImageCatalog,
}

fn fixture() -> Fixture {
    let documents = Arc::new(MemoryDocumentStore::new());
    let objects = Arc::new(MemoryObjectStore::new("http://localhost:3000"));
    Fixture {
        catalog: ImageCatalog::new(documents.clone(), objects.clone()),
        documents,
        objects,
    }
}

async fn new_scope(f: &Fixture, name: &str) -> SetupScope {
    let setup = f.documents.insert_setup("u1", name).await.expect("setup");
    SetupScope::new("u1", setup.id)
}

async fn add_image(f: &Fixture, scope: &SetupScope, uploaded_at: DateTime<Utc>) -> ImageRecord {
    let path = format!("uploads/{}_x.png", Uuid::new_v4());
    let handle = f
        .objects
        .put(&path, Some("image/png"), Bytes::from_static(b"png"))
        .await
        .expect("put");
    let url = f.objects.url(&handle).await.expect("url");
    f.documents
        .insert_image(scope, NewImage { url, uploaded_at })
        .await
        .expect("insert")
}

fn recorder() -> (Recorded, impl Fn(&[GalleryEntry]) + Send + Sync + 'static) {
    let recorded: Recorded = Arc::default();
    let sink = recorded.clone();
    (recorded, move |entries: &[GalleryEntry]| {
        sink.lock().expect("lock").push(entries.to_vec());
    })
}

async fn wait_for(sync: &ImageSynchronizer, done: impl Fn(&[GalleryEntry]) -> bool) -> Vec<GalleryEntry> {
    for _ in 0..200 {
        let snapshot = sync.snapshot();
        if done(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("view never reached the expected state: {:?}", sync.snapshot());
}

fn ids(entries: &[GalleryEntry]) -> Vec<Uuid> {
    entries.iter().map(|e| e.image.id).collect()
}

fn edit(record: &ImageRecord, zoom: f64) -> ImageEdit {
    ImageEdit {
        crop: Crop { x: 10.0, y: 20.0 },
        zoom,
        timestamp: record.uploaded_at.timestamp_millis() as f64,
    }
}

#[tokio::test]
async fn switching_setups_never_shows_the_previous_setup() {
    let f = fixture();
    let first = new_scope(&f, "First").await;
    let second = new_scope(&f, "Second").await;
    let now = Utc::now();
    let a = add_image(&f, &first, now).await;
    add_image(&f, &first, now).await;
    let b = add_image(&f, &second, now).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (first_seen, on_first) = recorder();
    sync.subscribe(first.clone(), on_first);
    wait_for(&sync, |s| s.len() == 2).await;
    assert!(ids(&sync.snapshot()).contains(&a.id));

    let (second_seen, on_second) = recorder();
    sync.subscribe(second.clone(), on_second);
    assert!(sync.snapshot().is_empty());
    assert_eq!(sync.scope(), Some(second.clone()));

    let view = wait_for(&sync, |s| s.len() == 1).await;
    assert_eq!(ids(&view), vec![b.id]);
    for snapshot in second_seen.lock().expect("lock").iter() {
        assert!(ids(snapshot).iter().all(|id| *id == b.id));
    }

    // Writes to the old setup no longer reach anyone.
    let delivered = first_seen.lock().expect("lock").len();
    add_image(&f, &first, now).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first_seen.lock().expect("lock").len(), delivered);
    assert_eq!(ids(&sync.snapshot()), vec![b.id]);
}

#[tokio::test]
async fn unsubscribe_clears_view_and_stops_delivery() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    add_image(&f, &scope, Utc::now()).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);
    wait_for(&sync, |s| s.len() == 1).await;

    sync.unsubscribe();
    assert!(sync.snapshot().is_empty());
    assert_eq!(sync.scope(), None);

    let delivered = seen.lock().expect("lock").len();
    add_image(&f, &scope, Utc::now()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().expect("lock").len(), delivered);
}

#[tokio::test]
async fn new_images_arrive_in_later_snapshots() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (_seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);

    wait_for(&sync, |s| s.is_empty()).await;
    let image = add_image(&f, &scope, Utc::now()).await;
    let view = wait_for(&sync, |s| s.len() == 1).await;
    assert_eq!(view[0].image.id, image.id);
    assert_eq!(view[0].state, EntryState::Confirmed);
}

#[tokio::test]
async fn edit_shows_pending_then_confirms() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let image = add_image(&f, &scope, Utc::now()).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);
    wait_for(&sync, |s| s.len() == 1).await;

    let record = sync.edit_image(&scope, image.id, edit(&image, 2.0)).await.expect("edit");
    assert_eq!(record.zoom, 2.0);
    assert_eq!(record.crop, Crop { x: 10.0, y: 20.0 });

    let pending_seen = seen
        .lock()
        .expect("lock")
        .iter()
        .flatten()
        .any(|e| e.state == EntryState::Pending && e.image.zoom == 2.0);
    assert!(pending_seen);

    let view = sync.snapshot();
    assert_eq!(view[0].state, EntryState::Confirmed);
    assert_eq!(view[0].image.zoom, 2.0);
}

#[tokio::test]
async fn failed_edit_reverts_to_last_confirmed_value() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let image = add_image(&f, &scope, Utc::now()).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (_seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);
    wait_for(&sync, |s| s.len() == 1).await;

    f.documents.faults.fail_always(Operation::UpdateImage);
    let err = sync
        .edit_image(&scope, image.id, edit(&image, 3.0))
        .await
        .expect_err("write fails");
    assert!(matches!(err, ServiceError::BackendUnavailable(_)));

    let view = sync.snapshot();
    assert_eq!(view[0].state, EntryState::Confirmed);
    assert_eq!(view[0].image.zoom, 1.0);
    assert_eq!(view[0].image.crop, Crop::default());
}

#[tokio::test]
async fn invalid_edits_never_reach_the_store() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let image = add_image(&f, &scope, Utc::now()).await;
    let sync = ImageSynchronizer::new(f.catalog.clone());
    let calls = f.documents.calls();

    let bad_time = ImageEdit {
        timestamp: f64::NAN,
        ..edit(&image, 1.5)
    };
    let bad_zoom = edit(&image, 0.0);
    for bad in [bad_time, bad_zoom] {
        let err = sync.edit_image(&scope, image.id, bad).await.expect_err("invalid");
        assert!(matches!(err, ServiceError::Validation(_)));
    }
    assert_eq!(f.documents.calls(), calls);
}

#[tokio::test]
async fn reorder_flips_presentation_without_touching_the_store() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let now = Utc::now();
    let newer = add_image(&f, &scope, now).await;
    let older = add_image(&f, &scope, now - ChronoDuration::hours(1)).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (_seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);
    let view = wait_for(&sync, |s| s.len() == 2).await;
    assert_eq!(ids(&view), vec![older.id, newer.id]);

    let calls = f.documents.calls();
    sync.reorder(SortOrder::Descending);
    assert_eq!(ids(&sync.snapshot()), vec![newer.id, older.id]);
    assert_eq!(sync.order(), SortOrder::Descending);
    assert_eq!(f.documents.calls(), calls);

    // Later snapshots keep the chosen order.
    let newest = add_image(&f, &scope, now + ChronoDuration::hours(1)).await;
    let view = wait_for(&sync, |s| s.len() == 3).await;
    assert_eq!(ids(&view), vec![newest.id, newer.id, older.id]);
}

#[tokio::test]
async fn delete_requires_confirmation_and_drops_local_entry() {
    let f = fixture();
    let scope = new_scope(&f, "Roots").await;
    let image = add_image(&f, &scope, Utc::now()).await;

    let mut sync = ImageSynchronizer::new(f.catalog.clone());
    let (_seen, on_change) = recorder();
    sync.subscribe(scope.clone(), on_change);
    wait_for(&sync, |s| s.len() == 1).await;

    let err = sync.delete_image(&scope, image.id, &false).await.expect_err("declined");
    assert!(matches!(err, ServiceError::Cancelled(_)));
    assert_eq!(sync.snapshot().len(), 1);

    sync.delete_image(&scope, image.id, &true).await.expect("delete");
    assert!(sync.snapshot().is_empty());
    assert!(f.objects.is_empty().await);
}
