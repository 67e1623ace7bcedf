use bytes::Bytes;
use chrono::Utc;
use clinostat_log::{
    backends::{
        DocumentStore, ObjectStore,
        memory::{MemoryDocumentStore, MemoryObjectStore, Operation},
    },
    errors::ServiceError,
    models::{
        image::{ImageRecord, NewImage},
        scope::SetupScope,
    },
    services::{image_catalog::ImageCatalog, setup_registry::SetupRegistry},
};
use std::sync::Arc;

struct Fixture {
    documents: Arc<MemoryDocumentStore>,
    objects: Arc<MemoryObjectStore>,
    registry: SetupRegistry,
}

fn fixture() -> Fixture {
    let documents = Arc::new(MemoryDocumentStore::new());
    let objects = Arc::new(MemoryObjectStore::new("http://localhost:3000"));
    let catalog = ImageCatalog::new(documents.clone(), objects.clone());
    Fixture {
        registry: SetupRegistry::new(documents.clone(), catalog),
        documents,
        objects,
    }
}

async fn add_image(f: &Fixture, scope: &SetupScope, name: &str) -> ImageRecord {
    let handle = f
        .objects
        .put(&format!("uploads/{}", name), Some("image/jpeg"), Bytes::from_static(b"jpg"))
        .await
        .expect("put");
    let url = f.objects.url(&handle).await.expect("url");
    f.documents
        .insert_image(
            scope,
            NewImage {
                url,
                uploaded_at: Utc::now(),
            },
        )
        .await
        .expect("insert")
}

#[tokio::test]
async fn empty_names_are_rejected_without_touching_the_store() {
    let f = fixture();
    for name in ["", "   ", "\t\n"] {
        let err = f.registry.create_setup("u1", name).await.expect_err("must fail");
        assert!(matches!(err, ServiceError::Validation(_)));
    }
    assert_eq!(f.documents.calls(), 0);
}

#[tokio::test]
async fn setups_list_oldest_first_and_allow_duplicates() {
    let f = fixture();
    let first = f.registry.create_setup("u1", "  Roots ").await.expect("create");
    let second = f.registry.create_setup("u1", "Roots").await.expect("create");
    f.registry.create_setup("u2", "Other user").await.expect("create");

    assert_eq!(first.name, "Roots");
    let ids: Vec<_> = f
        .registry
        .list_setups("u1")
        .await
        .expect("list")
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[tokio::test]
async fn load_reports_backend_failure_as_empty_listing() {
    let f = fixture();
    f.registry.create_setup("u1", "Roots").await.expect("create");
    f.documents.faults.fail_always(Operation::ListSetups);

    let listing = f.registry.load("u1").await;
    assert!(listing.setups.is_empty());
    assert!(listing.error.is_some());

    f.documents.faults.clear();
    let listing = f.registry.load("u1").await;
    assert_eq!(listing.setups.len(), 1);
    assert!(listing.error.is_none());
}

#[tokio::test]
async fn declined_delete_makes_no_backend_calls() {
    let f = fixture();
    let setup = f.registry.create_setup("u1", "Roots").await.expect("create");
    let calls = f.documents.calls();

    let err = f
        .registry
        .delete_setup("u1", setup.id, &false)
        .await
        .expect_err("declined");
    assert!(matches!(err, ServiceError::Cancelled(_)));
    assert_eq!(f.documents.calls(), calls);
}

#[tokio::test]
async fn deleting_unknown_setup_is_not_found() {
    let f = fixture();
    let err = f
        .registry
        .delete_setup("u1", uuid::Uuid::new_v4(), &true)
        .await
        .expect_err("unknown");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn delete_cascades_over_images_and_blobs() {
    let f = fixture();
    let setup = f.registry.create_setup("u1", "Roots").await.expect("create");
    let scope = SetupScope::new("u1", setup.id);
    add_image(&f, &scope, "a.jpg").await;
    add_image(&f, &scope, "b.jpg").await;

    let prompt = |message: &str| message.contains("delete this setup");
    f.registry.delete_setup("u1", setup.id, &prompt).await.expect("delete");

    assert!(f.registry.list_setups("u1").await.expect("list").is_empty());
    assert!(f.documents.list_images(&scope).await.expect("list").is_empty());
    assert!(f.objects.is_empty().await);
}

#[tokio::test]
async fn failure_midway_keeps_setup_and_retry_finishes() {
    let f = fixture();
    let setup = f.registry.create_setup("u1", "Roots").await.expect("create");
    let scope = SetupScope::new("u1", setup.id);
    add_image(&f, &scope, "a.jpg").await;
    let second = add_image(&f, &scope, "b.jpg").await;
    add_image(&f, &scope, "c.jpg").await;

    // Second image record delete fails after its blob is already gone.
    f.documents.faults.fail_after(Operation::DeleteImage, 1);

    let err = f
        .registry
        .delete_setup("u1", setup.id, &true)
        .await
        .expect_err("partial");
    match err {
        ServiceError::PartialDeletion {
            setup_id,
            removed,
            remaining,
            ..
        } => {
            assert_eq!(setup_id, setup.id);
            assert_eq!(removed, 1);
            assert_eq!(remaining, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(f.registry.list_setups("u1").await.expect("list").len(), 1);
    let left: Vec<_> = f
        .documents
        .list_images(&scope)
        .await
        .expect("list")
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(left.len(), 2);
    assert!(left.contains(&second.id));
    assert!(!f.objects.contains("uploads/b.jpg").await);

    f.registry.delete_setup("u1", setup.id, &true).await.expect("retry");
    assert!(f.registry.list_setups("u1").await.expect("list").is_empty());
    assert!(f.objects.is_empty().await);
}

#[tokio::test]
async fn failing_setup_record_delete_is_partial_with_nothing_remaining() {
    let f = fixture();
    let setup = f.registry.create_setup("u1", "Roots").await.expect("create");
    let scope = SetupScope::new("u1", setup.id);
    add_image(&f, &scope, "a.jpg").await;
    f.documents.faults.fail_always(Operation::DeleteSetup);

    let err = f
        .registry
        .delete_setup("u1", setup.id, &true)
        .await
        .expect_err("partial");
    assert!(matches!(
        err,
        ServiceError::PartialDeletion {
            removed: 1,
            remaining: 0,
            ..
        }
    ));
    assert_eq!(f.registry.list_setups("u1").await.expect("list").len(), 1);
}
