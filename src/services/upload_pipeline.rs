//! src/services/upload_pipeline.rs
//!
//! `UploadPipeline` filters picked files and uploads the survivors one by
//! one, blob first, then the image record. There is no batch atomicity; a
//! failure stops the batch and leaves earlier files committed.

use crate::backends::{DocumentStore, ObjectStore};
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{
    image::{ImageRecord, NewImage},
    scope::SetupScope,
    session::SessionUser,
    upload::{CandidateFile, UploadReport, UploadState},
};
use chrono::Utc;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default per-file size limit: 5 MiB.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Longest client file name kept in a storage key. With the `<uuid>_`
/// prefix the final path component stays under 255 bytes.
const MAX_STORED_NAME_BYTES: usize = 200;

pub struct UploadPipeline {
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
    max_image_bytes: u64,
    /// Users with an upload currently running.
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl UploadPipeline {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        max_image_bytes: u64,
    ) -> Self {
        Self {
            documents,
            objects,
            max_image_bytes,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn max_image_bytes(&self) -> u64 {
        self.max_image_bytes
    }

    /// Keep images within the size limit, preserving order.
    pub fn validate(&self, candidates: Vec<CandidateFile>) -> Vec<CandidateFile> {
        candidates
            .into_iter()
            .filter(|file| {
                let keep = file.is_image() && file.size_bytes() <= self.max_image_bytes;
                if !keep {
                    debug!(
                        name = %file.name,
                        media_type = %file.media_type,
                        size = file.size_bytes(),
                        "rejecting upload candidate"
                    );
                }
                keep
            })
            .collect()
    }

    pub fn state(&self, user_id: &str) -> UploadState {
        if lock(&self.in_flight).contains(user_id) {
            UploadState::Uploading
        } else {
            UploadState::Idle
        }
    }

    /// Upload already validated files into the selected setup.
    ///
    /// The setup must exist for the session's user. Files go one at a time
    /// in the given order. The first failure aborts the remaining files;
    /// files already uploaded stay.
    #[instrument(skip(self, session, accepted), fields(user_id = %session.id, files = accepted.len()))]
    pub async fn upload(
        &self,
        session: &SessionUser,
        setup_id: Option<Uuid>,
        accepted: Vec<CandidateFile>,
    ) -> ServiceResult<Vec<ImageRecord>> {
        let setup_id = setup_id.ok_or(ServiceError::NoSetupSelected)?;
        self.documents.get_setup(&session.id, setup_id).await?;
        let _guard = UploadGuard::acquire(&self.in_flight, &session.id)?;
        let scope = SetupScope::new(session.id.as_str(), setup_id);

        let mut uploaded = Vec::with_capacity(accepted.len());
        for file in accepted {
            let record = self.upload_one(&scope, file).await.inspect_err(|err| {
                warn!(
                    committed = uploaded.len(),
                    "upload aborted: {}", err
                )
            })?;
            uploaded.push(record);
        }

        info!(count = uploaded.len(), "upload finished");
        Ok(uploaded)
    }

    /// Validate then upload, rejecting a batch with nothing left to send.
    pub async fn submit(
        &self,
        session: &SessionUser,
        setup_id: Option<Uuid>,
        candidates: Vec<CandidateFile>,
    ) -> ServiceResult<UploadReport> {
        let setup_id = setup_id.ok_or(ServiceError::NoSetupSelected)?;

        let offered = candidates.len();
        let accepted = self.validate(candidates);
        if accepted.is_empty() {
            return Err(ServiceError::Validation("no valid files to upload".into()));
        }
        let rejected = offered - accepted.len();

        let uploaded = self.upload(session, Some(setup_id), accepted).await?;
        Ok(UploadReport { uploaded, rejected })
    }

    async fn upload_one(&self, scope: &SetupScope, file: CandidateFile) -> ServiceResult<ImageRecord> {
        let path = format!("uploads/{}_{}", Uuid::new_v4(), storage_file_name(&file.name));

        let handle = self
            .objects
            .put(&path, Some(&file.media_type), file.bytes)
            .await
            .map_err(ServiceError::BackendUnavailable)?;
        let url = self
            .objects
            .url(&handle)
            .await
            .map_err(ServiceError::BackendUnavailable)?;

        let record = self
            .documents
            .insert_image(
                scope,
                NewImage {
                    url,
                    uploaded_at: Utc::now(),
                },
            )
            .await
            .map_err(ServiceError::BackendUnavailable)?;
        debug!(%path, image_id = %record.id, "image uploaded");
        Ok(record)
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a user as uploading until dropped.
struct UploadGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl UploadGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, user_id: &str) -> ServiceResult<Self> {
        if !lock(in_flight).insert(user_id.to_string()) {
            return Err(ServiceError::UploadInProgress);
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            user_id: user_id.to_string(),
        })
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.user_id);
    }
}

/// Final path component of a client-supplied name, safe to embed in a key.
///
/// Control characters and runs of dots become `_`, and long names are cut
/// to `MAX_STORED_NAME_BYTES`, keeping a short extension when there is one.
fn storage_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    if matches!(cleaned.as_str(), "" | "." | "..") {
        return "upload".to_string();
    }

    let mut stored = if cleaned.len() <= MAX_STORED_NAME_BYTES {
        cleaned
    } else {
        let (stem, ext) = match cleaned.rfind('.') {
            Some(dot) if cleaned.len() - dot <= 16 => cleaned.split_at(dot),
            _ => (cleaned.as_str(), ""),
        };
        let stem = truncate_on_char_boundary(stem, MAX_STORED_NAME_BYTES - ext.len());
        format!("{}{}", stem, ext)
    };
    while stored.contains("..") {
        stored = stored.replace("..", "_");
    }
    stored
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    let end = s
        .char_indices()
        .map(|(start, c)| start + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::{MemoryDocumentStore, MemoryObjectStore, Operation};

    struct Fixture {
        documents: Arc<MemoryDocumentStore>,
        objects: Arc<MemoryObjectStore>,
        pipeline: UploadPipeline,
        user: SessionUser,
        setup_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new());
        let objects = Arc::new(MemoryObjectStore::new("http://localhost:3000"));
        let pipeline = UploadPipeline::new(documents.clone(), objects.clone(), DEFAULT_MAX_IMAGE_BYTES);
        let user = SessionUser {
            id: "u1".into(),
            display_name: None,
            email: None,
        };
        let setup_id = documents.insert_setup("u1", "Roots").await.expect("setup").id;
        Fixture {
            documents,
            objects,
            pipeline,
            user,
            setup_id,
        }
    }

    fn png(name: &str) -> CandidateFile {
        CandidateFile::new(name, "image/png", vec![0u8; 16])
    }

    #[test]
    fn storage_file_name_keeps_last_component() {
        assert_eq!(storage_file_name("a.png"), "a.png");
        assert_eq!(storage_file_name("../../etc/passwd"), "passwd");
        assert_eq!(storage_file_name("C:\\photos\\root 1.jpg"), "root 1.jpg");
        assert_eq!(storage_file_name("dir/"), "upload");
        assert_eq!(storage_file_name(".."), "upload");
    }

    #[test]
    fn storage_file_name_removes_dot_runs_and_caps_length() {
        assert_eq!(storage_file_name("root..day1.png"), "root_day1.png");
        assert_eq!(storage_file_name("a...b.png"), "a_.b.png");

        let long = format!("{}.png", "ä".repeat(150));
        let stored = storage_file_name(&long);
        assert!(stored.len() <= MAX_STORED_NAME_BYTES);
        assert!(stored.ends_with(".png"));
        assert!(stored.starts_with("ää"));

        let no_ext = "x".repeat(300);
        assert_eq!(storage_file_name(&no_ext).len(), MAX_STORED_NAME_BYTES);
    }

    #[tokio::test]
    async fn validate_filters_by_type_and_size_in_order() {
        let f = fixture().await;
        let limit = DEFAULT_MAX_IMAGE_BYTES as usize;
        let accepted = f.pipeline.validate(vec![
            png("a.png"),
            CandidateFile::new("notes.txt", "text/plain", vec![0u8; 4]),
            CandidateFile::new("big.jpg", "image/jpeg", vec![0u8; limit + 1]),
            CandidateFile::new("edge.jpg", "image/jpeg", vec![0u8; limit]),
        ]);
        let names: Vec<_> = accepted.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a.png", "edge.jpg"]);
    }

    #[tokio::test]
    async fn upload_without_setup_is_rejected() {
        let f = fixture().await;
        let err = f
            .pipeline
            .upload(&f.user, None, vec![png("a.png")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::NoSetupSelected));
        assert!(f.objects.is_empty().await);
    }

    #[tokio::test]
    async fn upload_into_unknown_setup_writes_nothing() {
        let f = fixture().await;
        let missing = Uuid::new_v4();
        let err = f
            .pipeline
            .upload(&f.user, Some(missing), vec![png("a.png")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(f.objects.is_empty().await);
        let scope = SetupScope::new("u1", missing);
        assert!(f.documents.list_images(&scope).await.expect("list").is_empty());

        let other = SessionUser {
            id: "u2".into(),
            display_name: None,
            email: None,
        };
        let err = f
            .pipeline
            .upload(&other, Some(f.setup_id), vec![png("a.png")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(f.objects.is_empty().await);
    }

    #[tokio::test]
    async fn upload_writes_blob_then_record_per_file() {
        let f = fixture().await;
        let records = f
            .pipeline
            .upload(&f.user, Some(f.setup_id), vec![png("a.png"), png("b.png")])
            .await
            .expect("upload");
        assert_eq!(records.len(), 2);
        assert_eq!(f.objects.len().await, 2);

        let path = f.objects.path_from_url(&records[0].url).expect("path");
        assert!(path.starts_with("uploads/"));
        assert!(path.ends_with("_a.png"));
        assert_eq!(f.pipeline.state("u1"), UploadState::Idle);
    }

    #[tokio::test]
    async fn first_failure_aborts_remaining_files() {
        let f = fixture().await;
        f.documents.faults.fail_after(Operation::InsertImage, 1);

        let err = f
            .pipeline
            .upload(
                &f.user,
                Some(f.setup_id),
                vec![png("a.png"), png("b.png"), png("c.png")],
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::BackendUnavailable(_)));

        let scope = SetupScope::new("u1", f.setup_id);
        assert_eq!(f.documents.list_images(&scope).await.expect("list").len(), 1);
        // The second blob was written before its record failed.
        assert_eq!(f.objects.len().await, 2);
        assert_eq!(f.pipeline.state("u1"), UploadState::Idle);
    }

    #[tokio::test]
    async fn concurrent_upload_for_same_user_is_rejected() {
        let f = fixture().await;
        let _held = UploadGuard::acquire(&f.pipeline.in_flight, "u1").expect("guard");
        assert_eq!(f.pipeline.state("u1"), UploadState::Uploading);

        let err = f
            .pipeline
            .upload(&f.user, Some(f.setup_id), vec![png("a.png")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::UploadInProgress));
        assert_eq!(f.pipeline.state("u2"), UploadState::Idle);
    }

    #[tokio::test]
    async fn submit_reports_rejected_and_refuses_empty_batches() {
        let f = fixture().await;
        let report = f
            .pipeline
            .submit(
                &f.user,
                Some(f.setup_id),
                vec![png("a.png"), CandidateFile::new("x.txt", "text/plain", vec![1u8])],
            )
            .await
            .expect("submit");
        assert_eq!(report.uploaded.len(), 1);
        assert_eq!(report.rejected, 1);

        let err = f
            .pipeline
            .submit(
                &f.user,
                Some(f.setup_id),
                vec![CandidateFile::new("x.txt", "text/plain", vec![1u8])],
            )
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = f
            .pipeline
            .submit(&f.user, Some(Uuid::new_v4()), vec![png("a.png")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
