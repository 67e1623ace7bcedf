//! src/services/setup_registry.rs
//!
//! `SetupRegistry` lists, creates and deletes a user's setups. Deleting a setup
//! cascades over its images (blob, then record, one at a time) and removes
//! the setup record only once every image is gone.

use crate::backends::DocumentStore;
use crate::errors::{ServiceError, ServiceResult};
use crate::models::{
    scope::SetupScope,
    setup::{Setup, SetupListing},
};
use crate::services::{confirm::Confirm, image_catalog::ImageCatalog};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct SetupRegistry {
    documents: Arc<dyn DocumentStore>,
    images: ImageCatalog,
}

impl SetupRegistry {
    pub fn new(documents: Arc<dyn DocumentStore>, images: ImageCatalog) -> Self {
        Self { documents, images }
    }

    /// Setups of `user_id`, oldest first.
    pub async fn list_setups(&self, user_id: &str) -> ServiceResult<Vec<Setup>> {
        self.documents
            .list_setups(user_id)
            .await
            .map_err(ServiceError::BackendUnavailable)
    }

    /// Like `list_setups`, but an unreachable store yields an empty list
    /// plus the error instead of failing.
    pub async fn load(&self, user_id: &str) -> SetupListing {
        match self.list_setups(user_id).await {
            Ok(setups) => SetupListing {
                setups,
                error: None,
            },
            Err(err) => {
                warn!(user_id, "failed to load setups: {}", err);
                SetupListing {
                    setups: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    pub async fn get_setup(&self, user_id: &str, setup_id: Uuid) -> ServiceResult<Setup> {
        Ok(self.documents.get_setup(user_id, setup_id).await?)
    }

    /// Create a setup named `name`. Duplicate names are allowed.
    #[instrument(skip(self))]
    pub async fn create_setup(&self, user_id: &str, name: &str) -> ServiceResult<Setup> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation(
                "setup name must not be empty".into(),
            ));
        }

        let setup = self
            .documents
            .insert_setup(user_id, name)
            .await
            .inspect_err(|err| warn!("failed to create setup: {}", err))?;
        info!(setup_id = %setup.id, "setup created");
        Ok(setup)
    }

    /// Delete a setup and every image in it, after confirmation.
    ///
    /// If any image cannot be deleted the setup record is kept and
    /// `PartialDeletion` reports how far the cascade got; calling again
    /// resumes with the remaining images.
    #[instrument(skip(self, confirm))]
    pub async fn delete_setup(
        &self,
        user_id: &str,
        setup_id: Uuid,
        confirm: &dyn Confirm,
    ) -> ServiceResult<()> {
        if !confirm.confirm(
            "Are you sure you want to delete this setup? This action cannot be undone.",
        ) {
            return Err(ServiceError::Cancelled(format!("deletion of setup {}", setup_id)));
        }

        self.documents.get_setup(user_id, setup_id).await?;

        let scope = SetupScope::new(user_id, setup_id);
        let images = self.documents.list_images(&scope).await?;
        let total = images.len();

        for (removed, image) in images.iter().enumerate() {
            if let Err(err) = self.images.remove(&scope, image.id).await {
                warn!(
                    image_id = %image.id,
                    removed,
                    total,
                    "setup cascade stopped: {}",
                    err
                );
                return Err(partial(setup_id, removed, total - removed, err));
            }
        }

        if let Err(err) = self.documents.delete_setup(user_id, setup_id).await {
            warn!("setup record delete failed after removing its images: {}", err);
            return Err(ServiceError::PartialDeletion {
                setup_id,
                removed: total,
                remaining: 0,
                source: err,
            });
        }

        info!(images = total, "setup deleted");
        Ok(())
    }
}

/// Fold an image-level failure into the setup-level report.
fn partial(setup_id: Uuid, removed: usize, remaining: usize, err: ServiceError) -> ServiceError {
    use crate::backends::BackendError;

    let source = match err {
        ServiceError::BackendUnavailable(source) | ServiceError::DanglingImage { source, .. } => {
            source
        }
        other => BackendError::Unavailable(other.to_string()),
    };
    ServiceError::PartialDeletion {
        setup_id,
        removed,
        remaining,
        source,
    }
}
