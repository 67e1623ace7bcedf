//! Shared application state handed to every handler.

use crate::backends::{DocumentStore, IdentityProvider, ObjectStore};
use crate::services::{
    image_catalog::ImageCatalog, setup_registry::SetupRegistry, upload_pipeline::UploadPipeline,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub setups: SetupRegistry,
    pub images: ImageCatalog,
    pub uploads: Arc<UploadPipeline>,
}

impl AppState {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
        max_image_bytes: u64,
    ) -> Self {
        let images = ImageCatalog::new(documents.clone(), objects.clone());
        Self {
            setups: SetupRegistry::new(documents.clone(), images.clone()),
            uploads: Arc::new(UploadPipeline::new(
                documents.clone(),
                objects.clone(),
                max_image_bytes,
            )),
            images,
            identity,
            documents,
            objects,
        }
    }
}
