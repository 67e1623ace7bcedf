//! Application services: the logic between the HTTP layer and the backends.

pub mod confirm;
pub mod image_catalog;
pub mod image_sync;
pub mod setup_registry;
pub mod upload_pipeline;
