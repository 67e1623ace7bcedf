pub mod blob_handlers;
pub mod health_handlers;
pub mod image_handlers;
pub mod session_handlers;
pub mod setup_handlers;
