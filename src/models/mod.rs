//! Core data models for the image log.
//!
//! Users own setups, setups own images. The structs here are the values that
//! flow between the backends, the services and the HTTP layer, and they
//! serialize naturally as JSON via `serde`.

pub mod image;
pub mod scope;
pub mod session;
pub mod setup;
pub mod upload;
