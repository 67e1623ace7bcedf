//! Represents an uploaded image and the display parameters attached to it.

use crate::errors::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Crop offsets in percent of the free space on each axis.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Crop {
    pub x: f64,
    pub y: f64,
}

impl Crop {
    /// Replace non-finite coordinates with 0.
    pub fn sanitized(self) -> Self {
        fn finite_or_zero(value: f64) -> f64 {
            if value.is_finite() { value } else { 0.0 }
        }
        Self {
            x: finite_or_zero(self.x),
            y: finite_or_zero(self.y),
        }
    }
}

/// Default zoom factor for freshly uploaded images.
pub const DEFAULT_ZOOM: f64 = 1.0;

fn default_zoom() -> f64 {
    DEFAULT_ZOOM
}

/// Metadata describing one uploaded photo.
///
/// The payload itself lives in the object store at the location encoded in
/// `url`; this record lives in the setup's image collection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageRecord {
    /// Unique identifier of the image record.
    pub id: Uuid,

    /// Download URL of the stored blob.
    pub url: String,

    /// Capture/upload time shown to the user. Editable.
    pub uploaded_at: DateTime<Utc>,

    /// Crop offsets, `{0, 0}` until edited.
    #[serde(default)]
    pub crop: Crop,

    /// Multiplicative zoom factor, 1 until edited.
    #[serde(default = "default_zoom")]
    pub zoom: f64,
}

impl ImageRecord {
    /// Copy of this record with the editable fields replaced.
    pub fn with_fields(&self, fields: &ImageFields) -> Self {
        Self {
            crop: fields.crop,
            zoom: fields.zoom,
            uploaded_at: fields.uploaded_at,
            ..self.clone()
        }
    }
}

/// A record about to be written by the upload pipeline.
#[derive(Clone, Debug)]
pub struct NewImage {
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Validated, complete set of editable fields. Always written as a whole.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct ImageFields {
    pub crop: Crop,
    pub zoom: f64,
    pub uploaded_at: DateTime<Utc>,
}

/// Raw edit request as it arrives from the editor.
///
/// `timestamp` is epoch milliseconds, the unit the editor's date picker
/// produces.
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct ImageEdit {
    #[serde(default)]
    pub crop: Crop,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    pub timestamp: f64,
}

impl ImageEdit {
    /// Validate the edit before anything touches the network.
    ///
    /// Invalid instants and unusable zoom factors are rejected; non-finite
    /// crop coordinates fall back to 0.
    pub fn validate(&self) -> Result<ImageFields, ServiceError> {
        if !self.timestamp.is_finite() {
            return Err(ServiceError::Validation(
                "timestamp must be a valid date and time".into(),
            ));
        }
        let uploaded_at = DateTime::<Utc>::from_timestamp_millis(self.timestamp.trunc() as i64)
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "timestamp {} is outside the supported range",
                    self.timestamp
                ))
            })?;

        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(ServiceError::Validation(
                "zoom must be a positive number".into(),
            ));
        }

        Ok(ImageFields {
            crop: self.crop.sanitized(),
            zoom: self.zoom,
            uploaded_at,
        })
    }
}

/// Presentation order of a setup's images by timestamp.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

/// Stable sort by `uploaded_at`; ties keep their incoming order.
pub fn sort_images(images: &mut [ImageRecord], order: SortOrder) {
    match order {
        SortOrder::Ascending => images.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at)),
        SortOrder::Descending => images.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at)),
    }
}
