//! Represents a setup, a named grouping of images owned by one user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named experiment setup.
///
/// Setups live under the owning user's namespace
/// (`images/<user_id>/setups`). Names are not unique.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Setup {
    /// Unique identifier of this setup.
    pub id: Uuid,

    /// Display name chosen by the user.
    pub name: String,

    /// When this setup was created. Listings are ordered by this field.
    pub created_at: DateTime<Utc>,
}

/// Setups for a user together with the error that prevented loading them.
///
/// Used by callers that render a list and must not fail as a whole when
/// the document store is unreachable.
#[derive(Serialize, Clone, Debug, Default)]
pub struct SetupListing {
    pub setups: Vec<Setup>,
    pub error: Option<String>,
}
