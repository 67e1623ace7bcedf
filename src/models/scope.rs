//! Explicit user/setup context and the document collection layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Collection holding a user's setups: `images/<user_id>/setups`.
pub fn setups_collection(user_id: &str) -> String {
    format!("images/{}/setups", user_id)
}

/// The (user, setup) pair every image operation runs against.
///
/// Passed explicitly to each operation instead of living in process-wide
/// "current user" / "current setup" state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SetupScope {
    pub user_id: String,
    pub setup_id: Uuid,
}

impl SetupScope {
    pub fn new(user_id: impl Into<String>, setup_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            setup_id,
        }
    }

    /// Collection holding this setup's images:
    /// `images/<user_id>/setups/<setup_id>/images`.
    pub fn images_collection(&self) -> String {
        format!("{}/{}/images", setups_collection(&self.user_id), self.setup_id)
    }
}

impl fmt::Display for SetupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.setup_id)
    }
}
