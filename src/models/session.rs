//! Represents the signed-in user as handed out by the identity provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated user.
///
/// The image log never mutates users; it only reads the id to scope
/// collections and the optional names for display.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionUser {
    /// Opaque identifier issued by the identity provider.
    pub id: String,

    /// Human readable name, if the provider knows one.
    pub display_name: Option<String>,

    /// Email address the user signed in with.
    pub email: Option<String>,
}

impl SessionUser {
    /// Name used when greeting the user: display name, then email, then id.
    pub fn greeting(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Credential presented to `IdentityProvider::sign_up` and `sign_in`.
#[derive(Deserialize, Clone)]
pub struct Credential {
    pub email: String,
    pub password: String,
    /// Only read on sign-up.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Result of a successful sign-in.
#[derive(Serialize, Clone, Debug)]
pub struct SignedIn {
    /// Bearer token identifying this session.
    pub token: String,
    pub user: SessionUser,
}

/// Session lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(SessionUser),
    SignedOut(SessionUser),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(display_name: Option<&str>, email: Option<&str>) -> SessionUser {
        SessionUser {
            id: "uid-1".into(),
            display_name: display_name.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn greeting_prefers_display_name_then_email() {
        assert_eq!(user(Some("Ada"), Some("ada@lab.org")).greeting(), "Ada");
        assert_eq!(user(Some(""), Some("ada@lab.org")).greeting(), "ada@lab.org");
        assert_eq!(user(None, None).greeting(), "uid-1");
    }
}
