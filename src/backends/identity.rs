//! Local identity provider.
//!
//! Stands in for the managed identity service: accounts are created with an
//! email and password, passwords are kept only as Argon2 hashes, and every
//! sign-in hands out an opaque bearer token.

use crate::backends::{BackendError, BackendResult, IdentityProvider};
use crate::models::session::{Credential, SessionEvent, SessionUser, SignedIn};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use std::collections::{HashMap, hash_map::Entry};
use tokio::{
    sync::{RwLock, broadcast},
    task,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Shortest password accepted on sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

const INVALID_CREDENTIALS: &str = "invalid email or password";

struct Account {
    user: SessionUser,
    /// PHC string produced by Argon2.
    password_hash: String,
}

#[derive(Default)]
struct Registry {
    /// email -> account
    accounts: HashMap<String, Account>,
    /// token -> account
    sessions: HashMap<String, SessionUser>,
}

pub struct LocalIdentity {
    registry: RwLock<Registry>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry: RwLock::new(Registry::default()),
            events,
        }
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open_session(&self, user: SessionUser) -> SignedIn {
        let token = Uuid::new_v4().simple().to_string();
        self.registry
            .write()
            .await
            .sessions
            .insert(token.clone(), user.clone());

        info!(user_id = %user.id, "signed in");
        let _ = self.events.send(SessionEvent::SignedIn(user.clone()));
        SignedIn { token, user }
    }
}

fn normalized_email(raw: &str) -> BackendResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(BackendError::Rejected(format!(
            "`{}` is not an email address",
            raw
        )));
    }
    Ok(email)
}

async fn hash_password(password: String) -> BackendResult<String> {
    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|err| BackendError::Unavailable(format!("password hashing worker failed: {}", err)))?
    .map_err(|err| BackendError::Unavailable(format!("password hashing failed: {}", err)))
}

async fn verify_password(password: String, hash: String) -> BackendResult<bool> {
    task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .map_err(|err| BackendError::Unavailable(format!("password verification worker failed: {}", err)))
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_up(&self, credential: Credential) -> BackendResult<SignedIn> {
        let email = normalized_email(&credential.email)?;
        if credential.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Rejected(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if self.registry.read().await.accounts.contains_key(&email) {
            return Err(BackendError::Rejected("an account with this email already exists".into()));
        }

        let password_hash = hash_password(credential.password).await?;
        let user = SessionUser {
            id: Uuid::new_v4().simple().to_string(),
            display_name: credential
                .display_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            email: Some(email.clone()),
        };

        match self.registry.write().await.accounts.entry(email) {
            Entry::Occupied(_) => {
                return Err(BackendError::Rejected(
                    "an account with this email already exists".into(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(Account {
                    user: user.clone(),
                    password_hash,
                });
            }
        }

        info!(user_id = %user.id, "account created");
        Ok(self.open_session(user).await)
    }

    async fn sign_in(&self, credential: Credential) -> BackendResult<SignedIn> {
        let email = normalized_email(&credential.email)?;
        let account = self
            .registry
            .read()
            .await
            .accounts
            .get(&email)
            .map(|account| (account.user.clone(), account.password_hash.clone()));
        let Some((user, password_hash)) = account else {
            warn!("sign-in for unknown account");
            return Err(BackendError::Rejected(INVALID_CREDENTIALS.into()));
        };

        if !verify_password(credential.password, password_hash).await? {
            warn!(user_id = %user.id, "sign-in with wrong password");
            return Err(BackendError::Rejected(INVALID_CREDENTIALS.into()));
        }
        Ok(self.open_session(user).await)
    }

    async fn sign_out(&self, token: &str) -> BackendResult<()> {
        let user = self
            .registry
            .write()
            .await
            .sessions
            .remove(token)
            .ok_or_else(|| BackendError::NotFound("session".into()))?;

        info!(user_id = %user.id, "signed out");
        let _ = self.events.send(SessionEvent::SignedOut(user));
        Ok(())
    }

    async fn resolve(&self, token: &str) -> Option<SessionUser> {
        self.registry.read().await.sessions.get(token).cloned()
    }

    fn on_session_change(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
