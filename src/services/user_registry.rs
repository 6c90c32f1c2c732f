//! User registration and lookup.
//!
//! Usernames are unique case-insensitively. Uniqueness is enforced by
//! claiming `usernames/{lowercased}` with an insert-if-absent write before
//! the user record is created, so two concurrent registrations of the same
//! name cannot both succeed.

use super::{
    asset_service::AssetService,
    error::{ServiceError, ServiceResult, StoreError},
    ids::generate_id,
    metadata_store::{self, MetadataStore},
};
use crate::models::user::{
    USER_NAMESPACE, User, UserDetails, UsernameClaim, record_path, username_path,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Attempts at finding an unused user id before giving up.
const ID_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct UserRegistry {
    meta: Arc<dyn MetadataStore>,
    assets: AssetService,
}

impl UserRegistry {
    pub fn new(meta: Arc<dyn MetadataStore>, assets: AssetService) -> Self {
        Self { meta, assets }
    }

    /// Register `username`, failing if it is empty or already taken in any case.
    #[instrument(skip(self))]
    pub async fn create_user(&self, username: Option<&str>) -> ServiceResult<User> {
        let username = match username {
            Some(name) if !name.is_empty() => name,
            _ => {
                return Err(ServiceError::Validation(
                    "Please provide a username for the new user!".into(),
                ));
            }
        };

        let index_path = username_path(username);
        let mut id = generate_id();
        let claim = serde_json::to_value(UsernameClaim { user_id: id.clone() })
            .map_err(StoreError::from)?;
        if !self.meta.create(&index_path, claim).await? {
            return Err(ServiceError::Conflict(format!(
                "User with username \"{username}\" already exists!"
            )));
        }

        match self.insert_user(&mut id, username, &index_path).await {
            Ok(user) => {
                info!(id = %user.id, username = %user.username, "registered user");
                Ok(user)
            }
            Err(err) => {
                if let Err(release) = self.meta.delete(&index_path).await {
                    warn!(username, "failed to release username claim: {}", release);
                }
                Err(err)
            }
        }
    }

    /// Write the user record under a free id, re-pointing the username claim
    /// whenever the id has to be regenerated.
    async fn insert_user(
        &self,
        id: &mut String,
        username: &str,
        index_path: &str,
    ) -> ServiceResult<User> {
        for attempt in 0..ID_ATTEMPTS {
            let user = User {
                id: id.clone(),
                username: username.to_string(),
            };
            let record = serde_json::to_value(&user).map_err(StoreError::from)?;
            if self.meta.create(&record_path(id), record).await? {
                return Ok(user);
            }

            warn!(id = %id, attempt, "user id already taken, regenerating");
            *id = generate_id();
            let claim = serde_json::to_value(UsernameClaim { user_id: id.clone() })
                .map_err(StoreError::from)?;
            self.meta.set(index_path, claim).await?;
        }
        Err(ServiceError::Conflict(
            "Could not allocate an id for the new user.".into(),
        ))
    }

    /// Claim the username index for user records that predate it.
    ///
    /// Returns how many claims were written. When two stored users share a
    /// username case-insensitively, the first in key order keeps the claim.
    #[instrument(skip(self))]
    pub async fn backfill_username_claims(&self) -> ServiceResult<usize> {
        let mut written = 0;
        for user in self.list_users().await? {
            if user.username.is_empty() {
                continue;
            }
            let index_path = username_path(&user.username);
            let claim = serde_json::to_value(UsernameClaim {
                user_id: user.id.clone(),
            })
            .map_err(StoreError::from)?;
            if self.meta.create(&index_path, claim).await? {
                written += 1;
                continue;
            }

            let holder = metadata_store::fetch::<UsernameClaim>(&*self.meta, &index_path).await?;
            if let Some(holder) = holder.filter(|holder| holder.user_id != user.id) {
                warn!(
                    id = %user.id,
                    username = %user.username,
                    holder = %holder.user_id,
                    "username already claimed by another user"
                );
            }
        }
        if written > 0 {
            info!(written, "backfilled username claims");
        }
        Ok(written)
    }

    /// All users, verbatim.
    pub async fn list_users(&self) -> ServiceResult<Vec<User>> {
        Ok(metadata_store::fetch_all::<User>(&*self.meta, USER_NAMESPACE).await?)
    }

    /// Resolve a user or fail with a not-found error.
    pub async fn require_user(&self, id: &str) -> ServiceResult<User> {
        metadata_store::fetch::<User>(&*self.meta, &record_path(id))
            .await?
            .ok_or_else(|| ServiceError::user_not_found(id))
    }

    /// A user plus every public image they own, recomputed on each call.
    pub async fn get_user(&self, id: &str) -> ServiceResult<UserDetails> {
        let user = self.require_user(id).await?;
        let images = self.assets.list_owned_by(&user.id).await?;
        Ok(UserDetails::new(user, images))
    }
}
