//! Registered users and the derived view that lists their images.

use super::asset::AssetView;
use serde::{Deserialize, Serialize};

pub const USER_NAMESPACE: &str = "users";

/// Index of lowercased usernames, one record per claimed name.
pub const USERNAME_NAMESPACE: &str = "usernames";

pub fn record_path(id: &str) -> String {
    format!("{USER_NAMESPACE}/{id}")
}

/// Index path for a username. Usernames are compared case-insensitively.
pub fn username_path(username: &str) -> String {
    format!("{USERNAME_NAMESPACE}/{}", username.to_lowercase())
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// Body of a username index record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UsernameClaim {
    pub user_id: String,
}

/// A user together with the public images they own.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct UserDetails {
    pub id: String,
    pub username: String,
    pub images: Vec<AssetView>,
}

impl UserDetails {
    pub fn new(user: User, images: Vec<AssetView>) -> Self {
        Self {
            id: user.id,
            username: user.username,
            images,
        }
    }
}
