use crate::services::{
    asset_service::AssetService, staging::Stager, user_registry::UserRegistry,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub assets: AssetService,
    pub users: UserRegistry,
    pub stager: Stager,
}
