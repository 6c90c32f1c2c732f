//! Storage clients and the services that coordinate them.

pub mod asset_service;
pub mod blob_store;
pub mod error;
pub mod ids;
pub mod metadata_store;
pub mod staging;
pub mod user_registry;

#[cfg(test)]
pub mod testing;
