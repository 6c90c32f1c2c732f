//! Core data models for the image repository.
//!
//! Asset and user records are stored as JSON documents in the metadata store
//! and serialize straight back out through `serde`.

pub mod asset;
pub mod envelope;
pub mod user;
pub mod visibility;
