//! The `{ "success": true, ... }` body returned by every successful call.
//! Failures are rendered by [`crate::errors::AppError`].

use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(payload: T) -> Self {
        Self {
            success: true,
            payload,
        }
    }
}

impl Success<Empty> {
    pub fn empty() -> Self {
        Self::new(Empty {})
    }
}

/// Payload of operations that return nothing beyond the success marker.
#[derive(Serialize, Debug)]
pub struct Empty {}

#[derive(Serialize, Debug)]
pub struct Details<T: Serialize> {
    pub details: T,
}

#[derive(Serialize, Debug)]
pub struct Images<T: Serialize> {
    pub images: Vec<T>,
}

#[derive(Serialize, Debug)]
pub struct Users<T: Serialize> {
    pub users: Vec<T>,
}
