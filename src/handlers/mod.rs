//! HTTP handlers. Each one parses its request, calls into the services and
//! wraps the result in the success envelope; failures become [`crate::errors::AppError`].

pub mod extract;
pub mod health_handlers;
pub mod image_handlers;
pub mod user_handlers;
