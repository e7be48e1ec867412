//! REST client for the inventory backend

mod client;
mod error;
mod models;
mod traits;

pub use client::ApiClient;
pub use error::{ApiError, FieldError, ServerError, GENERIC_MESSAGE};
pub use models::{ImportOperation, ImportResponse};
pub use traits::RecordApi;
