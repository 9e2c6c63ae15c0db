//! HTTP client module for the Larder REST API.
//!
//! This module provides the `ApiClient` for talking to the Larder backend.
//! The API uses JWT bearer token authentication; the client attaches the
//! session's current access token to every request and transparently
//! performs one refresh-and-retry when a request comes back 401.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
