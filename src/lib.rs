//! Client-side session lifecycle for the Larder recipe service.
//!
//! The crate keeps a user authenticated across restarts: it persists an
//! access/refresh token pair, validates it once at startup, rotates the
//! access token when the server rejects it, and degrades to an anonymous
//! session when the refresh token is no longer accepted.
//!
//! [`ApiClient`] wraps outbound requests: it attaches the current access
//! token as a bearer credential and, when a request comes back 401,
//! performs exactly one refresh-and-retry before surfacing the failure.
//!
//! The identity shown to the user comes from a non-verifying decode of the
//! access token payload. It is display information only, never an
//! authorization check - the server re-validates every request.

pub mod api;
pub mod auth;

pub use api::{ApiClient, ApiError};
pub use auth::{
    AuthError, CredentialPair, DecodeError, FileTokenStore, Identity, MemoryTokenStore,
    SessionManager, SessionState, TokenService, TokenStore,
};
