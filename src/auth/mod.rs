//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `TokenStore`: swappable persistence for the single credential pair
//! - `claims`: non-verifying identity decode of the access token payload
//! - `SessionManager`: session state machine with startup validation,
//!   login, logout, and refresh handling
//!
//! The credential pair is persisted as one JSON document; the file-backed
//! store lives under the platform data directory by default.

pub mod claims;
pub mod error;
pub mod session;
pub mod store;

pub use claims::Identity;
pub use error::{AuthError, DecodeError};
pub use session::{SessionManager, SessionState, TokenService};
pub use store::{CredentialPair, FileTokenStore, MemoryTokenStore, TokenStore};
