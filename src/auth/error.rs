use thiserror::Error;

/// Failure to decode the informational payload of an access token.
///
/// Callers treat any decode failure the same as "no identity available";
/// it never invalidates the session itself.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("token has no payload segment")]
    MissingPayload,

    #[error("payload segment is not valid base64url: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("payload is not a valid claims object: {0}")]
    InvalidClaims(#[from] serde_json::Error),
}

/// Logic errors in session API usage.
#[derive(Error, Debug)]
pub enum AuthError {
    /// A refreshed access token was applied with no active session.
    /// The refresh path must only run after a successful login, so this
    /// indicates a bug in the integration rather than a runtime condition.
    #[error("no active session: {0}")]
    InvalidState(&'static str),
}
