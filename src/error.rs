use thiserror::Error;

/// Failures raised while opening or reading the push connection.
///
/// The session classifies these to decide retry eligibility: only
/// `Unauthorized` is ever retried, and at most once per session.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authorization rejected by '{url}' (HTTP 401)")]
    Unauthorized { url: String },
}
