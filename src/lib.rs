//! Core for a side-by-side chat evaluation workflow: a streaming-ingestion
//! client that consumes a long-lived server-push chat response, and a
//! dual-stream feedback store that reveals completed responses one segment
//! at a time while collecting per-segment feedback.

pub mod api;
pub mod config;
pub mod conversations;
pub mod credentials;
pub mod error;
pub mod feedback;
pub mod session;
pub mod types;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::ApiClient;
pub use config::Config;
pub use error::StreamError;
pub use feedback::store::StreamFeedbackSession;
pub use session::{SessionOutcome, SessionState, SessionUpdate, StreamSession};
pub use types::{ChatStreamRequest, FinishReason, StreamEvent};
