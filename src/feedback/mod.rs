pub mod chunks;
pub mod store;

pub use chunks::{split_into_chunks, DEFAULT_CHUNK_SIZE};
pub use store::{
    ActiveSelection, FeedbackDraft, FeedbackEntry, PerStream, Rating, StreamFeedbackSession,
    StreamId,
};
