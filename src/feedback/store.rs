use super::chunks::{resolve_chunk_size, split_into_chunks};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one of the two responses under evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamId {
    Stream1,
    Stream2,
}

impl StreamId {
    pub const BOTH: [StreamId; 2] = [StreamId::Stream1, StreamId::Stream2];
}

/// A pair of values, one per evaluated stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerStream<T> {
    pub stream1: T,
    pub stream2: T,
}

impl<T> PerStream<T> {
    pub fn get(&self, id: StreamId) -> &T {
        match id {
            StreamId::Stream1 => &self.stream1,
            StreamId::Stream2 => &self.stream2,
        }
    }

    pub fn get_mut(&mut self, id: StreamId) -> &mut T {
        match id {
            StreamId::Stream1 => &mut self.stream1,
            StreamId::Stream2 => &mut self.stream2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Positive,
    Negative,
}

/// One recorded feedback entry for a chunk. Created only through
/// `record_feedback`, which stamps the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub rating: Option<Rating>,
    pub comment: String,
    pub selected_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied fields for a feedback entry; the store adds the timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackDraft {
    pub rating: Option<Rating>,
    pub comment: String,
    pub selected_text: String,
}

/// The single active text selection. Non-empty text and a concrete
/// stream/chunk scope are guaranteed by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSelection {
    pub text: String,
    pub stream_id: StreamId,
    pub chunk_index: usize,
}

/// Aggregate state for one dual-stream evaluation session.
///
/// Every operation is a synchronous, all-or-nothing state transition;
/// contract violations (out-of-range indices) are guarded no-ops reported
/// through the return value, never panics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFeedbackSession {
    responses: PerStream<String>,
    chunks: PerStream<Vec<String>>,
    feedback: PerStream<Vec<Option<FeedbackEntry>>>,
    current_chunk_indices: PerStream<usize>,
    is_complete: bool,
    is_evaluation_active: bool,
    selection: Option<ActiveSelection>,
}

impl StreamFeedbackSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or restart) an evaluation pass.
    ///
    /// With existing chunks this is a restart: cursors return to the first
    /// segment and feedback arrays are regenerated empty at the current
    /// chunk counts, while responses and chunks are preserved. Without
    /// chunks, all state is cleared. Either way the session becomes active.
    pub fn start_evaluation_session(&mut self) {
        if self.has_chunks() {
            self.current_chunk_indices = PerStream::default();
            self.feedback = PerStream {
                stream1: vec![None; self.chunks.stream1.len()],
                stream2: vec![None; self.chunks.stream2.len()],
            };
            self.selection = None;
        } else {
            *self = Self::default();
        }
        self.is_evaluation_active = true;
    }

    /// Replace the accumulated text for one stream with the full running
    /// text delivered so far. Replace, not append: the ingestion side may
    /// re-deliver the complete text on each update.
    pub fn append_stream_content(&mut self, stream_id: StreamId, text: impl Into<String>) {
        *self.responses.get_mut(stream_id) = text.into();
    }

    /// Mark both streams fully received, rewind the reveal cursors, and cut
    /// chunks at the default segment size.
    pub fn mark_streams_complete(&mut self) {
        self.is_complete = true;
        self.current_chunk_indices = PerStream::default();
        self.create_chunks(resolve_chunk_size());
    }

    /// Partition each stream's response into segments of at most
    /// `chunk_size_chars` characters and reinitialize feedback to match.
    /// Deterministic and idempotent for the same text and size.
    pub fn create_chunks(&mut self, chunk_size_chars: usize) {
        self.chunks = PerStream {
            stream1: split_into_chunks(&self.responses.stream1, chunk_size_chars),
            stream2: split_into_chunks(&self.responses.stream2, chunk_size_chars),
        };
        self.feedback = PerStream {
            stream1: vec![None; self.chunks.stream1.len()],
            stream2: vec![None; self.chunks.stream2.len()],
        };
        for id in StreamId::BOTH {
            let max = self.max_cursor(id);
            let cursor = self.current_chunk_indices.get_mut(id);
            *cursor = (*cursor).min(max);
        }
    }

    /// Record feedback for one chunk, overwriting any prior entry there and
    /// clearing the active selection. Returns false (and changes nothing)
    /// when the chunk index is out of range.
    pub fn record_feedback(
        &mut self,
        stream_id: StreamId,
        chunk_index: usize,
        draft: FeedbackDraft,
    ) -> bool {
        let entries = self.feedback.get_mut(stream_id);
        let Some(slot) = entries.get_mut(chunk_index) else {
            return false;
        };
        *slot = Some(FeedbackEntry {
            rating: draft.rating,
            comment: draft.comment,
            selected_text: draft.selected_text,
            timestamp: Utc::now(),
        });
        self.selection = None;
        true
    }

    /// Reveal the next segment of one stream. Clamped at the last segment;
    /// clears the selection when it is scoped to this stream. No operation
    /// ever moves a cursor backwards.
    pub fn advance_cursor(&mut self, stream_id: StreamId) {
        let max = self.max_cursor(stream_id);
        let cursor = self.current_chunk_indices.get_mut(stream_id);
        *cursor = (*cursor + 1).min(max);
        if self
            .selection
            .as_ref()
            .is_some_and(|selection| selection.stream_id == stream_id)
        {
            self.selection = None;
        }
    }

    /// Reveal the next segment of both streams in one observable step.
    pub fn advance_both_cursors(&mut self) {
        for id in StreamId::BOTH {
            let max = self.max_cursor(id);
            let cursor = self.current_chunk_indices.get_mut(id);
            *cursor = (*cursor + 1).min(max);
        }
        self.selection = None;
    }

    /// Set the single active selection slot. Empty text clears it instead.
    pub fn set_selection(
        &mut self,
        text: impl Into<String>,
        stream_id: StreamId,
        chunk_index: usize,
    ) {
        let text = text.into();
        if text.is_empty() {
            self.selection = None;
            return;
        }
        self.selection = Some(ActiveSelection {
            text,
            stream_id,
            chunk_index,
        });
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Discard everything and return to the all-empty default state.
    pub fn reset_session(&mut self) {
        *self = Self::default();
    }

    /// Re-run an evaluation pass over already-chunked content: feedback is
    /// regenerated empty and cursors rewind, while responses, chunks, and
    /// the completion/active flags are kept as they are.
    pub fn reset_feedback_only(&mut self) {
        self.feedback = PerStream {
            stream1: vec![None; self.chunks.stream1.len()],
            stream2: vec![None; self.chunks.stream2.len()],
        };
        self.current_chunk_indices = PerStream::default();
        self.selection = None;
    }

    pub fn response(&self, stream_id: StreamId) -> &str {
        self.responses.get(stream_id)
    }

    pub fn chunks(&self, stream_id: StreamId) -> &[String] {
        self.chunks.get(stream_id)
    }

    pub fn chunk_count(&self, stream_id: StreamId) -> usize {
        self.chunks.get(stream_id).len()
    }

    /// Feedback recorded at one chunk index; out-of-range reads are `None`.
    pub fn feedback_at(&self, stream_id: StreamId, chunk_index: usize) -> Option<&FeedbackEntry> {
        self.feedback
            .get(stream_id)
            .get(chunk_index)
            .and_then(Option::as_ref)
    }

    pub fn feedback_len(&self, stream_id: StreamId) -> usize {
        self.feedback.get(stream_id).len()
    }

    pub fn current_chunk_index(&self, stream_id: StreamId) -> usize {
        *self.current_chunk_indices.get(stream_id)
    }

    /// The chunk currently revealed for one stream, if any chunks exist.
    pub fn current_chunk(&self, stream_id: StreamId) -> Option<&str> {
        self.chunks
            .get(stream_id)
            .get(self.current_chunk_index(stream_id))
            .map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_evaluation_active(&self) -> bool {
        self.is_evaluation_active
    }

    pub fn selection(&self) -> Option<&ActiveSelection> {
        self.selection.as_ref()
    }

    /// True when chunks no longer concatenate back to the stored responses,
    /// i.e. a response was replaced after chunking. A restart preserves
    /// chunks by contract, so callers should check this to surface
    /// staleness instead of silently re-chunking.
    pub fn has_stale_chunks(&self) -> bool {
        StreamId::BOTH.into_iter().any(|id| {
            let joined: String = self.chunks.get(id).concat();
            joined != *self.responses.get(id)
        })
    }

    fn has_chunks(&self) -> bool {
        !self.chunks.stream1.is_empty() || !self.chunks.stream2.is_empty()
    }

    fn max_cursor(&self, stream_id: StreamId) -> usize {
        self.chunks.get(stream_id).len().saturating_sub(1)
    }
}
