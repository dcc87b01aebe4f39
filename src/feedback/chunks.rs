/// Default segment length, in characters, for the reveal workflow.
pub const DEFAULT_CHUNK_SIZE: usize = 800;

const CHUNK_SIZE_ENV: &str = "DUET_CHUNK_SIZE";

/// Segment size used by `mark_streams_complete`, with an env override
/// clamped to a workable range.
pub fn resolve_chunk_size() -> usize {
    if let Some(value) = std::env::var(CHUNK_SIZE_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        return value.clamp(1, 100_000);
    }
    DEFAULT_CHUNK_SIZE
}

/// Deterministically split `text` into contiguous segments of at most
/// `chunk_size` characters. The final segment may be shorter; empty text
/// yields no segments. Concatenating the result in order reproduces the
/// input exactly.
///
/// Boundaries are counted in characters, not bytes, so multibyte text is
/// never split inside a code point.
pub fn split_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
