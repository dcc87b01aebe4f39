use super::decoder::decode_frame;
use crate::types::StreamEvent;

/// Splits the raw push-connection byte stream into SSE frames and decodes
/// each frame into a `StreamEvent`. Partial frames are buffered across
/// `process` calls.
#[derive(Default)]
pub struct StreamParser {
    buffer: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let frame_end = start + end + 2;
            let frame_text = &self.buffer[start..frame_end];

            let mut event_type = None;
            let mut data = None;

            for line in frame_text.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event_type = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = Some(rest.trim().to_string());
                }
            }

            if let Some(payload) = data {
                // "[DONE]" and server pings are keep-alive noise, not frames.
                if payload != "[DONE]" && event_type.as_deref() != Some("ping") {
                    events.push(decode_frame(event_type.as_deref(), &payload));
                }
            }

            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}
