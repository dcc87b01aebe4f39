use crate::api::client::{MockStreamProducer, OpenedStream};
use crate::error::StreamError;
use crate::types::ChatStreamRequest;
use bytes::Bytes;
use futures::stream;
use std::sync::{Arc, Mutex};

/// One scripted connection attempt for the mock client.
pub enum MockAttempt {
    /// The connection opens; each string becomes one SSE byte chunk.
    Frames {
        frames: Vec<String>,
        refreshed_credential: Option<String>,
    },
    /// The connection is rejected with HTTP 401.
    Unauthorized,
    /// The connection fails at the transport level before opening.
    ConnectError(String),
}

impl MockAttempt {
    pub fn frames(frames: Vec<String>) -> Self {
        Self::Frames {
            frames,
            refreshed_credential: None,
        }
    }

    pub fn frames_with_credential(frames: Vec<String>, credential: &str) -> Self {
        Self::Frames {
            frames,
            refreshed_credential: Some(credential.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct MockApiClient {
    attempts: Arc<Mutex<Vec<MockAttempt>>>,
}

impl MockApiClient {
    pub fn new(attempts: Vec<MockAttempt>) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(attempts)),
        }
    }
}

impl MockStreamProducer for MockApiClient {
    fn open_mock_stream(&self, _request: &ChatStreamRequest) -> Result<OpenedStream, StreamError> {
        let mut attempts = self.attempts.lock().unwrap();
        if attempts.is_empty() {
            return Err(StreamError::Transport(
                "MockApiClient: no more attempts configured".to_string(),
            ));
        }

        match attempts.remove(0) {
            MockAttempt::Unauthorized => Err(StreamError::Unauthorized {
                url: "http://localhost:8000/v1/chat-stream".to_string(),
            }),
            MockAttempt::ConnectError(message) => Err(StreamError::Transport(message)),
            MockAttempt::Frames {
                frames,
                refreshed_credential,
            } => {
                let sse_byte_chunks: Vec<Result<Bytes, StreamError>> = frames
                    .into_iter()
                    .map(|s| {
                        let framed = if s.ends_with("\n\n") {
                            s
                        } else {
                            format!("{s}\n\n")
                        };
                        Ok(Bytes::from(framed))
                    })
                    .collect();

                Ok(OpenedStream {
                    refreshed_credential,
                    bytes: Box::pin(stream::iter(sse_byte_chunks)),
                })
            }
        }
    }
}
