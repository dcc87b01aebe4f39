use crate::api::client::ApiClient;
use crate::api::logging::emit_frame_decode_error;
use crate::api::stream::StreamParser;
use crate::conversations::{ConversationCache, ConversationPatch};
use crate::credentials::CredentialStore;
use crate::error::StreamError;
use crate::types::{ChatStreamRequest, StreamEvent};
use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one stream session. Progression is monotonic:
/// `Idle → Connecting → Streaming → {Completed | Cancelled | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// Updates delivered to the caller, in arrival order, over the session's
/// unbounded channel. A non-cancelled run emits `Opened`, zero or more
/// `Data` updates, exactly one of `Finished` or `Error`, then `Closed`.
/// Nothing is emitted after a cancellation is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Opened,
    Data { event: String, payload: Value },
    Finished {
        text: String,
        conversation_id: Option<String>,
    },
    Error(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Transport,
    Authorization,
    Generation,
}

/// Result of one `run` attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        text: String,
        conversation_id: Option<String>,
    },
    Cancelled,
    Failed {
        kind: FailureKind,
        reason: String,
        /// True exactly once per session, for the first authorization
        /// failure: the caller may invalidate credentials and call `run`
        /// again. The session reports eligibility; it never refreshes
        /// credentials itself.
        retry_eligible: bool,
    },
}

/// One logical push-connection request to the generation service.
///
/// At most one session may be open per logical request; a caller replacing
/// an outstanding session must cancel the prior one first. Cancellation is
/// cooperative: it is observed at the connect-wait or the next frame-wait,
/// and once acknowledged no further updates are sent.
pub struct StreamSession {
    client: Arc<ApiClient>,
    cancel: CancellationToken,
    state: SessionState,
    auth_retry_used: bool,
    retry_armed: bool,
}

impl StreamSession {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            auth_retry_used: false,
            retry_armed: false,
        }
    }

    /// Handle the caller races against an external timer or a replacement
    /// request. The session owns no timeout of its own.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive one connection attempt to its terminal state.
    ///
    /// Frames are read one at a time and forwarded before the next read is
    /// issued, so the caller's processing cost backpressures the stream.
    /// On a terminal frame with a `COMPLETE` reason the conversation cache
    /// is patched once, then `Finished` is delivered. Calling `run` on a
    /// session that is neither idle nor armed for an authorization retry
    /// is a misuse error.
    pub async fn run(
        &mut self,
        request: &ChatStreamRequest,
        updates: &mpsc::UnboundedSender<SessionUpdate>,
        cache: &dyn ConversationCache,
        credentials: &dyn CredentialStore,
    ) -> Result<SessionOutcome> {
        self.ensure_startable()?;
        self.state = SessionState::Connecting;

        if self.cancel.is_cancelled() {
            self.state = SessionState::Cancelled;
            return Ok(SessionOutcome::Cancelled);
        }

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.state = SessionState::Cancelled;
                return Ok(SessionOutcome::Cancelled);
            }
            opened = self.client.open_stream(request) => opened,
        };

        let opened = match opened {
            Ok(opened) => opened,
            Err(error @ StreamError::Unauthorized { .. }) => {
                let retry_eligible = !self.auth_retry_used;
                self.auth_retry_used = true;
                self.retry_armed = retry_eligible;
                let reason = error.to_string();
                self.state = SessionState::Failed;
                let _ = updates.send(SessionUpdate::Error(reason.clone()));
                let _ = updates.send(SessionUpdate::Closed);
                return Ok(SessionOutcome::Failed {
                    kind: FailureKind::Authorization,
                    reason,
                    retry_eligible,
                });
            }
            Err(error) => {
                return Ok(self.fail(updates, FailureKind::Transport, error.to_string()));
            }
        };

        // A refreshed credential on the opening response is forwarded
        // before any data delivery.
        if let Some(credential) = opened.refreshed_credential {
            credentials.update(credential);
        }

        self.state = SessionState::Streaming;
        let _ = updates.send(SessionUpdate::Opened);

        let mut parser = StreamParser::new();
        let mut bytes = opened.bytes;

        loop {
            if self.cancel.is_cancelled() {
                self.state = SessionState::Cancelled;
                return Ok(SessionOutcome::Cancelled);
            }

            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state = SessionState::Cancelled;
                    return Ok(SessionOutcome::Cancelled);
                }
                chunk = bytes.next() => chunk,
            };

            let buf = match chunk {
                None => {
                    return Ok(self.fail(
                        updates,
                        FailureKind::Transport,
                        "connection closed before terminal event".to_string(),
                    ));
                }
                Some(Err(error)) => {
                    return Ok(self.fail(updates, FailureKind::Transport, error.to_string()));
                }
                Some(Ok(buf)) => buf,
            };

            for event in parser.process(&buf) {
                match event {
                    StreamEvent::Data { event, payload } => {
                        let _ = updates.send(SessionUpdate::Data { event, payload });
                    }
                    StreamEvent::Malformed { raw } => {
                        emit_frame_decode_error(&raw);
                        return Ok(self.fail(
                            updates,
                            FailureKind::Decode,
                            format!("malformed frame: {raw}"),
                        ));
                    }
                    StreamEvent::Terminal {
                        finish_reason,
                        text,
                        conversation_id,
                        error,
                    } => {
                        if finish_reason.is_complete() {
                            if let Some(id) = &conversation_id {
                                cache.replace_by_id(
                                    id,
                                    ConversationPatch::from_terminal_text(&text),
                                );
                            }
                            self.state = SessionState::Completed;
                            let _ = updates.send(SessionUpdate::Finished {
                                text: text.clone(),
                                conversation_id: conversation_id.clone(),
                            });
                            let _ = updates.send(SessionUpdate::Closed);
                            return Ok(SessionOutcome::Completed {
                                text,
                                conversation_id,
                            });
                        }

                        let reason =
                            error.unwrap_or_else(|| finish_reason.as_str().to_string());
                        return Ok(self.fail(updates, FailureKind::Generation, reason));
                    }
                }
            }
        }
    }

    fn ensure_startable(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Failed if self.retry_armed => {
                self.retry_armed = false;
                Ok(())
            }
            state => bail!("stream session already consumed (state: {state:?})"),
        }
    }

    fn fail(
        &mut self,
        updates: &mpsc::UnboundedSender<SessionUpdate>,
        kind: FailureKind,
        reason: String,
    ) -> SessionOutcome {
        self.state = SessionState::Failed;
        let _ = updates.send(SessionUpdate::Error(reason.clone()));
        let _ = updates.send(SessionUpdate::Closed);
        SessionOutcome::Failed {
            kind,
            reason,
            retry_eligible: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_client::{MockApiClient, MockAttempt};
    use crate::conversations::ConversationPatch;
    use crate::credentials::InMemoryCredentialStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingCache {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConversationCache for RecordingCache {
        fn replace_by_id(&self, id: &str, patch: ConversationPatch) {
            self.calls
                .lock()
                .unwrap()
                .push((id.to_string(), patch.description));
        }
    }

    fn data_frame(text: &str) -> String {
        format!("event: text-generation\ndata: {{\"text\":\"{text}\"}}")
    }

    fn complete_frame(text: &str, conversation_id: &str) -> String {
        format!(
            "event: stream-end\ndata: {{\"finish_reason\":\"COMPLETE\",\"text\":\"{text}\",\"conversation_id\":\"{conversation_id}\"}}"
        )
    }

    fn failed_frame(reason: &str, error: &str) -> String {
        format!(
            "event: stream-end\ndata: {{\"finish_reason\":\"{reason}\",\"text\":\"\",\"error\":\"{error}\"}}"
        )
    }

    fn session_with_attempts(attempts: Vec<MockAttempt>) -> StreamSession {
        let client = ApiClient::new_mock(Arc::new(MockApiClient::new(attempts)));
        StreamSession::new(Arc::new(client))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    #[tokio::test]
    async fn test_data_events_in_order_then_finish_once() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            data_frame("He"),
            data_frame("llo"),
            complete_frame("Hello", "conv-1"),
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .expect("run should not misuse-error");

        assert_eq!(
            outcome,
            SessionOutcome::Completed {
                text: "Hello".to_string(),
                conversation_id: Some("conv-1".to_string()),
            }
        );
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(cache.calls(), vec![("conv-1".to_string(), "Hello".to_string())]);

        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 5);
        assert_eq!(updates[0], SessionUpdate::Opened);
        match (&updates[1], &updates[2]) {
            (
                SessionUpdate::Data { payload: first, .. },
                SessionUpdate::Data { payload: second, .. },
            ) => {
                assert_eq!(first["text"], "He");
                assert_eq!(second["text"], "llo");
            }
            other => panic!("expected two data updates in order, got {other:?}"),
        }
        assert!(matches!(&updates[3], SessionUpdate::Finished { text, .. } if text == "Hello"));
        assert_eq!(updates[4], SessionUpdate::Closed);
        assert!(
            !updates.iter().any(|u| matches!(u, SessionUpdate::Error(_))),
            "no error update on the happy path"
        );
    }

    #[tokio::test]
    async fn test_non_complete_finish_reason_is_failure_without_cache_update() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            data_frame("partial"),
            failed_frame("ERROR", "content_filter"),
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();

        match outcome {
            SessionOutcome::Failed { kind, reason, retry_eligible } => {
                assert_eq!(kind, FailureKind::Generation);
                assert_eq!(reason, "content_filter");
                assert!(!retry_eligible);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(cache.calls().is_empty(), "failed stream must not patch cache");

        let updates = drain(&mut rx);
        let errors: Vec<_> = updates
            .iter()
            .filter(|u| matches!(u, SessionUpdate::Error(_)))
            .collect();
        assert_eq!(errors.len(), 1);
        match errors[0] {
            SessionUpdate::Error(reason) => assert_eq!(reason, "content_filter"),
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(!updates.iter().any(|u| matches!(u, SessionUpdate::Finished { .. })));
    }

    #[tokio::test]
    async fn test_finish_reason_without_error_text_falls_back_to_reason_name() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            "event: stream-end\ndata: {\"finish_reason\":\"MAX_TOKENS\",\"text\":\"cut\"}"
                .to_string(),
        ])]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();
        assert!(
            matches!(outcome, SessionOutcome::Failed { reason, .. } if reason == "MAX_TOKENS")
        );
    }

    #[tokio::test]
    async fn test_malformed_frame_is_hard_decode_failure() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            data_frame("ok"),
            "event: text-generation\ndata: {broken}".to_string(),
        ])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SessionOutcome::Failed { kind: FailureKind::Decode, .. }
        ));
        assert_eq!(session.state(), SessionState::Failed);
        let updates = drain(&mut rx);
        assert_eq!(*updates.last().unwrap(), SessionUpdate::Closed);
    }

    #[tokio::test]
    async fn test_stream_ending_without_terminal_event_is_transport_failure() {
        let mut session =
            session_with_attempts(vec![MockAttempt::frames(vec![data_frame("no end")])]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed { kind: FailureKind::Transport, .. }
        ));
    }

    #[tokio::test]
    async fn test_authorization_retry_fires_at_most_once() {
        let mut session = session_with_attempts(vec![
            MockAttempt::Unauthorized,
            MockAttempt::frames(vec![complete_frame("recovered", "conv-7")]),
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::with_credential("stale");

        let request = ChatStreamRequest::new("hi");
        let first = session.run(&request, &tx, &cache, &credentials).await.unwrap();
        match first {
            SessionOutcome::Failed { kind, retry_eligible, .. } => {
                assert_eq!(kind, FailureKind::Authorization);
                assert!(retry_eligible, "first 401 must offer one retry");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Caller refreshes credentials between attempts; the session only
        // reported eligibility.
        credentials.invalidate("stale");

        let second = session.run(&request, &tx, &cache, &credentials).await.unwrap();
        assert!(matches!(second, SessionOutcome::Completed { .. }));
        assert_eq!(cache.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_second_authorization_failure_is_terminal() {
        let mut session = session_with_attempts(vec![
            MockAttempt::Unauthorized,
            MockAttempt::Unauthorized,
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let request = ChatStreamRequest::new("hi");
        let first = session.run(&request, &tx, &cache, &credentials).await.unwrap();
        assert!(matches!(
            first,
            SessionOutcome::Failed { retry_eligible: true, .. }
        ));

        let second = session.run(&request, &tx, &cache, &credentials).await.unwrap();
        assert!(matches!(
            second,
            SessionOutcome::Failed {
                kind: FailureKind::Authorization,
                retry_eligible: false,
                ..
            }
        ));

        assert!(
            session.run(&request, &tx, &cache, &credentials).await.is_err(),
            "no third attempt after the retry credit is spent"
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retry_eligible() {
        let mut session = session_with_attempts(vec![MockAttempt::ConnectError(
            "connection refused".to_string(),
        )]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            SessionOutcome::Failed {
                kind: FailureKind::Transport,
                retry_eligible: false,
                ..
            }
        ));

        assert!(
            session
                .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
                .await
                .is_err(),
            "transport failures are terminal"
        );
    }

    #[tokio::test]
    async fn test_cancelled_session_emits_no_updates() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            complete_frame("unseen", "conv-1"),
        ])]);
        session.cancel_handle().cancel();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();

        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(drain(&mut rx).is_empty());
        assert!(cache.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refreshed_credential_is_forwarded_before_data() {
        let mut session = session_with_attempts(vec![MockAttempt::frames_with_credential(
            vec![data_frame("x"), complete_frame("x", "conv-1")],
            "tok-fresh",
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::with_credential("tok-old");

        let outcome = session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();

        assert!(matches!(outcome, SessionOutcome::Completed { .. }));
        assert_eq!(credentials.current().as_deref(), Some("tok-fresh"));
        assert_eq!(drain(&mut rx)[0], SessionUpdate::Opened);
    }

    #[tokio::test]
    async fn test_completed_session_cannot_be_rerun() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![
            complete_frame("done", "conv-1"),
        ])]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        let request = ChatStreamRequest::new("hi");
        session.run(&request, &tx, &cache, &credentials).await.unwrap();
        assert!(session.run(&request, &tx, &cache, &credentials).await.is_err());
    }

    #[tokio::test]
    async fn test_frames_after_terminal_are_ignored() {
        let mut session = session_with_attempts(vec![MockAttempt::frames(vec![format!(
            "{}\n\n{}",
            complete_frame("done", "conv-1"),
            data_frame("late")
        )])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cache = RecordingCache::default();
        let credentials = InMemoryCredentialStore::default();

        session
            .run(&ChatStreamRequest::new("hi"), &tx, &cache, &credentials)
            .await
            .unwrap();

        let updates = drain(&mut rx);
        assert_eq!(*updates.last().unwrap(), SessionUpdate::Closed);
        assert!(
            !updates.iter().any(|u| matches!(u, SessionUpdate::Data { .. })),
            "data after the terminal frame must not be delivered"
        );
    }
}
