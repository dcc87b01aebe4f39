use super::logging::{debug_payload_enabled, emit_debug_payload};
use crate::config::Config;
use crate::error::StreamError;
use crate::types::ChatStreamRequest;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use std::pin::Pin;
#[cfg(test)]
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

/// Response header the backend uses to hand back a refreshed credential on
/// the opening response of a push connection.
pub const CREDENTIAL_REFRESH_HEADER: &str = "x-refreshed-credential";

/// Request header naming the deployment that should serve the generation.
pub const DEPLOYMENT_HEADER: &str = "deployment-name";

/// An opened push connection: the refreshed credential observed in the
/// response headers (if any) plus the raw frame byte stream.
pub struct OpenedStream {
    pub refreshed_credential: Option<String>,
    pub bytes: ByteStream,
}

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn open_mock_stream(&self, request: &ChatStreamRequest) -> Result<OpenedStream, StreamError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_url: String,
    deployment: String,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            deployment: config.deployment.clone(),
            #[cfg(test)]
            mock_stream_producer: None,
        }
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            api_url: "http://localhost:8000/v1/chat-stream".to_string(),
            deployment: "Mock Deployment".to_string(),
            #[cfg(test)]
            mock_stream_producer: Some(mock_producer),
        }
    }

    /// Open the push connection for one generation request.
    ///
    /// HTTP 401 maps to `StreamError::Unauthorized` so the session can
    /// classify it for the bounded authorization retry; every other request
    /// failure maps to `StreamError::Transport`.
    pub async fn open_stream(
        &self,
        request: &ChatStreamRequest,
    ) -> Result<OpenedStream, StreamError> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                return producer.open_mock_stream(request);
            }
        }

        let payload = serde_json::to_value(request)
            .map_err(|error| StreamError::Transport(format!("request encoding failed: {error}")))?;
        if debug_payload_enabled() {
            emit_debug_payload(&self.api_url, &payload);
        }

        let mut http_request = self
            .http
            .post(&self.api_url)
            .header("accept", "text/event-stream")
            .header(DEPLOYMENT_HEADER, &self.deployment)
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("authorization", format!("Bearer {api_key}"));
        }

        let response = http_request
            .send()
            .await
            .map_err(|error| map_request_error(error, &self.api_url))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(StreamError::Unauthorized {
                url: self.api_url.clone(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|error| map_request_error(error, &self.api_url))?;

        let refreshed_credential = response
            .headers()
            .get(CREDENTIAL_REFRESH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let request_url = self.api_url.clone();
        let bytes = response
            .bytes_stream()
            .map(move |item| item.map_err(|error| map_request_error(error, &request_url)));

        Ok(OpenedStream {
            refreshed_credential,
            bytes: Box::pin(bytes),
        })
    }
}

fn map_request_error(error: reqwest::Error, request_url: &str) -> StreamError {
    if error.status() == Some(StatusCode::UNAUTHORIZED) {
        return StreamError::Unauthorized {
            url: request_url.to_string(),
        };
    }
    if error.is_connect() {
        return StreamError::Transport(format!(
            "cannot reach push endpoint '{request_url}': {error}"
        ));
    }
    if error.is_timeout() {
        return StreamError::Transport(format!("request to '{request_url}' timed out: {error}"));
    }
    if let Some(status) = error.status() {
        return StreamError::Transport(format!(
            "push endpoint '{request_url}' returned HTTP {status}: {error}"
        ));
    }
    StreamError::Transport(format!("request to '{request_url}' failed: {error}"))
}
