use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use sse_stream::SseStream;

use super::{EVENT_STREAM_MIME_TYPE, JSON_MIME_TYPE, sse::BoxedSseResponse};
use crate::{error::TransportError, transport::sse_client::SseClient};

async fn unexpected_status(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::UnexpectedStatus { status, body }
}

impl SseClient for reqwest::Client {
    async fn post_message(&self, uri: Arc<str>, body: String) -> Result<(), TransportError> {
        let response = self
            .post(uri.as_ref())
            .header(CONTENT_TYPE, JSON_MIME_TYPE)
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        Ok(())
    }

    async fn get_stream(&self, uri: Arc<str>) -> Result<BoxedSseResponse, TransportError> {
        let response = self
            .get(uri.as_ref())
            .header(ACCEPT, EVENT_STREAM_MIME_TYPE)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }
        match response.headers().get(CONTENT_TYPE) {
            Some(content_type)
                if content_type
                    .as_bytes()
                    .starts_with(EVENT_STREAM_MIME_TYPE.as_bytes()) => {}
            other => {
                return Err(TransportError::UnexpectedContentType(
                    other.map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned()),
                ));
            }
        }
        let event_stream = SseStream::from_bytes_stream(response.bytes_stream()).boxed();
        Ok(event_stream)
    }
}
