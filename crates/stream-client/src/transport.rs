use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::StreamError;

/// Source of raw text frames for one open connection.
///
/// `None` means the server ended the stream; `Some(Err(_))` is a transport failure.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameSource>, StreamError>;
}

/// Long-lived streaming GET carrying newline-delimited JSON.
#[derive(Clone)]
pub struct HttpStreamTransport {
    client: Client,
}

impl HttpStreamTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| StreamError::Transport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameSource>, StreamError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/x-ndjson, text/event-stream")
            .send()
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(StreamError::Unauthorized);
        }
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }
        debug!(target: "stream-client", path = url.path(), "stream response accepted");

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|err| StreamError::Transport(err.to_string()))
            })
            .boxed();
        Ok(Box::new(HttpFrameSource {
            chunks,
            framer: LineFramer::default(),
            ended: false,
        }))
    }
}

struct HttpFrameSource {
    chunks: BoxStream<'static, Result<Vec<u8>, StreamError>>,
    framer: LineFramer,
    ended: bool,
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Some(Ok(line));
            }
            if self.ended {
                return None;
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.framer.push(&chunk),
                Some(Err(err)) => {
                    self.ended = true;
                    return Some(Err(err));
                }
                None => {
                    self.ended = true;
                    return self.framer.finish().map(Ok);
                }
            }
        }
    }
}

/// Splits an arbitrary chunked byte stream into `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Flushes a trailing unterminated line once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
