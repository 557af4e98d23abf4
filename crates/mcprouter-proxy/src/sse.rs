//! Server-sent event writer
//!
//! A streaming exchange is always bracketed:
//!
//! ```text
//! event: stream
//! data: started
//!
//! event: jsonrpc
//! data: {"jsonrpc":"2.0","id":1,"result":{...}}
//!
//! event: stream
//! data: completed
//! ```
//!
//! so a client detects completion by event name, not by the connection
//! closing.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::sse::{Event, Sse};
use futures::Stream;
use mcprouter_protocol::Response;
use thiserror::Error;
use tokio::sync::mpsc;

/// Event name for stream lifecycle markers
pub const EVENT_STREAM: &str = "stream";
/// Event name for JSON-RPC payloads
pub const EVENT_JSONRPC: &str = "jsonrpc";
/// Data of the opening lifecycle marker
pub const STREAM_STARTED: &str = "started";
/// Data of the closing lifecycle marker
pub const STREAM_COMPLETED: &str = "completed";

const DEFAULT_CAPACITY: usize = 16;

/// Errors raised while writing events
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseError {
    /// The receiving connection is gone
    #[error("event stream closed")]
    StreamClosed,
    /// The connection is not draining events fast enough
    #[error("event stream buffer full")]
    BufferFull,
}

/// One named event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name
    pub event: String,
    /// Payload; each line becomes one `data:` field
    pub data: String,
}

impl SseEvent {
    /// Create an event
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Wire frame for this event
    #[cfg(test)]
    fn to_frame(&self) -> String {
        let mut frame = format!("event: {}\n", self.event);
        for line in self.data.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }
}

impl From<SseEvent> for Event {
    fn from(event: SseEvent) -> Self {
        Event::default().event(event.event).data(event.data)
    }
}

/// Writes named events to one outbound connection
#[derive(Debug, Clone)]
pub struct SseWriter {
    tx: mpsc::Sender<SseEvent>,
}

/// Body half of an [`SseWriter`]; ends when every writer is dropped
#[derive(Debug)]
pub struct SseEventStream {
    rx: mpsc::Receiver<SseEvent>,
}

impl Stream for SseEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|event| event.map(|e| Ok(Event::from(e))))
    }
}

impl SseWriter {
    /// Writer plus the response body it feeds
    pub fn channel() -> (Self, Sse<SseEventStream>) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Writer with a custom buffer size
    pub fn with_capacity(capacity: usize) -> (Self, Sse<SseEventStream>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, Sse::new(SseEventStream { rx }))
    }

    /// Whether the receiving connection is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Write one event frame
    ///
    /// # Errors
    ///
    /// Returns [`SseError::StreamClosed`] once the connection is gone.
    pub async fn send_event_data(
        &self,
        event: &str,
        data: impl Into<String>,
    ) -> Result<(), SseError> {
        self.tx
            .send(SseEvent::new(event, data))
            .await
            .map_err(|_| SseError::StreamClosed)
    }

    /// Write one event frame without waiting for buffer space
    ///
    /// For callers that cannot await, such as transport notification
    /// observers.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::BufferFull`] when the buffer is full and
    /// [`SseError::StreamClosed`] once the connection is gone.
    pub fn try_send_event_data(&self, event: &str, data: impl Into<String>) -> Result<(), SseError> {
        self.tx
            .try_send(SseEvent::new(event, data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SseError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => SseError::StreamClosed,
            })
    }

    /// Whether both writers feed the same connection
    pub fn same_stream(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Open the bracket
    ///
    /// # Errors
    ///
    /// Returns [`SseError::StreamClosed`] once the connection is gone.
    pub async fn stream_started(&self) -> Result<(), SseError> {
        self.send_event_data(EVENT_STREAM, STREAM_STARTED).await
    }

    /// Write a JSON-RPC response as a `jsonrpc` event
    ///
    /// # Errors
    ///
    /// Returns [`SseError::StreamClosed`] once the connection is gone.
    pub async fn send_response(&self, response: &Response) -> Result<(), SseError> {
        self.send_event_data(EVENT_JSONRPC, response.to_json_string())
            .await
    }

    /// Close the bracket, writing a final response first when given
    ///
    /// # Errors
    ///
    /// Returns [`SseError::StreamClosed`] once the connection is gone.
    pub async fn stream_completed(&self, response: Option<&Response>) -> Result<(), SseError> {
        if let Some(response) = response {
            self.send_response(response).await?;
        }
        self.send_event_data(EVENT_STREAM, STREAM_COMPLETED).await
    }

    /// Write a complete `started`, `jsonrpc`, `completed` bracket
    ///
    /// # Errors
    ///
    /// Returns [`SseError::StreamClosed`] once the connection is gone.
    pub async fn respond_once(&self, response: &Response) -> Result<(), SseError> {
        self.stream_started().await?;
        self.stream_completed(Some(response)).await
    }
}
