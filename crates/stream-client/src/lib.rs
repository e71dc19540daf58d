//! Push-event stream client: one logical connection, in-order dispatch into a
//! [`pulseboard_event_bus::DispatchBus`], bounded linear-backoff reconnects.

pub mod client;
pub mod config;
pub mod error;
mod metrics;
pub mod transport;

pub use client::{ConnectionListener, ConnectionStatus, ListenerId, StreamClient, StreamState};
pub use config::StreamConfig;
pub use error::StreamError;
pub use metrics::StreamMetricsSnapshot;
pub use transport::{FrameSource, HttpStreamTransport, LineFramer, StreamTransport};
