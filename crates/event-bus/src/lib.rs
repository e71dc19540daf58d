//! Event envelopes and the dispatch bus that fans them out to subscribers.

pub mod bus;
pub mod envelope;

pub use bus::{DispatchBus, DispatchReport, Handler, SubscriptionId};
pub use envelope::{parse_frame, EventEnvelope, EventKind, FrameError};
