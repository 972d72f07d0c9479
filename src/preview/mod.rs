//! Live utility previews.
//!
//! Requests are keyed by [`ChannelKey`] (dataset + column + metric). Each
//! channel owns a [`SequenceGate`]; only the latest request after the
//! debounce quantum is dispatched, and only the latest dispatched result is
//! applied. Channels nobody shows any more are dropped with
//! [`PreviewEngine::retain`]. Previews never touch the ledger.

mod engine;
mod request;
mod sequence;

pub use engine::{PreviewEngine, PreviewEvent, PreviewTicket};
pub use request::{ChannelKey, PreviewRequest, PreviewResult, PreviewValues};
pub use sequence::SequenceGate;
