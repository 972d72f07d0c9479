//! Debounced preview dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::api::PreviewCompute;
use crate::config::ConsoleConfig;
use crate::preview::request::{ChannelKey, PreviewRequest, PreviewResult};
use crate::preview::sequence::SequenceGate;
use crate::timeout::with_deadline;

/// Outcome of a preview, delivered in the order it was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    Ready(PreviewResult),
    /// The collaborator failed or timed out. Only this channel is affected.
    Failed {
        channel: ChannelKey,
        sequence: u64,
        error: String,
    },
    /// The channel was dropped, by a degenerate request or by
    /// [`PreviewEngine::retain`]. Whatever it showed is gone.
    Cleared { channel: ChannelKey },
}

/// What [`PreviewEngine::request`] did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewTicket {
    Scheduled { channel: ChannelKey, sequence: u64 },
    Skipped { reason: &'static str },
}

#[derive(Debug, Default)]
struct ChannelSlot {
    gate: SequenceGate,
    latest: Option<PreviewResult>,
    last_error: Option<String>,
}

/// Live channels, and the last sequence number handed out on any of them.
#[derive(Debug, Default)]
struct Channels {
    slots: HashMap<ChannelKey, ChannelSlot>,
    issued: u64,
}

struct EngineInner {
    compute: Arc<dyn PreviewCompute>,
    quantum: Duration,
    timeout: Duration,
    channels: Mutex<Channels>,
    events: mpsc::UnboundedSender<PreviewEvent>,
}

/// Debounces preview requests per channel and drops superseded results.
///
/// Each request waits out the quantum; it is dispatched only if no newer
/// request for the same channel arrived meanwhile, and its result is applied
/// only if no newer request was dispatched while it ran. The computation
/// itself is never interrupted.
///
/// # Example
///
/// ```ignore
/// let (engine, mut events) = PreviewEngine::from_config(client, &config);
/// engine.request(PreviewRequest::new("ds_001", "amount", Metric::Mean, 0.5));
/// engine.request(PreviewRequest::new("ds_001", "amount", Metric::Mean, 0.8));
///
/// // Only the 0.8 request reaches the collaborator.
/// let event = events.recv().await;
/// ```
#[derive(Clone)]
pub struct PreviewEngine {
    inner: Arc<EngineInner>,
}

impl PreviewEngine {
    pub fn new(
        compute: Arc<dyn PreviewCompute>,
        quantum: Duration,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PreviewEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = EngineInner {
            compute,
            quantum,
            timeout,
            channels: Mutex::new(Channels::default()),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Engine using the configured debounce quantum and preview deadline.
    pub fn from_config(
        compute: Arc<dyn PreviewCompute>,
        config: &ConsoleConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PreviewEvent>) {
        Self::new(compute, config.debounce(), config.timeouts().preview_timeout)
    }

    pub fn quantum(&self) -> Duration {
        self.inner.quantum
    }

    /// Schedule a preview. Must be called from within a Tokio runtime.
    ///
    /// Degenerate requests are not dispatched; they drop their channel,
    /// discarding anything pending on it.
    pub fn request(&self, request: PreviewRequest) -> PreviewTicket {
        let channel = request.channel();

        if let Some(reason) = request.degenerate_reason() {
            let mut channels = self.inner.channels();
            if channels.slots.remove(&channel).is_some() {
                let _ = self.inner.events.send(PreviewEvent::Cleared {
                    channel: channel.clone(),
                });
            }
            tracing::debug!(%channel, reason, "preview skipped");
            return PreviewTicket::Skipped { reason };
        }

        let sequence = {
            let mut channels = self.inner.channels();
            channels.issued += 1;
            let sequence = channels.issued;
            channels
                .slots
                .entry(channel.clone())
                .or_default()
                .gate
                .request(sequence);
            sequence
        };

        let inner = Arc::clone(&self.inner);
        let task_channel = channel.clone();
        tokio::spawn(async move { inner.run(request, task_channel, sequence).await });

        PreviewTicket::Scheduled { channel, sequence }
    }

    /// Drop every channel `keep` rejects. Anything pending or in flight on
    /// a dropped channel is discarded, and a `Cleared` event is sent for it.
    pub fn retain(&self, mut keep: impl FnMut(&ChannelKey) -> bool) {
        let mut channels = self.inner.channels();
        let dropped: Vec<ChannelKey> = channels
            .slots
            .keys()
            .filter(|channel| !keep(*channel))
            .cloned()
            .collect();
        for channel in dropped {
            channels.slots.remove(&channel);
            tracing::debug!(%channel, "preview channel dropped");
            let _ = self.inner.events.send(PreviewEvent::Cleared { channel });
        }
    }

    /// Channels currently tracked, in no particular order.
    pub fn channels(&self) -> Vec<ChannelKey> {
        self.inner.channels().slots.keys().cloned().collect()
    }

    /// Last applied result for `channel`.
    pub fn latest(&self, channel: &ChannelKey) -> Option<PreviewResult> {
        self.inner
            .channels()
            .slots
            .get(channel)
            .and_then(|slot| slot.latest.clone())
    }

    /// Last reported error for `channel`, cleared by the next applied result.
    pub fn last_error(&self, channel: &ChannelKey) -> Option<String> {
        self.inner
            .channels()
            .slots
            .get(channel)
            .and_then(|slot| slot.last_error.clone())
    }
}

impl EngineInner {
    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(self: Arc<Self>, request: PreviewRequest, channel: ChannelKey, sequence: u64) {
        tokio::time::sleep(self.quantum).await;

        {
            let mut channels = self.channels();
            let Some(slot) = channels.slots.get_mut(&channel) else {
                return;
            };
            if !slot.gate.try_dispatch(sequence) {
                tracing::debug!(%channel, sequence, "preview superseded before dispatch");
                return;
            }
        }

        tracing::debug!(%channel, sequence, epsilon = request.epsilon, "dispatching preview");
        let outcome = with_deadline("preview", self.timeout, self.compute.preview(&request)).await;

        let mut channels = self.channels();
        let Some(slot) = channels.slots.get_mut(&channel) else {
            tracing::debug!(%channel, sequence, "discarding preview for dropped channel");
            return;
        };
        if !slot.gate.accepts(sequence) {
            tracing::debug!(
                %channel,
                sequence,
                latest = slot.gate.latest_dispatched(),
                "discarding stale preview result"
            );
            return;
        }

        // Sent under the lock so events leave in the order they were applied.
        let event = match outcome {
            Ok(values) => {
                let result = PreviewResult {
                    channel: channel.clone(),
                    epsilon: request.epsilon,
                    actual_value: values.actual_value,
                    private_value: values.private_value,
                    sequence,
                };
                slot.latest = Some(result.clone());
                slot.last_error = None;
                PreviewEvent::Ready(result)
            }
            Err(err) => {
                tracing::warn!(%channel, sequence, error = %err, "preview failed");
                let error = err.to_string();
                slot.last_error = Some(error.clone());
                PreviewEvent::Failed {
                    channel: channel.clone(),
                    sequence,
                    error,
                }
            }
        };
        let _ = self.events.send(event);
    }
}
