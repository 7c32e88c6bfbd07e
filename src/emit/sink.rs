use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};

use super::payload::Record;
use super::{Emission, SLOW_TAG};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,
    #[error("sink rejected the emission: {0}")]
    Rejected(String),
}

/// Destination for emissions. Delivery is fire-and-forget from the caller's side.
pub trait Sink: Send + Sync {
    fn emit(&self, emission: Emission) -> Result<(), SinkError>;
}

impl<F> Sink for F
where
    F: Fn(Emission) -> Result<(), SinkError> + Send + Sync,
{
    fn emit(&self, emission: Emission) -> Result<(), SinkError> {
        self(emission)
    }
}

/// Writes each emission as a `tracing` event under the `rslow` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for TracingSink {
    fn emit(&self, emission: Emission) -> Result<(), SinkError> {
        let Emission { tags, record } = emission;
        let json = record.to_json();
        let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
        match &record {
            Record::Request(payload) if tags.contains(&SLOW_TAG) => warn!(
                target: "rslow",
                response_time = payload.response_time,
                threshold = payload.threshold,
                method = %payload.method,
                path = %payload.path,
                tags = ?tags,
                payload = %json,
                "{}",
                payload.message
            ),
            Record::Request(payload) => info!(
                target: "rslow",
                response_time = payload.response_time,
                threshold = payload.threshold,
                method = %payload.method,
                path = %payload.path,
                tags = ?tags,
                payload = %json,
                "{}",
                payload.message
            ),
            Record::Segment(payload) => info!(
                target: "rslow",
                segment = %payload.name,
                elapsed = payload.elapsed,
                path = %payload.path,
                tags = ?tags,
                payload = %json,
                "{}",
                payload.message
            ),
        }
        Ok(())
    }
}

/// Hands emissions to a bounded channel so another task can consume them.
///
/// A full channel rejects the emission instead of queueing without limit.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Emission>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, Receiver<Emission>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl Sink for ChannelSink {
    fn emit(&self, emission: Emission) -> Result<(), SinkError> {
        self.sender.try_send(emission).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Rejected("channel is full".to_string()),
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::payload::SegmentPayload;
    use std::collections::BTreeSet;

    fn emission(name: &str) -> Emission {
        Emission {
            tags: BTreeSet::from(["rslow".to_string()]),
            record: Record::Segment(SegmentPayload::new(name, 1, "/", None)),
        }
    }

    #[test]
    fn full_channel_rejects_instead_of_growing() {
        let (sink, mut rx) = ChannelSink::channel(1);
        assert_eq!(sink.emit(emission("a")), Ok(()));
        assert!(matches!(sink.emit(emission("b")), Err(SinkError::Rejected(_))));

        assert_eq!(rx.try_recv().unwrap().segment().unwrap().name, "a");
        assert_eq!(sink.emit(emission("c")), Ok(()));
    }

    #[test]
    fn dropped_receiver_closes_the_sink() {
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        assert_eq!(sink.emit(emission("a")), Err(SinkError::Closed));
    }
}
