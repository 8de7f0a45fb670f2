//! Consumer-facing engine events.
//!
//! Presentation layers subscribe to an `EventBus` and receive every event
//! published after the subscription. Receivers that were dropped are pruned
//! on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use crate::detect::DetectionResult;
use crate::error::{AuthError, CaptureError, DetectionError};
use crate::frame::FrameDimensions;
use crate::ingest::Facing;
use crate::lock;

#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A credential is held and detection calls can be made.
    AuthReady,
    AuthFailed(AuthError),
    CaptureStarted { facing: Facing },
    CaptureFailed(CaptureError),
    CaptureStopped,
    ImageLoaded(FrameDimensions),
    PollingStarted { interval: Duration },
    PollingStopped,
    DetectionCompleted(DetectionResult),
    DetectionFailed(DetectionError),
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        log::debug!("event: {:?}", event);
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_live_subscriber() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();

        bus.publish(EngineEvent::AuthReady);
        assert_eq!(first.try_recv().unwrap(), EngineEvent::AuthReady);
        assert_eq!(second.try_recv().unwrap(), EngineEvent::AuthReady);

        drop(second);
        bus.publish(EngineEvent::CaptureStopped);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(first.try_recv().unwrap(), EngineEvent::CaptureStopped);
    }
}
