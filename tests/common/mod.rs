//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use userflow::{Event, EventBus, EventHandler, PipelineConfig};

/// Event handler keeping every event in order.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Position of the first event matching `pred`.
    pub async fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.lock().await.iter().position(pred)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Event bus with a single recording handler.
pub async fn recording_bus() -> (Arc<EventBus>, Arc<RecordingHandler>) {
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    (bus, handler)
}

/// Default pipeline configuration with the given publish interval.
pub fn config_with_interval(publish_interval_secs: u64) -> PipelineConfig {
    PipelineConfig {
        publish_interval_secs,
        ..PipelineConfig::default()
    }
}
