//! Common test utilities for session integration tests.
#![allow(dead_code)]

pub mod mock_transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mojolink_lib::bus::{BusEvent, MessageBus};

pub use mock_transport::MockTransport;

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned connection tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Bus with one listener that records every event.
pub fn recording_bus() -> (Arc<MessageBus>, Arc<Mutex<Vec<BusEvent>>>) {
    let bus = Arc::new(MessageBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    (bus, events)
}

pub fn event_names(events: &Mutex<Vec<BusEvent>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(BusEvent::name).collect()
}
