//! Outbound events for embedding hosts.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use map_common::FeatureCollection;

#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Features were selected by a click or a spatial selection.
    FeaturesSelected { features: FeatureCollection },
    /// An edited layer was saved (remotely for WFS-T, locally for plain
    /// vector layers).
    LayerSaved {
        layer_name: String,
        features: FeatureCollection,
        saved_at: DateTime<Utc>,
    },
}

/// Broadcast fan-out to any number of host subscribers. Emitting with no
/// subscribers is not an error.
pub struct EventBus {
    sender: broadcast::Sender<ViewerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(32);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewerEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ViewerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use map_common::{Feature, FeatureCollection};

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ViewerEvent::FeaturesSelected {
            features: FeatureCollection::from_features(vec![Feature::point(1.0, 2.0)]),
        });
        match rx.recv().await.unwrap() {
            ViewerEvent::FeaturesSelected { features } => assert_eq!(features.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(ViewerEvent::FeaturesSelected {
            features: FeatureCollection::new(),
        });
    }
}
