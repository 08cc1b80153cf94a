use crate::models::{InterfaceSettings, LimitsSettings};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use std::sync::{Arc, Mutex};

/// Cross-context notifications. Senders never wait on receivers; a context
/// that is not running simply misses the message and re-reads storage when
/// it next starts.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Interface toggles changed; receivers re-apply feature toggles.
    SettingsUpdated(InterfaceSettings),
    /// Limits settings changed; receivers reload limits state from storage.
    LimitsUpdated(LimitsSettings),
}

/// Fire-and-forget fan-out bus between the popup, background and
/// content-script endpoints of the host process.
#[derive(Clone, Default)]
pub struct MessageBus {
    endpoints: Arc<Mutex<Vec<Endpoint>>>,
}

struct Endpoint {
    name: String,
    tx: Sender<Message>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named endpoint and receive its message stream.
    pub fn register(&self, name: &str) -> Receiver<Message> {
        let (tx, rx) = unbounded();
        self.endpoints
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Endpoint {
                name: name.to_string(),
                tx,
            });
        rx
    }

    /// Deliver to every live endpoint; disconnected endpoints are pruned.
    /// Returns the number of endpoints that received the message.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut endpoints = self.endpoints.lock().unwrap_or_else(|p| p.into_inner());
        let mut delivered = 0;
        endpoints.retain(|endpoint| match endpoint.tx.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!("dropping disconnected endpoint '{}'", endpoint.name);
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_all_endpoints() {
        let bus = MessageBus::new();
        let popup = bus.register("popup");
        let content = bus.register("content");

        let msg = Message::LimitsUpdated(LimitsSettings::default());
        assert_eq!(bus.broadcast(&msg), 2);

        assert_eq!(popup.try_recv().unwrap(), msg);
        assert_eq!(content.try_recv().unwrap(), msg);
    }

    #[test]
    fn test_broadcast_without_endpoints_is_best_effort() {
        let bus = MessageBus::new();
        let msg = Message::SettingsUpdated(InterfaceSettings::default());
        assert_eq!(bus.broadcast(&msg), 0);
    }

    #[test]
    fn test_disconnected_endpoint_is_pruned() {
        let bus = MessageBus::new();
        let rx = bus.register("popup");
        drop(rx);

        let msg = Message::SettingsUpdated(InterfaceSettings::default());
        assert_eq!(bus.broadcast(&msg), 0);
        // A later register still works and receives.
        let rx = bus.register("popup");
        assert_eq!(bus.broadcast(&msg), 1);
        assert!(rx.try_recv().is_ok());
    }
}
