use crate::message::{encode, EncodeError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("broker connection is down")]
    Disconnected,
    #[error("payload could not be encoded: {0}")]
    Encode(String),
}

impl From<EncodeError> for BusError {
    fn from(e: EncodeError) -> Self {
        BusError::Encode(e.0.to_string())
    }
}

/// Outbound side of the messaging fabric.
///
/// Reconnect and backoff belong to the implementation; callers treat a
/// failed publish as a dropped message and carry on.
pub trait Bus {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Encode `msg` as JSON and publish it.
    fn publish_msg<T: Serialize>(&self, topic: &str, msg: &T) -> Result<(), BusError>
    where
        Self: Sized,
    {
        let payload = encode(msg)?;
        self.publish(topic, &payload)
    }
}

impl<B: Bus + ?Sized> Bus for &B {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        (**self).publish(topic, payload)
    }
}

struct Subscription {
    filter: String,
    tx: Sender<Message>,
}

impl Subscription {
    fn matches(&self, topic: &str) -> bool {
        match self.filter.strip_suffix('#') {
            Some(prefix) => topic.starts_with(prefix),
            None => self.filter == topic,
        }
    }
}

/// In-process broker. Clones share the same subscriber table.
#[derive(Clone)]
pub struct LocalBroker {
    subs: Arc<Mutex<Vec<Subscription>>>,
    online: Arc<AtomicBool>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            subs: Arc::new(Mutex::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Subscribe to an exact topic, or to a prefix when the filter ends in `#`.
    pub fn subscribe(&self, filter: &str) -> Receiver<Message> {
        let (tx, rx) = unbounded();
        self.subscribe_with(filter, tx);
        rx
    }

    /// Subscribe several filters onto one queue, preserving publish order.
    pub fn subscribe_all<S: AsRef<str>>(&self, filters: &[S]) -> Receiver<Message> {
        let (tx, rx) = unbounded();
        for f in filters {
            self.subscribe_with(f.as_ref(), tx.clone());
        }
        rx
    }

    fn subscribe_with(&self, filter: &str, tx: Sender<Message>) {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscription {
            filter: filter.to_string(),
            tx,
        });
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            debug!(online, "broker connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl Bus for LocalBroker {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if !self.is_online() {
            return Err(BusError::Disconnected);
        }
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| {
            if !s.matches(topic) {
                return true;
            }
            let alive = s.tx.send(Message::new(topic, payload)).is_ok();
            if !alive {
                warn!(filter = %s.filter, "dropping subscription with no receiver");
            }
            alive
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_and_exact_filters() {
        let broker = LocalBroker::new();
        let exact = broker.subscribe("x/signal/state");
        let wild = broker.subscribe("x/signal/#");

        broker.publish("x/signal/state", b"1").unwrap();
        broker.publish("x/signal/status", b"2").unwrap();
        broker.publish("x/traffic/A/arrive", b"3").unwrap();

        assert_eq!(exact.try_iter().count(), 1);
        let got: Vec<_> = wild.try_iter().map(|m| m.payload).collect();
        assert_eq!(got, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn offline_broker_rejects_publish() {
        let broker = LocalBroker::new();
        let rx = broker.subscribe("t");
        broker.set_online(false);
        assert_eq!(broker.publish("t", b""), Err(BusError::Disconnected));
        broker.set_online(true);
        broker.publish("t", b"ok").unwrap();
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn unencodable_message_is_an_error_not_an_empty_payload() {
        let broker = LocalBroker::new();
        let rx = broker.subscribe("t");
        let mut bad = std::collections::HashMap::new();
        bad.insert((1u8, 2u8), 3u8);
        assert!(matches!(broker.publish_msg("t", &bad), Err(BusError::Encode(_))));
        assert_eq!(rx.try_iter().count(), 0);

        broker.publish_msg("t", &[1, 2]).unwrap();
        assert_eq!(rx.try_recv().unwrap().payload, b"[1,2]".to_vec());
    }

    #[test]
    fn subscribe_all_keeps_order_across_filters() {
        let broker = LocalBroker::new();
        let rx = broker.subscribe_all(&["a", "b"]);
        broker.publish("b", b"1").unwrap();
        broker.publish("a", b"2").unwrap();
        let topics: Vec<_> = rx.try_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["b", "a"]);
    }
}
