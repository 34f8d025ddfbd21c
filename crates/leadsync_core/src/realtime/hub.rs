//! In-process change transport.
//!
//! Fans published row events out to every live subscription whose schema,
//! table and event filter match. Used by the embedded SQLite backend and by
//! tests in place of a network push channel.

use crate::realtime::transport::{
    ChangeStream, ChangeTransport, ChannelError, RawChangeEvent, SubscriptionSpec,
};
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

struct Subscriber {
    spec: SubscriptionSpec,
    sender: mpsc::UnboundedSender<RawChangeEvent>,
}

/// Local fan-out hub implementing `ChangeTransport`.
pub struct LocalChangeHub {
    subscribers: Mutex<BTreeMap<String, Subscriber>>,
    available: AtomicBool,
}

impl Default for LocalChangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChangeHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles whether new subscriptions are accepted.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delivers one event to every matching subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: RawChangeEvent) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        subscribers.retain(|channel_id, subscriber| {
            if !matches_spec(&subscriber.spec, &event) {
                return true;
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(
                        "event=hub_prune module=realtime status=ok channel_id={channel_id} reason=receiver_dropped"
                    );
                    false
                }
            }
        });
        delivered
    }

    /// Returns live channel ids, sorted.
    pub fn channel_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChangeTransport for LocalChangeHub {
    fn subscribe(
        &self,
        channel_id: &str,
        spec: &SubscriptionSpec,
    ) -> Result<ChangeStream, ChannelError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "local change hub is offline".to_string(),
            ));
        }
        if channel_id.trim().is_empty() {
            return Err(ChannelError::Rejected {
                channel_id: channel_id.to_string(),
                reason: "channel id cannot be blank".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().insert(
            channel_id.to_string(),
            Subscriber {
                spec: spec.clone(),
                sender,
            },
        );
        Ok(receiver)
    }

    fn unsubscribe(&self, channel_id: &str) {
        self.lock().remove(channel_id);
    }
}

fn matches_spec(spec: &SubscriptionSpec, event: &RawChangeEvent) -> bool {
    spec.schema == event.schema && spec.table == event.table && spec.event.matches(event.event_type)
}

#[cfg(test)]
mod tests {
    use super::LocalChangeHub;
    use crate::realtime::transport::{
        ChangeEventType, ChangeTransport, ChannelError, EventFilter, RawChangeEvent,
        SubscriptionSpec,
    };
    use serde_json::{json, Value};

    fn spec(table: &str, event: EventFilter) -> SubscriptionSpec {
        SubscriptionSpec {
            event,
            schema: "public".to_string(),
            table: table.to_string(),
        }
    }

    fn event(table: &str, event_type: ChangeEventType) -> RawChangeEvent {
        RawChangeEvent {
            event_type,
            schema: "public".to_string(),
            table: table.to_string(),
            new: json!({ "id": "a" }),
            old: Value::Null,
        }
    }

    #[test]
    fn publish_respects_table_and_event_filter() {
        let hub = LocalChangeHub::new();
        let mut leads = hub
            .subscribe("realtime:leads", &spec("leads", EventFilter::Any))
            .expect("subscribe");
        let mut details = hub
            .subscribe("realtime:details", &spec("contact_entities", EventFilter::Update))
            .expect("subscribe");

        assert_eq!(hub.publish(event("leads", ChangeEventType::Insert)), 1);
        assert_eq!(hub.publish(event("contact_entities", ChangeEventType::Insert)), 0);
        assert_eq!(hub.publish(event("contact_entities", ChangeEventType::Update)), 1);

        assert!(leads.try_recv().is_ok());
        let received = details.try_recv().expect("update should be delivered");
        assert_eq!(received.event_type, ChangeEventType::Update);
        assert!(details.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_offline_hub_rejects() {
        let hub = LocalChangeHub::new();
        let _stream = hub
            .subscribe("realtime:leads", &spec("leads", EventFilter::Any))
            .expect("subscribe");
        hub.unsubscribe("realtime:leads");
        hub.unsubscribe("realtime:leads");
        assert_eq!(hub.subscriber_count(), 0);

        hub.set_available(false);
        let err = hub
            .subscribe("realtime:leads", &spec("leads", EventFilter::Any))
            .expect_err("offline hub must reject");
        assert!(matches!(err, ChannelError::Unavailable(_)));
    }

    #[test]
    fn publish_prunes_dropped_receivers() {
        let hub = LocalChangeHub::new();
        let stream = hub
            .subscribe("realtime:leads", &spec("leads", EventFilter::Any))
            .expect("subscribe");
        drop(stream);
        assert_eq!(hub.publish(event("leads", ChangeEventType::Delete)), 0);
        assert!(hub.channel_ids().is_empty());
    }
}
