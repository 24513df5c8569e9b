use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CollabError;
use crate::models::{
    BroadcastEvent, ChannelEvent, ChannelName, ChannelStatus, PresenceSnapshot, PresenceState,
};
use crate::realtime::channel::{EventSink, RealtimeChannel, RealtimeTransport};

#[derive(Clone, Debug)]
struct Envelope {
    sender_id: Uuid,
    event: ChannelEvent,
    /// Presence syncs go to everyone, broadcasts skip the sender
    echo: bool,
}

struct Topic {
    tx: broadcast::Sender<Envelope>,
    presence: BTreeMap<String, Vec<(Uuid, PresenceState)>>,
    subscribers: usize,
}

impl Topic {
    fn snapshot(&self) -> PresenceSnapshot {
        self.presence
            .iter()
            .map(|(key, metas)| (key.clone(), metas.iter().map(|(_, s)| s.clone()).collect()))
            .collect()
    }

    fn publish(&self, envelope: Envelope) {
        // No receivers is not an error: everyone may have just left
        let _ = self.tx.send(envelope);
    }
}

/// Counts reported by the diagnostics endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub channels: usize,
    pub subscribers: usize,
    pub tracked: usize,
}

/// In-process real-time hub: one broadcast channel plus a presence map per topic.
#[derive(Clone)]
pub struct LocalHub {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    capacity: usize,
    max_channels: usize,
}

impl LocalHub {
    pub fn new(capacity: usize, max_channels: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            max_channels,
        }
    }

    /// Open a channel handle without subscribing yet
    pub fn open(&self, topic: &str, presence_key: &str) -> LocalChannel {
        LocalChannel {
            hub: self.clone(),
            topic: topic.to_string(),
            key: presence_key.to_string(),
            connection_id: Uuid::new_v4(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn stats(&self) -> HubStats {
        let topics = self.lock();
        topics.values().fold(
            HubStats {
                channels: topics.len(),
                ..HubStats::default()
            },
            |mut stats, topic| {
                stats.subscribers += topic.subscribers;
                stats.tracked += topic.presence.values().map(Vec::len).sum::<usize>();
                stats
            },
        )
    }

    /// Current presence of a topic, if anyone is subscribed to it
    pub fn presence(&self, topic: &str) -> Option<PresenceSnapshot> {
        self.lock().get(topic).map(Topic::snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self, topic: &str) -> Result<(broadcast::Receiver<Envelope>, PresenceSnapshot), String> {
        let mut topics = self.lock();
        if !topics.contains_key(topic) && topics.len() >= self.max_channels {
            return Err(format!("channel limit of {} reached", self.max_channels));
        }
        let entry = topics.entry(topic.to_string()).or_insert_with(|| {
            info!("Opening channel {}", topic);
            let (tx, _rx) = broadcast::channel(self.capacity);
            Topic {
                tx,
                presence: BTreeMap::new(),
                subscribers: 0,
            }
        });
        entry.subscribers += 1;
        Ok((entry.tx.subscribe(), entry.snapshot()))
    }

    fn leave(&self, topic: &str, key: &str, connection_id: Uuid) {
        let mut topics = self.lock();
        let Some(entry) = topics.get_mut(topic) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);

        let mut untracked = false;
        if let Some(metas) = entry.presence.get_mut(key) {
            let before = metas.len();
            metas.retain(|(conn, _)| *conn != connection_id);
            untracked = metas.len() != before;
            if metas.is_empty() {
                entry.presence.remove(key);
            }
        }

        if entry.subscribers == 0 {
            info!("Closing channel {}", topic);
            topics.remove(topic);
        } else if untracked {
            entry.publish(Envelope {
                sender_id: connection_id,
                event: ChannelEvent::PresenceSync {
                    presence: entry.snapshot(),
                },
                echo: true,
            });
        }
    }

    fn track(&self, topic: &str, key: &str, connection_id: Uuid, state: PresenceState) -> Result<(), CollabError> {
        let mut topics = self.lock();
        let entry = topics
            .get_mut(topic)
            .ok_or_else(|| CollabError::ChannelClosed(topic.to_string()))?;

        let metas = entry.presence.entry(key.to_string()).or_default();
        match metas.iter().position(|(conn, _)| *conn == connection_id) {
            Some(idx) => metas[idx].1 = state,
            None => metas.push((connection_id, state)),
        }

        entry.publish(Envelope {
            sender_id: connection_id,
            event: ChannelEvent::PresenceSync {
                presence: entry.snapshot(),
            },
            echo: true,
        });
        Ok(())
    }

    fn publish(&self, topic: &str, connection_id: Uuid, event: BroadcastEvent) -> Result<(), CollabError> {
        let topics = self.lock();
        let entry = topics
            .get(topic)
            .ok_or_else(|| CollabError::ChannelClosed(topic.to_string()))?;
        entry.publish(Envelope {
            sender_id: connection_id,
            event: event.into(),
            echo: false,
        });
        Ok(())
    }
}

impl RealtimeTransport for LocalHub {
    fn channel(&self, name: &ChannelName, presence_key: &str) -> Result<Arc<dyn RealtimeChannel>, CollabError> {
        Ok(Arc::new(self.open(&name.to_string(), presence_key)))
    }
}

enum Lifecycle {
    Idle,
    Subscribed(JoinHandle<()>),
    Closed,
}

/// A single subscriber's handle on a hub topic
pub struct LocalChannel {
    hub: LocalHub,
    topic: String,
    key: String,
    connection_id: Uuid,
    lifecycle: Mutex<Lifecycle>,
}

impl LocalChannel {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_subscribed(&self) -> Result<(), CollabError> {
        match *self.lifecycle() {
            Lifecycle::Subscribed(_) => Ok(()),
            Lifecycle::Idle => Err(CollabError::NotSubscribed(self.topic.clone())),
            Lifecycle::Closed => Err(CollabError::ChannelClosed(self.topic.clone())),
        }
    }
}

impl RealtimeChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.topic
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), CollabError> {
        let mut lifecycle = self.lifecycle();
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Subscribed(_) => {
                return Err(CollabError::Transport(format!("channel {} already subscribed", self.topic)))
            }
            Lifecycle::Closed => return Err(CollabError::ChannelClosed(self.topic.clone())),
        }

        let (rx, snapshot) = match self.hub.join(&self.topic) {
            Ok(joined) => joined,
            Err(reason) => {
                warn!("Failed to subscribe to channel {}: {}", self.topic, reason);
                let _ = sink.send(ChannelEvent::error(reason));
                return Ok(());
            }
        };

        debug!("Connection {} subscribed to {}", self.connection_id, self.topic);
        let _ = sink.send(ChannelEvent::status(ChannelStatus::Subscribed));
        if !snapshot.is_empty() {
            let _ = sink.send(ChannelEvent::PresenceSync { presence: snapshot });
        }

        let task = tokio::spawn(forward(rx, sink, self.connection_id, self.topic.clone()));
        *lifecycle = Lifecycle::Subscribed(task);
        Ok(())
    }

    fn track(&self, state: PresenceState) -> Result<(), CollabError> {
        self.ensure_subscribed()?;
        self.hub.track(&self.topic, &self.key, self.connection_id, state)
    }

    fn send(&self, event: BroadcastEvent) -> Result<(), CollabError> {
        self.ensure_subscribed()?;
        self.hub.publish(&self.topic, self.connection_id, event)
    }

    fn unsubscribe(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle(), Lifecycle::Closed);
        if let Lifecycle::Subscribed(task) = previous {
            task.abort();
            self.hub.leave(&self.topic, &self.key, self.connection_id);
            debug!("Connection {} left {}", self.connection_id, self.topic);
        }
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn forward(mut rx: broadcast::Receiver<Envelope>, sink: EventSink, me: Uuid, topic: String) {
    loop {
        match rx.recv().await {
            Ok(envelope) => {
                // Skip our own broadcasts to prevent echo
                if envelope.sender_id == me && !envelope.echo {
                    continue;
                }
                if sink.send(envelope.event).is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Subscriber {} on {} lagged, {} message(s) dropped", me, topic, n);
            }
            Err(RecvError::Closed) => {
                let _ = sink.send(ChannelEvent::status(ChannelStatus::Closed));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TypingUpdate;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn state(user_id: &str) -> PresenceState {
        PresenceState {
            user_id: user_id.to_string(),
            user_name: user_id.to_string(),
            user_email: format!("{user_id}@ideavault.test"),
            online_at: Utc::now(),
            cursor_position: None,
            selection_start: None,
            selection_end: None,
        }
    }

    fn typing(user_id: &str) -> BroadcastEvent {
        BroadcastEvent::TypingUpdate(TypingUpdate {
            user_id: user_id.to_string(),
            is_typing: true,
        })
    }

    fn subscribed(channel: &LocalChannel) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe(tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::status(ChannelStatus::Subscribed));
        rx
    }

    #[tokio::test]
    async fn track_syncs_presence_to_everyone_including_self() {
        let hub = LocalHub::new(16, 8);
        let alice = hub.open("idea-1", "alice");
        let bob = hub.open("idea-1", "bob");
        let mut alice_rx = subscribed(&alice);
        let mut bob_rx = subscribed(&bob);

        alice.track(state("alice")).unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.recv().await.unwrap() {
                ChannelEvent::PresenceSync { presence } => {
                    assert_eq!(presence.len(), 1);
                    assert_eq!(presence["alice"][0].user_id, "alice");
                }
                other => panic!("expected presence sync, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn late_subscriber_receives_current_presence() {
        let hub = LocalHub::new(16, 8);
        let alice = hub.open("idea-1", "alice");
        let _alice_rx = subscribed(&alice);
        alice.track(state("alice")).unwrap();

        let bob = hub.open("idea-1", "bob");
        let mut bob_rx = subscribed(&bob);
        assert!(matches!(bob_rx.recv().await.unwrap(), ChannelEvent::PresenceSync { .. }));
    }

    #[tokio::test]
    async fn broadcasts_are_not_echoed_to_the_sender() {
        let hub = LocalHub::new(16, 8);
        let alice = hub.open("idea-1", "alice");
        let bob = hub.open("idea-1", "bob");
        let mut alice_rx = subscribed(&alice);
        let mut bob_rx = subscribed(&bob);

        alice.send(typing("alice")).unwrap();
        assert_eq!(bob_rx.recv().await.unwrap(), ChannelEvent::from(typing("alice")));

        tokio::task::yield_now().await;
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_untracks() {
        let hub = LocalHub::new(16, 8);
        let alice = hub.open("idea-1", "alice");
        let bob = hub.open("idea-1", "bob");
        let _alice_rx = subscribed(&alice);
        let mut bob_rx = subscribed(&bob);
        alice.track(state("alice")).unwrap();
        let _ = bob_rx.recv().await;

        alice.unsubscribe();
        alice.unsubscribe();

        match bob_rx.recv().await.unwrap() {
            ChannelEvent::PresenceSync { presence } => assert!(presence.is_empty()),
            other => panic!("expected presence sync, got {:?}", other),
        }
        assert_eq!(hub.stats(), HubStats { channels: 1, subscribers: 1, tracked: 0 });
        assert!(matches!(alice.send(typing("alice")), Err(CollabError::ChannelClosed(_))));

        bob.unsubscribe();
        assert_eq!(hub.stats().channels, 0);
        assert!(hub.presence("idea-1").is_none());
    }

    #[tokio::test]
    async fn two_connections_under_one_key_are_tracked_separately() {
        let hub = LocalHub::new(16, 8);
        let tab1 = hub.open("idea-1", "alice");
        let tab2 = hub.open("idea-1", "alice");
        let _rx1 = subscribed(&tab1);
        let _rx2 = subscribed(&tab2);
        tab1.track(state("alice")).unwrap();
        tab2.track(state("alice")).unwrap();
        assert_eq!(hub.presence("idea-1").unwrap()["alice"].len(), 2);

        drop(tab1);
        assert_eq!(hub.presence("idea-1").unwrap()["alice"].len(), 1);
    }

    #[tokio::test]
    async fn channel_limit_reports_channel_error() {
        let hub = LocalHub::new(16, 0);
        let channel = hub.open("idea-1", "alice");
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe(tx).unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::Status { status, reason } => {
                assert_eq!(status, ChannelStatus::ChannelError);
                assert!(reason.is_some());
            }
            other => panic!("expected channel error, got {:?}", other),
        }
        assert!(matches!(channel.track(state("alice")), Err(CollabError::NotSubscribed(_))));
        assert_eq!(hub.stats().channels, 0);
    }

    #[tokio::test]
    async fn send_before_subscribe_is_rejected() {
        let hub = LocalHub::new(16, 8);
        let channel = hub.open("idea-1", "alice");
        assert!(matches!(channel.send(typing("alice")), Err(CollabError::NotSubscribed(_))));
    }
}
