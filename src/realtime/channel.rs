use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::CollabError;
use crate::models::{BroadcastEvent, ChannelEvent, ChannelName, PresenceState};

/// Where a channel delivers statuses, presence syncs and broadcasts
pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;

/// One subscription to a named real-time topic.
///
/// The sink passed to `subscribe` is the only handler, so everything is
/// registered before the first event can arrive.
pub trait RealtimeChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Start delivering events. Failures after this call arrive on the sink
    /// as a `ChannelError` status.
    fn subscribe(&self, sink: EventSink) -> Result<(), CollabError>;

    /// Publish this participant's presence, replacing what was tracked before
    fn track(&self, state: PresenceState) -> Result<(), CollabError>;

    /// Broadcast to every other subscriber; never echoed to the sender
    fn send(&self, event: BroadcastEvent) -> Result<(), CollabError>;

    /// Release the subscription. Safe to call more than once.
    fn unsubscribe(&self);
}

/// Factory for channels, e.g. an in-process hub or a remote service
pub trait RealtimeTransport: Send + Sync {
    fn channel(&self, name: &ChannelName, presence_key: &str) -> Result<Arc<dyn RealtimeChannel>, CollabError>;
}
