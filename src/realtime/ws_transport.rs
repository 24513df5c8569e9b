use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::error::CollabError;
use crate::models::{BroadcastEvent, ChannelEvent, ChannelName, ChannelStatus, ClientFrame, PresenceState};
use crate::realtime::channel::{EventSink, RealtimeChannel, RealtimeTransport};

/// Reaches a hub running in another process through its WebSocket bridge
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
    token: Option<String>,
    max_content_bytes: usize,
}

impl WsTransport {
    /// `base_url` is the server root, e.g. `ws://127.0.0.1:3000`
    pub fn new(base_url: impl Into<String>, max_content_bytes: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            max_content_bytes,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Bridge endpoint for a channel. Without a token the server identifies us by `user_id`.
    fn channel_url(&self, name: &ChannelName, presence_key: &str) -> String {
        match &self.token {
            Some(_) => format!("{}/ws/{}", self.base_url, name),
            None => format!("{}/ws/{}?user_id={}", self.base_url, name, urlencoding::encode(presence_key)),
        }
    }
}

impl RealtimeTransport for WsTransport {
    fn channel(&self, name: &ChannelName, presence_key: &str) -> Result<Arc<dyn RealtimeChannel>, CollabError> {
        Ok(Arc::new(WsChannel {
            name: name.to_string(),
            url: self.channel_url(name, presence_key),
            token: self.token.clone(),
            max_content_bytes: self.max_content_bytes,
            outgoing: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct WsChannel {
    name: String,
    url: String,
    token: Option<String>,
    max_content_bytes: usize,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    closed: AtomicBool,
}

impl WsChannel {
    fn push(&self, frame: ClientFrame) -> Result<(), CollabError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CollabError::ChannelClosed(self.name.clone()));
        }
        let outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        match outgoing.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| CollabError::ChannelClosed(self.name.clone())),
            None => Err(CollabError::NotSubscribed(self.name.clone())),
        }
    }
}

impl RealtimeChannel for WsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, sink: EventSink) -> Result<(), CollabError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CollabError::ChannelClosed(self.name.clone()));
        }
        let mut outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        if outgoing.is_some() {
            return Err(CollabError::Transport(format!("channel {} already subscribed", self.name)));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| CollabError::Transport(format!("invalid url {}: {}", self.url, e)))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| CollabError::Transport(format!("invalid token: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *outgoing = Some(tx);
        tokio::spawn(run_socket(request, rx, sink, self.name.clone(), self.max_content_bytes));
        Ok(())
    }

    fn track(&self, state: PresenceState) -> Result<(), CollabError> {
        self.push(ClientFrame::Track { presence: state })
    }

    fn send(&self, event: BroadcastEvent) -> Result<(), CollabError> {
        self.push(ClientFrame::Broadcast { payload: event })
    }

    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender makes the socket task send a close frame and exit
        self.outgoing.lock().unwrap_or_else(PoisonError::into_inner).take();
        debug!("Unsubscribed from {}", self.name);
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_socket(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    mut outgoing: mpsc::UnboundedReceiver<ClientFrame>,
    sink: EventSink,
    name: String,
    max_content_bytes: usize,
) {
    let (stream, _) = match connect_async(request).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("Failed to connect channel {}: {}", name, e);
            let _ = sink.send(ChannelEvent::error(format!("connect failed: {}", e)));
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to encode frame for {}: {}", name, e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        let _ = sink.send(ChannelEvent::error(format!("send failed: {}", e)));
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match ChannelEvent::parse(text.as_str(), max_content_bytes) {
                    Ok(event) => {
                        if sink.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping malformed frame on {}: {}", name, e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = sink.send(ChannelEvent::status(ChannelStatus::Closed));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = sink.send(ChannelEvent::error(e.to_string()));
                    break;
                }
            },
        }
    }
    debug!("Socket for {} finished", name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_key_is_percent_encoded_in_the_url() {
        let transport = WsTransport::new("ws://127.0.0.1:3000/", 1024);
        let name = ChannelName::idea("1").unwrap();
        assert_eq!(transport.channel_url(&name, "user-1_a.b~"), "ws://127.0.0.1:3000/ws/idea-1?user_id=user-1_a.b~");
        assert_eq!(transport.channel_url(&name, "a b&c"), "ws://127.0.0.1:3000/ws/idea-1?user_id=a%20b%26c");
        assert_eq!(transport.channel_url(&name, "é"), "ws://127.0.0.1:3000/ws/idea-1?user_id=%C3%A9");
    }

    #[test]
    fn token_replaces_the_user_id_parameter() {
        let transport = WsTransport::new("ws://127.0.0.1:3000", 1024).with_token("jwt");
        let name = ChannelName::blocknote("7").unwrap();
        assert_eq!(transport.channel_url(&name, "a b"), "ws://127.0.0.1:3000/ws/blocknote-7");
    }

    #[tokio::test]
    async fn unreachable_server_reports_channel_error() {
        // Grab a free port and release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WsTransport::new(format!("ws://127.0.0.1:{}", port), 1024);
        let channel = transport.channel(&ChannelName::idea("1").unwrap(), "alice").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        channel.subscribe(tx).unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::Status { status, .. } => assert_eq!(status, ChannelStatus::ChannelError),
            other => panic!("expected channel error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn track_after_unsubscribe_is_rejected() {
        let transport = WsTransport::new("ws://127.0.0.1:9", 1024);
        let channel = transport.channel(&ChannelName::idea("1").unwrap(), "alice").unwrap();
        channel.unsubscribe();
        channel.unsubscribe();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(channel.subscribe(tx), Err(CollabError::ChannelClosed(_))));
    }
}
