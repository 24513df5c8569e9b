use chrono::Utc;
use serde::Serialize;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::error::CollabError;
use crate::models::{
    BroadcastEvent, ChannelEvent, ChannelName, ChannelStatus, CollaboratorPresence, ContentChange,
    CurrentUser, CursorUpdate, TypingUpdate,
};
use crate::realtime::channel::{RealtimeChannel, RealtimeTransport};
use crate::realtime::debounce::{DebouncedBroadcaster, Outgoing};
use crate::realtime::editor::{apply_remote, remote_cursors, EditorSurface, RemoteCursor, Selection};
use crate::realtime::registry::PresenceRegistry;
use crate::realtime::suppressor::{EchoState, EchoSuppressor};
use crate::utils::scope_guard::Disposers;

/// Timings of one collaborative session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub content_debounce: Duration,
    pub typing_timeout: Duration,
    pub remote_settle: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            content_debounce: Duration::from_millis(300),
            typing_timeout: Duration::from_millis(1000),
            remote_settle: Duration::from_millis(150),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// What the session reports to whoever renders it
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connection(ConnectionState),
    /// The document changed; fired immediately for local edits and after a remote patch
    ContentChanged { content: String, origin: ChangeOrigin },
    CollaboratorsChanged(Vec<CollaboratorPresence>),
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub content: String,
    pub selection: Option<Selection>,
    pub connection: ConnectionState,
    pub echo: EchoState,
    pub collaborators: Vec<CollaboratorPresence>,
    pub remote_cursors: Vec<RemoteCursor>,
}

enum Command {
    Edit(String),
    MoveCursor(Selection),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Close(oneshot::Sender<()>),
}

/// Entry point for a collaborative editing session on one document
pub struct CollabSession;

impl CollabSession {
    /// Open the document's channel and start the session task.
    ///
    /// Must be called from within a tokio runtime. Failure to open or
    /// subscribe the channel is logged and leaves the session disconnected;
    /// local editing keeps working.
    pub fn start(
        transport: &dyn RealtimeTransport,
        channel_name: &ChannelName,
        user: CurrentUser,
        editor: Box<dyn EditorSurface>,
        options: SessionOptions,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (sink, channel_rx) = mpsc::unbounded_channel();

        let channel = match transport.channel(channel_name, &user.id) {
            Ok(channel) => Some(channel),
            Err(e) => {
                error!("Failed to open channel {}: {}", channel_name, e);
                None
            }
        };

        let mut actor = SessionActor {
            channel_name: channel_name.to_string(),
            registry: PresenceRegistry::new(user.id.clone()),
            user,
            channel: channel.clone(),
            editor,
            echo: EchoSuppressor::new(options.remote_settle),
            broadcaster: DebouncedBroadcaster::new(options.content_debounce, options.typing_timeout),
            connection: connection_tx,
            events: events_tx,
            disposers: Disposers::new(),
        };

        if let Some(channel) = &channel {
            actor.set_connection(ConnectionState::Connecting);
            let to_release = channel.clone();
            actor.disposers.push("channel", move || to_release.unsubscribe());
            if let Err(e) = channel.subscribe(sink) {
                error!("Failed to subscribe to channel {}: {}", channel_name, e);
                actor.set_connection(ConnectionState::Disconnected);
            }
        }

        let task = tokio::spawn(actor.run(commands_rx, channel_rx));
        let handle = SessionHandle {
            commands: commands_tx,
            connection: connection_rx,
            channel,
            task: Some(task),
        };
        (handle, events_rx)
    }
}

/// Owner's handle on a running session. Dropping it unsubscribes the channel
/// and stops the session task.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    connection: watch::Receiver<ConnectionState>,
    channel: Option<Arc<dyn RealtimeChannel>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// The editor content changed locally
    pub fn edit(&self, content: impl Into<String>) -> Result<(), CollabError> {
        self.send(Command::Edit(content.into()))
    }

    pub fn move_cursor(&self, selection: Selection) -> Result<(), CollabError> {
        self.send(Command::MoveCursor(selection))
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, CollabError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| CollabError::SessionClosed)
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Backs the Live/Offline indicator
    pub fn is_connected(&self) -> bool {
        self.connection() == ConnectionState::Connected
    }

    pub async fn wait_for_connection(&mut self, state: ConnectionState) -> Result<(), CollabError> {
        self.connection
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| CollabError::SessionClosed)
    }

    /// Tear the session down and wait for it to finish
    pub async fn close(mut self) -> Result<(), CollabError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        let _ = rx.await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), CollabError> {
        self.commands.send(command).map_err(|_| CollabError::SessionClosed)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if let Some(channel) = &self.channel {
                channel.unsubscribe();
            }
            task.abort();
        }
    }
}

struct SessionActor {
    channel_name: String,
    user: CurrentUser,
    channel: Option<Arc<dyn RealtimeChannel>>,
    editor: Box<dyn EditorSurface>,
    registry: PresenceRegistry,
    echo: EchoSuppressor,
    broadcaster: DebouncedBroadcaster,
    connection: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    disposers: Disposers,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let mut channel_events = Some(channel_events);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close(ack)) => {
                        self.teardown();
                        let _ = ack.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut channel_events) => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        channel_events = None;
                        self.on_channel_gone();
                    }
                },
                _ = wait_until(deadline) => self.on_timers(Instant::now()),
            }
        }

        self.teardown();
    }

    fn next_deadline(&self) -> Option<Instant> {
        // While a remote patch settles, local timers wait for it
        self.echo.deadline().or_else(|| self.broadcaster.next_deadline())
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Edit(content) => self.on_local_edit(content),
            Command::MoveCursor(selection) => self.on_local_cursor(selection),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Close(_) => {}
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status { status, reason } => self.on_status(status, reason),
            ChannelEvent::PresenceSync { presence } => {
                self.registry.sync(&presence, Utc::now());
                self.emit_collaborators();
            }
            ChannelEvent::ContentChange(change) => self.on_remote_content(change),
            ChannelEvent::CursorUpdate(update) => {
                if self.registry.apply_cursor(&update, Utc::now()) {
                    self.emit_collaborators();
                }
            }
            ChannelEvent::TypingUpdate(update) => {
                if self.registry.apply_typing(&update, Utc::now()) {
                    self.emit_collaborators();
                }
            }
        }
    }

    fn on_status(&mut self, status: ChannelStatus, reason: Option<String>) {
        let reason = reason.unwrap_or_default();
        match status {
            ChannelStatus::Subscribed => {
                info!("Subscribed to channel {} as {}", self.channel_name, self.user.id);
                self.set_connection(ConnectionState::Connected);
                self.track_presence();
            }
            ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
                error!("Channel {} failed ({:?}): {}", self.channel_name, status, reason);
                self.go_offline();
            }
            ChannelStatus::Closed => {
                info!("Channel {} closed", self.channel_name);
                self.go_offline();
            }
        }
    }

    fn on_channel_gone(&mut self) {
        if self.connection() != ConnectionState::Disconnected {
            warn!("Event stream for channel {} ended", self.channel_name);
            self.go_offline();
        }
    }

    fn track_presence(&mut self) {
        let Some(channel) = &self.channel else {
            return;
        };
        let mut state = self.user.presence_state();
        if let Some(sel) = self.editor.selection() {
            state.cursor_position = Some(sel.start);
            state.selection_start = Some(sel.start);
            state.selection_end = Some(sel.end);
        }
        if let Err(e) = channel.track(state) {
            error!("Failed to track presence on {}: {}", self.channel_name, e);
        }
    }

    fn on_remote_content(&mut self, change: ContentChange) {
        if change.user_id == self.user.id {
            debug!("Ignoring echo of own content on {}", self.channel_name);
            return;
        }
        if let Err(e) = self.echo.begin_remote(Instant::now()) {
            warn!("Dropping remote content from {} on {}: {}", change.user_id, self.channel_name, e);
            return;
        }

        debug!(
            "Applying remote content from {} on {} ({} bytes)",
            change.user_id,
            self.channel_name,
            change.content.len()
        );
        self.broadcaster.discard_pending_content();
        // Peers now hold this content; editing back to our previous snapshot must be sent again
        self.broadcaster.mark_sent(&change.content);
        apply_remote(self.editor.as_mut(), &change.content);
        self.emit(SessionEvent::ContentChanged {
            content: change.content,
            origin: ChangeOrigin::Remote,
        });
    }

    fn on_local_edit(&mut self, content: String) {
        if let Err(e) = self.editor.edit(&content) {
            warn!("Rejected local edit on {}: {}", self.channel_name, e);
            return;
        }
        if !self.echo.allows_local() {
            debug!("Local change on {} while remote change settles, not broadcast", self.channel_name);
            return;
        }

        let cursor = self.editor.selection().map(|sel| sel.start);
        let typing = self.broadcaster.on_local_edit(&content, cursor, Instant::now());
        self.emit(SessionEvent::ContentChanged {
            content,
            origin: ChangeOrigin::Local,
        });
        if let Some(Outgoing::Typing(is_typing)) = typing {
            self.send_typing(is_typing);
        }
    }

    fn on_local_cursor(&mut self, selection: Selection) {
        if !self.echo.allows_local() {
            return;
        }
        if let Err(e) = self.editor.set_selection(selection) {
            warn!("Ignoring cursor move on {}: {}", self.channel_name, e);
            return;
        }
        self.send_local(BroadcastEvent::CursorUpdate(CursorUpdate {
            user_id: self.user.id.clone(),
            cursor_position: selection.start,
            selection_start: selection.start,
            selection_end: selection.end,
        }));
    }

    fn on_timers(&mut self, now: Instant) {
        self.echo.settle(now);
        if !self.echo.allows_local() {
            return;
        }

        for outgoing in self.broadcaster.poll(now) {
            match outgoing {
                Outgoing::Content {
                    content,
                    cursor_position,
                } => {
                    let change = ContentChange {
                        content,
                        user_id: self.user.id.clone(),
                        user_email: self.user.email.clone(),
                        timestamp: Utc::now(),
                        cursor_position,
                    };
                    let sent_content = change.content.clone();
                    if self.send_local(BroadcastEvent::ContentChange(change)) {
                        self.broadcaster.mark_sent(&sent_content);
                    }
                }
                Outgoing::Typing(is_typing) => self.send_typing(is_typing),
            }
        }
    }

    fn send_typing(&mut self, is_typing: bool) {
        self.send_local(BroadcastEvent::TypingUpdate(TypingUpdate {
            user_id: self.user.id.clone(),
            is_typing,
        }));
    }

    /// Put a local event on the channel. Returns whether it was handed to the transport.
    fn send_local(&mut self, event: BroadcastEvent) -> bool {
        if self.connection() != ConnectionState::Connected {
            debug!("Offline, not broadcasting on {}", self.channel_name);
            return false;
        }
        let Some(channel) = &self.channel else {
            return false;
        };
        if let Err(e) = self.echo.begin_local() {
            debug!("Not broadcasting on {}: {}", self.channel_name, e);
            return false;
        }
        let result = channel.send(event);
        self.echo.end_local();

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to broadcast on {}: {}", self.channel_name, e);
                false
            }
        }
    }

    fn go_offline(&mut self) {
        self.set_connection(ConnectionState::Disconnected);
        if !self.registry.collaborators().is_empty() {
            self.registry.clear();
            self.emit_collaborators();
        }
    }

    fn teardown(&mut self) {
        self.broadcaster.cancel();
        self.echo.reset();
        self.disposers.dispose();
        self.registry.clear();
        self.set_connection(ConnectionState::Disconnected);
        info!("Session on {} closed", self.channel_name);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            content: self.editor.content().to_string(),
            selection: self.editor.selection(),
            connection: self.connection(),
            echo: self.echo.state(),
            collaborators: self.registry.collaborators().to_vec(),
            remote_cursors: remote_cursors(self.editor.as_ref(), self.registry.collaborators()),
        }
    }

    fn connection(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection() == state {
            return;
        }
        debug!("Channel {} is now {:?}", self.channel_name, state);
        self.connection.send_replace(state);
        self.emit(SessionEvent::Connection(state));
    }

    fn emit_collaborators(&self) {
        self.emit(SessionEvent::CollaboratorsChanged(self.registry.collaborators().to_vec()));
    }

    fn emit(&self, event: SessionEvent) {
        // The owner may have stopped listening; the session keeps running regardless
        let _ = self.events.send(event);
    }
}

async fn next_event(rx: &mut Option<mpsc::UnboundedReceiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
