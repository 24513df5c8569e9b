pub mod channel;
pub mod color;
pub mod debounce;
pub mod editor;
pub mod hub;
pub mod registry;
pub mod session;
pub mod suppressor;
pub mod ws_transport;

pub use channel::{EventSink, RealtimeChannel, RealtimeTransport};
pub use color::color_for;
pub use editor::{EditorSurface, RemoteCursor, ScreenPos, Selection, TextBuffer};
pub use hub::{HubStats, LocalHub};
pub use registry::PresenceRegistry;
pub use session::{
    ChangeOrigin, CollabSession, ConnectionState, SessionEvent, SessionHandle, SessionOptions,
    SessionSnapshot,
};
pub use suppressor::{EchoState, EchoSuppressor};
pub use ws_transport::WsTransport;
