pub mod channel;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod messages;
pub mod presence;

pub use channel::*;
pub use diagnostics::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use presence::*;
