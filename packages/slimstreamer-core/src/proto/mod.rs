//! SlimProto wire codec and the session/streamer state machines built on it.

pub mod codec;
pub mod command_session;
pub mod scheduler;
pub mod streamer;
pub mod streaming_session;

pub use codec::{HeloCommand, InboundCommand, StatCommand, StrmStartParams};
pub use command_session::{CommandSession, CommandSessionState};
pub use scheduler::Scheduler;
pub use streamer::{Event, Streamer, StreamerState};
pub use streaming_session::StreamingSession;
