//! Typed message-passing over a room-based pub/sub transport.

mod hub;
mod message;
mod ws;

pub use hub::{ConnectionId, Hub};
pub use message::{
    ClientRequest, ControlCommand, Handshake, Outbound, Room, ServerPush, SessionSummary,
    WorkerEvent,
};
pub use ws::{Inbound, WorkerReceiver, WorkerSender, connect_worker, serve};
