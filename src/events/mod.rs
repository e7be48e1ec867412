//! Change notifications for live list views
//!
//! This module provides:
//! - `ChangeEvent` / `EntityKind`: what changed and which views care
//! - `ChangeBus`: in-process fan-out, mirrored across instances by a
//!   `BroadcastTransport` (`MemoryBroadcast` or `NatsBroadcast`)
//! - `PushClient`: the shared server push connection (`StompTransport`)

mod broadcast;
mod bus;
pub mod nats;
mod push;
pub mod stomp;
mod types;

pub use broadcast::{BroadcastTransport, MemoryBroadcast};
pub use bus::{BusHandler, BusSubscription, ChangeBus};
pub use nats::{connect_nats, NatsBroadcast};
pub use push::{
    FrameStream, PushClient, PushHandler, PushSubscription, PushTransport, DEFAULT_RECONNECT_DELAY,
};
pub use stomp::{StompFrame, StompTransport};
pub use types::{BusMessage, ChangeAction, ChangeEvent, EntityKind, PushMessage};
