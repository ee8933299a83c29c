//! The match aggregate: one on-chain game id, two wallets, a board, clocks,
//! and a terminal verdict. See [`state`] for the pure state machine and
//! [`actor`] for the task that serializes access to it.

mod actor;
mod state;

pub use actor::{spawn, RoomHandle, RoomSnapshot};
pub use state::{Events, Outcome, Player, Room, RoomId, SubscriberHandle, Verdict};
