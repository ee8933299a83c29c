//! Operator-facing admin/health surface: a small line-delimited JSON-RPC TCP
//! listener, deliberately separate from the player-facing websocket gateway.

mod server;

pub use server::AdminServer;
