pub mod address;
pub mod chess;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod network;
pub mod protocol;
pub mod reconnect;
pub mod room;
pub mod rpc;
pub mod shutdown;
pub mod signer;
pub mod username;
