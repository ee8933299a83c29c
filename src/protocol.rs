//! Wire protocol: the message catalog exchanged between clients and the
//! gateway. `ClientRequest` is what a connection sends in; `ServerEvent` is
//! what the gateway pushes back, either as a direct ack or as a fan-out to a
//! room's current subscribers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl From<chess::Color> for Color {
    fn from(c: chess::Color) -> Self {
        match c {
            chess::Color::White => Color::White,
            chess::Color::Black => Color::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub white: u64,
    pub black: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub sender: String,
    pub sender_short: String,
    pub message: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Scores {
    pub white: u32,
    pub black: u32,
}

/// One entry of a `listRooms` reply: enough to pick a room to join without
/// a separate `getRoomInfo` round trip.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub game_id: u64,
    pub stake: u64,
    pub time_budget_seconds: u64,
}

/// Requests a connection sends to the gateway. `r#move` avoids colliding
/// with the `move` keyword; it serializes as plain `"move"` on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    CreateRoom {
        game_id: u64,
        stake: u64,
        wallet_address: String,
        time_limit: Option<u64>,
    },
    JoinRoom {
        room_id: String,
        game_id: u64,
        wallet_address: String,
    },
    MakeMove {
        #[serde(rename = "move")]
        r#move: String,
    },
    OfferDraw,
    AcceptDraw,
    DeclineDraw,
    Resign,
    ChatMessage {
        message: String,
    },
    Reconnect {
        wallet_address: String,
        signature: String,
    },
    ListRooms,
    FindRoomByGameId {
        game_id: u64,
    },
    GetRoomInfo {
        room_id: String,
    },
    CheckUsername {
        wallet_address: String,
    },
    SetUsername {
        wallet_address: String,
        username: String,
    },
    Ping,
}

/// Events pushed to clients, either as the ack of their own request or as a
/// broadcast to every current subscriber of a room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    StartGame {
        player_number: u8,
        color: Color,
        opponent: Option<String>,
        timers: ClockSnapshot,
        game_id: u64,
        room_id: String,
        chat_history: Vec<ChatEntry>,
    },
    MoveAccepted {
        #[serde(rename = "move")]
        r#move: String,
        fen: String,
        pgn: String,
        turn: Color,
        player_num: u8,
    },
    MoveRejected {
        reason: String,
    },
    TimerUpdate {
        white: u64,
        black: u64,
    },
    DrawOffered,
    DrawDeclined,
    ChatMessage {
        sender: String,
        sender_short: String,
        message: String,
        timestamp: u64,
    },
    OpponentDisconnected {
        message: String,
    },
    OpponentReconnected {
        message: String,
    },
    GameCancelled {
        reason: String,
    },
    GameEnded {
        winner: String,
        reason: String,
        pgn: String,
        game_id: u64,
        winner_address: Option<String>,
        scores: Scores,
        signature_white: Option<String>,
        signature_black: Option<String>,
    },
    Error {
        message: String,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    RoomInfo {
        room_id: String,
        game_id: u64,
        stake: u64,
        player_count: usize,
        started: bool,
        ended: bool,
        fen: String,
    },
    UsernameStatus {
        wallet_address: String,
        taken: bool,
        handle: Option<String>,
    },
    UsernameSet {
        handle: String,
    },
    Pong,
}
