//! Error taxonomy for the coordinator.
//!
//! `AppError` is the top-level error used by startup and the admin surface.
//! Per-component errors are surfaced to clients as the stable textual reason
//! codes named in the room/admission/reconnect/username protocols; they are
//! deliberately not folded into one flat enum so each component can evolve
//! its own variants without disturbing the others.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("signer error: {0}")]
    Signer(#[from] crate::signer::SignerError),

    #[error("escrow error: {0}")]
    Escrow(#[from] crate::escrow::EscrowError),

    #[error("gateway network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("initialization error: {0}")]
    Initialization(String),
}

/// Admission-time failures (`createRoom` / `joinRoom`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("RoomNotFound")]
    RoomNotFound,
    #[error("RoomFull")]
    RoomFull,
    #[error("AlreadyStarted")]
    AlreadyStarted,
    #[error("AlreadyInGame")]
    AlreadyInGame,
    #[error("SelfPlay")]
    SelfPlay,
    #[error("StakeVerificationFailed")]
    StakeVerificationFailed,
}

/// Move-application failures (`makeMove`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    #[error("NotParticipant")]
    NotParticipant,
    #[error("NotYourTurn")]
    NotYourTurn,
    #[error("IllegalMove")]
    IllegalMove,
    #[error("InvalidMoveFormat")]
    InvalidMoveFormat,
    #[error("GameOver")]
    GameOver,
}

/// Reconnect-authentication failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    #[error("NoActiveSession")]
    NoActiveSession,
    #[error("RoomNoLongerExists")]
    RoomNoLongerExists,
    #[error("SignatureMismatch")]
    SignatureMismatch,
    #[error("InvalidSignature")]
    InvalidSignature,
}

/// Username registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("AlreadyRegistered")]
    AlreadyRegistered,
    #[error("InvalidFormat")]
    InvalidFormat,
    #[error("Taken")]
    Taken,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("TooManyRequests")]
pub struct RateLimitError;
