//! Chess rules engine: legality, terminal-state detection, and FEN/PGN
//! serialization. Each board is private to one room; there is no shared
//! mutable state here and no concurrency to reason about.

mod engine;
mod san;

pub use engine::{ChessEngine, GameTermination, MoveOutcome};
