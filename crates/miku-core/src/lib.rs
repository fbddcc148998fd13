//! Miku Chess - a two-team board game engine
//!
//! This crate provides the core game logic for Miku Chess, including:
//! - Coordinates and zone geometry for the 10×9 board
//! - Board representation with pieces and the starting layout
//! - Per-kind move generation
//! - Match state machine with turn order, magic effects and terminal states
//!
//! # Architecture
//!
//! The engine is pure and synchronous: no I/O, no clocks, no locking. The
//! server crate wraps one `GameState` per match in its own task.
//!
//! # Modules
//!
//! - [`position`]: Positions, teams, directions and zones
//! - [`board`]: Pieces and the board grid
//! - [`rules`]: Legal destination generation
//! - [`game`]: Match state machine
//! - [`actions`]: Actions, events and move records
//! - [`bot`]: Computer opponent seam

pub mod actions;
pub mod board;
pub mod bot;
pub mod game;
pub mod position;
pub mod rules;

// Re-export commonly used types
pub use actions::{GameAction, GameEvent, MoveRecord};
pub use board::{Board, Piece, PieceKind};
pub use bot::{evaluate_position, Bot, BotDifficulty};
pub use game::{GameError, GameState, GameStateJson, MatchStatus, MAGIC_TURN};
pub use position::{Direction, ParsePositionError, Position, Team, Zone};
pub use rules::{is_retreat, legal_destinations, RuleFlags};
