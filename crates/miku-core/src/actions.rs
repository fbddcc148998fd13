//! Game actions that players can take.
//!
//! This module defines all possible actions in the game and the events
//! that result from those actions.

use crate::board::Piece;
use crate::position::{Position, Team};
use serde::{Deserialize, Serialize};

/// All possible actions a player can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameAction {
    /// Move the piece at `from` to `to`, capturing whatever enemy is there
    Move { from: Position, to: Position },
    /// Give up the optional second move of the double-move window
    SkipSecondMove,
}

/// Events that occur as a result of actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEvent {
    /// A piece was relocated
    PieceMoved {
        team: Team,
        from: Position,
        to: Position,
    },

    /// An enemy piece was removed from the board
    PieceCaptured { piece: Piece, at: Position },

    /// A team lost its magic piece and can no longer retreat
    MagicBroken { team: Team },

    /// Red may move once more before the turn passes
    SecondMoveGranted { at: Position },

    /// The second move was declined
    SecondMoveSkipped,

    /// The turn passed to the other team
    TurnChanged { turn_number: u32, team: Team },

    /// A victory piece was captured
    GameWon { team: Team },

    /// The side to move has no legal move
    GameDrawn,
}

/// One accepted move, as kept in the match history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub turn: u32,
    pub team: Team,
    pub from: Position,
    pub to: Position,
    pub captured: Option<Piece>,
}
