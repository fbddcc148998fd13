//! Extension seam for computer opponents.
//!
//! A bot reads the current `GameState`, proposes a `GameAction`, and that
//! action goes through the exact same `apply_action` validation as a human
//! move. The only strategy shipped here is a uniform random choice, which
//! doubles as a fuzzer for the rules engine.

use crate::actions::GameAction;
use crate::board::PieceKind;
use crate::game::GameState;
use crate::position::Team;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Bot difficulty level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotDifficulty {
    /// Uniformly random legal action
    Easy,
}

/// A bot player that can decide on actions
pub struct Bot {
    pub team: Team,
    pub difficulty: BotDifficulty,
    rng: StdRng,
}

impl Bot {
    pub fn new(team: Team, difficulty: BotDifficulty) -> Self {
        Self {
            team,
            difficulty,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(team: Team, difficulty: BotDifficulty, seed: u64) -> Self {
        Self {
            team,
            difficulty,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Choose an action from the valid actions, `None` when it is not this
    /// bot's turn or nothing is available
    pub fn choose_action(&mut self, game: &GameState) -> Option<GameAction> {
        let valid_actions = game.valid_actions(self.team);
        match self.difficulty {
            BotDifficulty::Easy => valid_actions.choose(&mut self.rng).copied(),
        }
    }
}

/// Material balance, positive favours red
pub fn evaluate_position(game: &GameState) -> i32 {
    game.board
        .pieces()
        .map(|(_, piece)| {
            let value = piece_value(piece.kind);
            match piece.team {
                Team::Red => value,
                Team::Blue => -value,
            }
        })
        .sum()
}

fn piece_value(kind: PieceKind) -> i32 {
    match kind {
        PieceKind::Attacker | PieceKind::Defender => 5,
        PieceKind::Support => 4,
        PieceKind::Magic => 3,
        PieceKind::Victory => 100,
    }
}
