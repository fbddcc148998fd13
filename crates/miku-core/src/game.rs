//! Core game state machine.
//!
//! This module contains the main `GameState` struct and all turn logic:
//! move validation, captures and their side effects, the turn-11 double move
//! and freeze, and terminal detection.

use crate::actions::{GameAction, GameEvent, MoveRecord};
use crate::board::{Board, PieceKind};
use crate::position::{Position, Team};
use crate::rules::{self, RuleFlags};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Turn on which the magic effects fire
pub const MAGIC_TURN: u32 = 11;

/// Match status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for the second participant
    Waiting,
    /// Moves are accepted
    Playing,
    RedWin,
    BlueWin,
    Draw,
}

impl MatchStatus {
    /// The winning status for a team
    pub const fn win_for(team: Team) -> Self {
        match team {
            Team::Red => MatchStatus::RedWin,
            Team::Blue => MatchStatus::BlueWin,
        }
    }

    /// No further transitions once terminal
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::RedWin | MatchStatus::BlueWin | MatchStatus::Draw
        )
    }

    pub const fn winner(&self) -> Option<Team> {
        match self {
            MatchStatus::RedWin => Some(Team::Red),
            MatchStatus::BlueWin => Some(Team::Blue),
            _ => None,
        }
    }
}

/// Errors that can occur when applying actions
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GameError {
    #[error("Not your turn")]
    NotYourTurn,

    #[error("Match is not in progress")]
    MatchNotPlaying,

    #[error("Illegal move")]
    IllegalMove,

    #[error("Piece is frozen this turn")]
    PositionFrozen,

    #[error("No piece at source position")]
    NoPieceAtSource,

    #[error("No second move to skip")]
    NoPendingSecondMove,
}

/// The complete match state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    /// The game board
    pub board: Board,
    /// Turn number (starts at 1, one turn per move)
    pub turn_number: u32,
    /// Team to move
    pub current_team: Team,
    pub status: MatchStatus,
    pub blue_magic_alive: bool,
    pub red_magic_alive: bool,
    pub blue_cannot_retreat: bool,
    pub red_cannot_retreat: bool,
    /// Set after red's first move of the double-move window
    pub pending_second_move: Option<Position>,
    /// Every accepted move, oldest first
    pub move_history: Vec<MoveRecord>,
}

impl GameState {
    /// Create a match on the standard layout, waiting for players
    pub fn new() -> Self {
        let mut state = Self::from_board(Board::standard());
        state.status = MatchStatus::Waiting;
        state
    }

    /// Create a playing match from an arbitrary board, red to move on turn 1.
    ///
    /// Magic flags follow from which magic pieces are present.
    pub fn from_board(board: Board) -> Self {
        let red_magic_alive = board.find(Team::Red, PieceKind::Magic).is_some();
        let blue_magic_alive = board.find(Team::Blue, PieceKind::Magic).is_some();
        Self {
            board,
            turn_number: 1,
            current_team: Team::Red,
            status: MatchStatus::Playing,
            blue_magic_alive,
            red_magic_alive,
            blue_cannot_retreat: !blue_magic_alive,
            red_cannot_retreat: !red_magic_alive,
            pending_second_move: None,
            move_history: Vec::new(),
        }
    }

    /// Move from `waiting` to `playing`. Returns false from any other status.
    pub fn start(&mut self) -> bool {
        if self.status != MatchStatus::Waiting {
            return false;
        }
        self.status = MatchStatus::Playing;
        true
    }

    /// Check if the game is finished
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Get the winner if the game is finished
    pub fn get_winner(&self) -> Option<Team> {
        self.status.winner()
    }

    /// Flags handed to the move rules
    pub fn rule_flags(&self) -> RuleFlags {
        RuleFlags {
            red_cannot_retreat: self.red_cannot_retreat,
            blue_cannot_retreat: self.blue_cannot_retreat,
        }
    }

    pub fn magic_alive(&self, team: Team) -> bool {
        match team {
            Team::Red => self.red_magic_alive,
            Team::Blue => self.blue_magic_alive,
        }
    }

    /// Blue's magic freezes red pieces in the blue half on turn 11.
    /// Derived from the current state on every call, never stored.
    pub fn freeze_active(&self) -> bool {
        self.turn_number == MAGIC_TURN && self.blue_magic_alive && self.current_team == Team::Red
    }

    pub fn is_frozen(&self, pos: Position) -> bool {
        self.freeze_active()
            && pos.half() == Team::Blue
            && self
                .board
                .piece_at(pos)
                .is_some_and(|piece| piece.team == Team::Red)
    }

    /// Positions that cannot be moved from this turn
    pub fn frozen_positions(&self) -> Vec<Position> {
        if !self.freeze_active() {
            return Vec::new();
        }
        self.board
            .team_pieces(Team::Red)
            .map(|(pos, _)| pos)
            .filter(|pos| pos.half() == Team::Blue)
            .collect()
    }

    /// Legal destinations for the piece at `from`, as shown to the player.
    ///
    /// Empty unless the match is playing, the piece belongs to the side to
    /// move, and it is not frozen.
    pub fn legal_moves_from(&self, from: Position) -> Vec<Position> {
        if self.status != MatchStatus::Playing {
            return Vec::new();
        }
        match self.board.piece_at(from) {
            Some(piece) if piece.team == self.current_team => {}
            _ => return Vec::new(),
        }
        if self.is_frozen(from) {
            return Vec::new();
        }
        rules::legal_destinations(&self.board, from, &self.rule_flags())
    }

    /// Every (from, to) pair available to `team`, freeze applied
    pub fn all_legal_moves(&self, team: Team) -> Vec<(Position, Position)> {
        let flags = self.rule_flags();
        self.board
            .team_pieces(team)
            .filter(|(pos, _)| !self.is_frozen(*pos))
            .flat_map(|(from, _)| {
                rules::legal_destinations(&self.board, from, &flags)
                    .into_iter()
                    .map(move |to| (from, to))
            })
            .collect()
    }

    fn has_any_legal_move(&self, team: Team) -> bool {
        let flags = self.rule_flags();
        self.board
            .team_pieces(team)
            .filter(|(pos, _)| !self.is_frozen(*pos))
            .any(|(from, _)| !rules::legal_destinations(&self.board, from, &flags).is_empty())
    }

    /// Get all currently valid actions for a team
    pub fn valid_actions(&self, team: Team) -> Vec<GameAction> {
        if self.status != MatchStatus::Playing || team != self.current_team {
            return Vec::new();
        }

        let mut actions: Vec<GameAction> = self
            .all_legal_moves(team)
            .into_iter()
            .map(|(from, to)| GameAction::Move { from, to })
            .collect();

        if self.pending_second_move.is_some() {
            actions.push(GameAction::SkipSecondMove);
        }

        actions
    }

    /// Whether `team`'s victory piece could be captured by the opponent's
    /// next move. Informational only.
    pub fn is_victory_threatened(&self, team: Team) -> bool {
        match self.board.find(team, PieceKind::Victory) {
            Some(victory) => {
                rules::is_attacked(&self.board, victory, team.opponent(), &self.rule_flags())
            }
            None => false,
        }
    }

    /// Apply an action to the game state
    pub fn apply_action(
        &mut self,
        team: Team,
        action: GameAction,
    ) -> Result<Vec<GameEvent>, GameError> {
        match action {
            GameAction::Move { from, to } => self.apply_move(team, from, to),
            GameAction::SkipSecondMove => self.apply_skip(team),
        }
    }

    /// Validate and apply a move. On error the state is untouched.
    pub fn apply_move(
        &mut self,
        team: Team,
        from: Position,
        to: Position,
    ) -> Result<Vec<GameEvent>, GameError> {
        self.validate_move(team, from, to)?;

        let mut events = Vec::new();

        let piece = self.board.remove(from).ok_or(GameError::NoPieceAtSource)?;
        let captured = self.board.place(to, piece);

        events.push(GameEvent::PieceMoved { team, from, to });
        self.move_history.push(MoveRecord {
            turn: self.turn_number,
            team,
            from,
            to,
            captured,
        });

        if let Some(captured) = captured {
            events.push(GameEvent::PieceCaptured {
                piece: captured,
                at: to,
            });

            match captured.kind {
                PieceKind::Magic => {
                    self.break_magic(captured.team);
                    events.push(GameEvent::MagicBroken {
                        team: captured.team,
                    });
                }
                PieceKind::Victory => {
                    self.status = MatchStatus::win_for(team);
                    self.pending_second_move = None;
                    events.push(GameEvent::GameWon { team });
                    return Ok(events);
                }
                _ => {}
            }
        }

        if self.opens_double_move() {
            self.pending_second_move = Some(to);
            events.push(GameEvent::SecondMoveGranted { at: to });
        } else {
            self.pass_turn(&mut events);
        }

        Ok(events)
    }

    /// Decline the second move of the double-move window
    pub fn apply_skip(&mut self, team: Team) -> Result<Vec<GameEvent>, GameError> {
        if self.status != MatchStatus::Playing {
            return Err(GameError::MatchNotPlaying);
        }
        if team != self.current_team {
            return Err(GameError::NotYourTurn);
        }
        if self.pending_second_move.is_none() {
            return Err(GameError::NoPendingSecondMove);
        }

        let mut events = vec![GameEvent::SecondMoveSkipped];
        self.pass_turn(&mut events);
        Ok(events)
    }

    // ==================== Helper Methods ====================

    fn validate_move(&self, team: Team, from: Position, to: Position) -> Result<(), GameError> {
        if self.status != MatchStatus::Playing {
            return Err(GameError::MatchNotPlaying);
        }

        if team != self.current_team {
            return Err(GameError::NotYourTurn);
        }

        let piece = self
            .board
            .piece_at(from)
            .ok_or(GameError::NoPieceAtSource)?;

        if piece.team != team {
            return Err(GameError::IllegalMove);
        }

        if self.is_frozen(from) {
            return Err(GameError::PositionFrozen);
        }

        if !rules::is_legal(&self.board, from, to, &self.rule_flags()) {
            return Err(GameError::IllegalMove);
        }

        Ok(())
    }

    /// Losing the magic piece is permanent and bans retreating
    fn break_magic(&mut self, team: Team) {
        match team {
            Team::Red => {
                self.red_magic_alive = false;
                self.red_cannot_retreat = true;
            }
            Team::Blue => {
                self.blue_magic_alive = false;
                self.blue_cannot_retreat = true;
            }
        }
    }

    /// Red's first move on turn 11 with its magic alive earns a second move
    fn opens_double_move(&self) -> bool {
        self.turn_number == MAGIC_TURN
            && self.current_team == Team::Red
            && self.red_magic_alive
            && self.pending_second_move.is_none()
    }

    /// Hand the turn to the other team and check for a stalemate draw
    fn pass_turn(&mut self, events: &mut Vec<GameEvent>) {
        self.pending_second_move = None;
        self.turn_number += 1;
        self.current_team = self.current_team.opponent();

        events.push(GameEvent::TurnChanged {
            turn_number: self.turn_number,
            team: self.current_team,
        });

        if !self.has_any_legal_move(self.current_team) {
            self.status = MatchStatus::Draw;
            events.push(GameEvent::GameDrawn);
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

/// Full state as sent to clients, with the derived fields filled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStateJson {
    #[serde(flatten)]
    pub state: GameState,
    /// Pieces that cannot move this turn
    pub frozen: Vec<Position>,
    /// Whether the side to move has its victory piece under attack
    pub victory_threatened: bool,
}

impl From<&GameState> for GameStateJson {
    fn from(state: &GameState) -> Self {
        Self {
            frozen: state.frozen_positions(),
            victory_threatened: state.is_victory_threatened(state.current_team),
            state: state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Piece;
    use pretty_assertions::assert_eq;

    fn pos(row: i8, col: i8) -> Position {
        Position::new(row, col).unwrap()
    }

    fn playing() -> GameState {
        let mut game = GameState::new();
        assert!(game.start());
        game
    }

    #[test]
    fn test_new_game_is_waiting() {
        let game = GameState::new();
        assert_eq!(game.status, MatchStatus::Waiting);
        assert_eq!(game.turn_number, 1);
        assert_eq!(game.current_team, Team::Red);
        assert!(game.red_magic_alive && game.blue_magic_alive);
        assert!(!game.red_cannot_retreat && !game.blue_cannot_retreat);
        assert_eq!(game.pending_second_move, None);
    }

    #[test]
    fn test_waiting_match_rejects_moves() {
        let mut game = GameState::new();
        let err = game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap_err();
        assert_eq!(err, GameError::MatchNotPlaying);
        assert!(game.legal_moves_from(pos(9, 0)).is_empty());
    }

    #[test]
    fn test_start_only_from_waiting() {
        let mut game = GameState::new();
        assert!(game.start());
        assert!(!game.start());
        assert_eq!(game.status, MatchStatus::Playing);
    }

    #[test]
    fn test_opening_move_advances_turn() {
        let mut game = playing();
        let events = game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap();
        assert_eq!(game.turn_number, 2);
        assert_eq!(game.current_team, Team::Blue);
        assert_eq!(
            events,
            vec![
                GameEvent::PieceMoved {
                    team: Team::Red,
                    from: pos(9, 0),
                    to: pos(8, 0)
                },
                GameEvent::TurnChanged {
                    turn_number: 2,
                    team: Team::Blue
                },
            ]
        );
        assert_eq!(game.move_history.len(), 1);
        assert_eq!(game.move_history[0].turn, 1);
    }

    #[test]
    fn test_error_kinds() {
        let mut game = playing();
        assert_eq!(
            game.apply_move(Team::Blue, pos(0, 0), pos(1, 0)),
            Err(GameError::NotYourTurn)
        );
        assert_eq!(
            game.apply_move(Team::Red, pos(4, 4), pos(3, 4)),
            Err(GameError::NoPieceAtSource)
        );
        assert_eq!(
            game.apply_move(Team::Red, pos(0, 0), pos(1, 0)),
            Err(GameError::IllegalMove)
        );
        // Attacker at 9A is boxed in by its own defender at 7A after one step
        assert_eq!(
            game.apply_move(Team::Red, pos(9, 0), pos(6, 0)),
            Err(GameError::IllegalMove)
        );
        assert_eq!(game.apply_skip(Team::Red), Err(GameError::NoPendingSecondMove));
        assert_eq!(game.turn_number, 1);
        assert_eq!(game.board, Board::standard());
        assert!(game.move_history.is_empty());
    }

    #[test]
    fn test_capturing_magic_sets_flags() {
        let mut board = Board::new();
        board.place(pos(9, 4), Piece::new(Team::Red, PieceKind::Victory));
        board.place(pos(0, 4), Piece::new(Team::Blue, PieceKind::Victory));
        board.place(pos(7, 4), Piece::new(Team::Red, PieceKind::Magic));
        board.place(pos(2, 4), Piece::new(Team::Blue, PieceKind::Magic));
        board.place(pos(7, 1), Piece::new(Team::Blue, PieceKind::Defender));
        board.place(pos(9, 0), Piece::new(Team::Red, PieceKind::Attacker));
        let mut game = GameState::from_board(board);

        game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap();
        let events = game.apply_move(Team::Blue, pos(7, 1), pos(7, 4)).unwrap();

        assert!(events.contains(&GameEvent::PieceCaptured {
            piece: Piece::new(Team::Red, PieceKind::Magic),
            at: pos(7, 4),
        }));
        assert!(events.contains(&GameEvent::MagicBroken { team: Team::Red }));
        assert!(!game.red_magic_alive);
        assert!(game.red_cannot_retreat);
        assert!(game.blue_magic_alive);
        assert!(!game.blue_cannot_retreat);
        assert_eq!(game.status, MatchStatus::Playing);
        assert_eq!(
            game.move_history.last().and_then(|m| m.captured),
            Some(Piece::new(Team::Red, PieceKind::Magic))
        );
    }

    #[test]
    fn test_victory_capture_ends_game() {
        let mut board = Board::new();
        board.place(pos(9, 4), Piece::new(Team::Red, PieceKind::Victory));
        board.place(pos(0, 4), Piece::new(Team::Blue, PieceKind::Victory));
        board.place(pos(5, 4), Piece::new(Team::Red, PieceKind::Attacker));
        board.place(pos(1, 0), Piece::new(Team::Blue, PieceKind::Attacker));
        let mut game = GameState::from_board(board);

        let events = game.apply_move(Team::Red, pos(5, 4), pos(0, 4)).unwrap();
        assert!(events.contains(&GameEvent::GameWon { team: Team::Red }));
        assert_eq!(game.status, MatchStatus::RedWin);
        assert_eq!(game.get_winner(), Some(Team::Red));
        assert_eq!(game.turn_number, 1, "turn machine halts");

        assert_eq!(
            game.apply_move(Team::Blue, pos(1, 0), pos(2, 0)),
            Err(GameError::MatchNotPlaying)
        );
        assert_eq!(
            game.apply_move(Team::Red, pos(0, 4), pos(1, 4)),
            Err(GameError::MatchNotPlaying)
        );
        assert!(game.valid_actions(Team::Red).is_empty());
    }

    #[test]
    fn test_stalemate_is_draw() {
        // A lone blue magic piece stranded outside its zone cannot move
        let mut board = Board::new();
        board.place(pos(9, 4), Piece::new(Team::Red, PieceKind::Victory));
        board.place(pos(0, 0), Piece::new(Team::Blue, PieceKind::Magic));
        let mut game = GameState::from_board(board);

        let events = game.apply_move(Team::Red, pos(9, 4), pos(8, 4)).unwrap();
        assert_eq!(game.status, MatchStatus::Draw);
        assert_eq!(events.last(), Some(&GameEvent::GameDrawn));
        assert_eq!(
            game.apply_move(Team::Blue, pos(0, 0), pos(0, 1)),
            Err(GameError::MatchNotPlaying)
        );
    }

    #[test]
    fn test_freeze_is_derived() {
        let mut board = Board::standard();
        board.remove(pos(9, 0));
        board.place(pos(3, 0), Piece::new(Team::Red, PieceKind::Attacker));
        let mut game = GameState::from_board(board);

        assert!(game.frozen_positions().is_empty());
        game.turn_number = MAGIC_TURN;
        assert_eq!(game.frozen_positions(), vec![pos(3, 0)]);
        assert!(game.is_frozen(pos(3, 0)));
        assert!(!game.is_frozen(pos(7, 0)));
        assert!(game.legal_moves_from(pos(3, 0)).is_empty());

        game.blue_magic_alive = false;
        assert!(game.frozen_positions().is_empty());
        assert!(!game.legal_moves_from(pos(3, 0)).is_empty());
    }

    #[test]
    fn test_frozen_source_rejected() {
        let mut board = Board::standard();
        board.remove(pos(9, 0));
        board.place(pos(3, 0), Piece::new(Team::Red, PieceKind::Attacker));
        let mut game = GameState::from_board(board);
        game.turn_number = MAGIC_TURN;

        assert_eq!(
            game.apply_move(Team::Red, pos(3, 0), pos(4, 0)),
            Err(GameError::PositionFrozen)
        );
        // Checked before destination legality
        assert_eq!(
            game.apply_move(Team::Red, pos(3, 0), pos(1, 0)),
            Err(GameError::PositionFrozen)
        );
    }

    #[test]
    fn test_double_move_window_then_second_move() {
        let mut game = playing();
        game.turn_number = MAGIC_TURN;

        let events = game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap();
        assert!(events.contains(&GameEvent::SecondMoveGranted { at: pos(8, 0) }));
        assert_eq!(game.turn_number, MAGIC_TURN);
        assert_eq!(game.current_team, Team::Red);
        assert_eq!(game.pending_second_move, Some(pos(8, 0)));
        assert!(game
            .valid_actions(Team::Red)
            .contains(&GameAction::SkipSecondMove));

        // Any legal red move closes the window
        game.apply_move(Team::Red, pos(9, 8), pos(8, 8)).unwrap();
        assert_eq!(game.turn_number, MAGIC_TURN + 1);
        assert_eq!(game.current_team, Team::Blue);
        assert_eq!(game.pending_second_move, None);
    }

    #[test]
    fn test_double_move_window_skip() {
        let mut game = playing();
        game.turn_number = MAGIC_TURN;
        game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap();

        assert_eq!(game.apply_skip(Team::Blue), Err(GameError::NotYourTurn));
        let events = game.apply_skip(Team::Red).unwrap();
        assert_eq!(events[0], GameEvent::SecondMoveSkipped);
        assert_eq!(game.turn_number, MAGIC_TURN + 1);
        assert_eq!(game.current_team, Team::Blue);
        assert_eq!(game.pending_second_move, None);
        assert_eq!(game.apply_skip(Team::Blue), Err(GameError::NoPendingSecondMove));
    }

    #[test]
    fn test_no_double_move_without_red_magic() {
        let mut game = playing();
        game.turn_number = MAGIC_TURN;
        game.red_magic_alive = false;
        game.red_cannot_retreat = true;

        game.apply_move(Team::Red, pos(9, 0), pos(8, 0)).unwrap();
        assert_eq!(game.pending_second_move, None);
        assert_eq!(game.turn_number, MAGIC_TURN + 1);
        assert_eq!(game.current_team, Team::Blue);
    }

    #[test]
    fn test_legal_moves_from_only_for_side_to_move() {
        let game = playing();
        assert_eq!(game.legal_moves_from(pos(9, 0)), vec![pos(8, 0)]);
        assert!(game.legal_moves_from(pos(0, 0)).is_empty());
        assert_eq!(
            game.legal_moves_from(pos(9, 0)),
            game.legal_moves_from(pos(9, 0))
        );
    }

    #[test]
    fn test_victory_threat() {
        let mut board = Board::new();
        board.place(pos(9, 4), Piece::new(Team::Red, PieceKind::Victory));
        board.place(pos(0, 4), Piece::new(Team::Blue, PieceKind::Victory));
        board.place(pos(5, 4), Piece::new(Team::Blue, PieceKind::Attacker));
        let game = GameState::from_board(board);
        assert!(game.is_victory_threatened(Team::Red));
        assert!(!game.is_victory_threatened(Team::Blue));

        let json = GameStateJson::from(&game);
        assert!(json.victory_threatened);
    }

    #[test]
    fn test_state_json_flattens_fields() {
        let game = playing();
        let value = serde_json::to_value(GameStateJson::from(&game)).unwrap();
        assert_eq!(value["turn_number"], 1);
        assert_eq!(value["current_team"], "red");
        assert_eq!(value["status"], "playing");
        assert_eq!(value["pending_second_move"], serde_json::Value::Null);
        assert_eq!(value["frozen"], serde_json::json!([]));
        assert_eq!(value["board"]["cells"][9][4]["kind"], "victory");

        let back: GameStateJson = serde_json::from_value(value).unwrap();
        assert_eq!(back.state, game);
    }
}
