//! Per-kind move generation.
//!
//! Every function here is a pure function of a board snapshot, a source
//! position and the explicit [`RuleFlags`]. Nothing reads history or the
//! turn counter; freezing is a state-machine concern and lives in `game`.

use crate::board::{Board, Piece, PieceKind};
use crate::position::{Direction, Position, Team, Zone};
use serde::{Deserialize, Serialize};

/// Match flags that change what a piece may do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFlags {
    /// Red lost its magic piece; red sliding pieces may not retreat
    pub red_cannot_retreat: bool,
    /// Blue lost its magic piece; blue sliding pieces may not retreat
    pub blue_cannot_retreat: bool,
}

impl RuleFlags {
    pub fn cannot_retreat(&self, team: Team) -> bool {
        match team {
            Team::Red => self.red_cannot_retreat,
            Team::Blue => self.blue_cannot_retreat,
        }
    }
}

/// Whether moving from `from` to `to` takes a piece of `team` further from
/// the enemy palace along the row axis
pub fn is_retreat(from: Position, to: Position, team: Team) -> bool {
    match team {
        Team::Red => to.row > from.row,
        Team::Blue => to.row < from.row,
    }
}

/// Legal destinations for the piece at `from`.
///
/// Empty when the cell is empty or off the board. The result depends only on
/// the arguments.
pub fn legal_destinations(board: &Board, from: Position, flags: &RuleFlags) -> Vec<Position> {
    let Some(piece) = board.piece_at(from) else {
        return Vec::new();
    };

    let moves = match piece.kind {
        PieceKind::Attacker => attacker_moves(board, from, piece),
        PieceKind::Defender => defender_moves(board, from, piece),
        PieceKind::Support => support_moves(board, from, piece),
        PieceKind::Magic => zone_step_moves(board, from, piece, Zone::MagicZone),
        PieceKind::Victory => zone_step_moves(board, from, piece, Zone::Palace),
    };

    if piece.kind.is_sliding() && flags.cannot_retreat(piece.team) {
        moves
            .into_iter()
            .filter(|&to| !is_retreat(from, to, piece.team))
            .collect()
    } else {
        moves
    }
}

/// Whether `to` is a legal destination for the piece at `from`
pub fn is_legal(board: &Board, from: Position, to: Position, flags: &RuleFlags) -> bool {
    legal_destinations(board, from, flags).contains(&to)
}

/// Whether any piece of `by` can currently move onto `target`
pub fn is_attacked(board: &Board, target: Position, by: Team, flags: &RuleFlags) -> bool {
    board
        .team_pieces(by)
        .any(|(from, _)| is_legal(board, from, target, flags))
}

/// Orthogonal slide; captures only along columns
fn attacker_moves(board: &Board, from: Position, piece: Piece) -> Vec<Position> {
    slide(board, from, piece.team, &Direction::ORTHOGONAL, |dir| {
        dir.is_vertical()
    })
}

/// Orthogonal slide; captures only along rows
fn defender_moves(board: &Board, from: Position, piece: Piece) -> Vec<Position> {
    slide(board, from, piece.team, &Direction::ORTHOGONAL, |dir| {
        dir.is_horizontal()
    })
}

/// Diagonal slide; captures in every direction
fn support_moves(board: &Board, from: Position, piece: Piece) -> Vec<Position> {
    slide(board, from, piece.team, &Direction::DIAGONAL, |_| true)
}

/// Walk each direction until the first occupied cell. That cell is included
/// only if it holds an enemy and `captures_along` allows the direction.
fn slide<F>(
    board: &Board,
    from: Position,
    team: Team,
    directions: &[Direction],
    captures_along: F,
) -> Vec<Position>
where
    F: Fn(Direction) -> bool,
{
    let mut moves = Vec::new();

    for &dir in directions {
        let mut current = from.step(dir);
        while let Some(cell) = current {
            match board.piece_at(cell) {
                None => moves.push(cell),
                Some(target) => {
                    if target.team != team && captures_along(dir) {
                        moves.push(cell);
                    }
                    break;
                }
            }
            current = cell.step(dir);
        }
    }

    moves
}

/// One orthogonal step that starts and ends inside the piece's own zone
fn zone_step_moves(board: &Board, from: Position, piece: Piece, zone: Zone) -> Vec<Position> {
    if !board.is_in_zone(from, zone, piece.team) {
        return Vec::new();
    }

    Direction::ORTHOGONAL
        .iter()
        .filter_map(|&dir| from.step(dir))
        .filter(|&to| board.is_in_zone(to, zone, piece.team))
        .filter(|&to| match board.piece_at(to) {
            None => true,
            Some(target) => target.team != piece.team,
        })
        .collect()
}
