//! Game board representation: pieces and the 10×9 grid.
//!
//! This module contains:
//! - Piece kinds and the `Piece` identity (team + kind)
//! - The `Board` grid with placement and zone queries
//! - The standard starting layout
//!
//! The board is a plain data container. It carries no rule knowledge; the
//! rules module reads it and the game state machine is the only caller of
//! the mutators.

use crate::position::{Position, Team, Zone, COLS, ROWS};
use serde::{Deserialize, Serialize};

/// The five kinds of piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    /// Slides orthogonally, captures only on a vertical move
    Attacker,
    /// Slides orthogonally, captures only on a horizontal move
    Defender,
    /// Slides diagonally, captures in any diagonal direction
    Support,
    /// Steps once orthogonally inside its magic zone
    Magic,
    /// Steps once orthogonally inside its palace; losing it loses the game
    Victory,
}

impl PieceKind {
    pub const ALL: [PieceKind; 5] = [
        PieceKind::Attacker,
        PieceKind::Defender,
        PieceKind::Support,
        PieceKind::Magic,
        PieceKind::Victory,
    ];

    /// Sliding pieces move any distance and are subject to the retreat ban
    pub const fn is_sliding(&self) -> bool {
        matches!(
            self,
            PieceKind::Attacker | PieceKind::Defender | PieceKind::Support
        )
    }

    /// Single-character label used by the text renderer
    pub const fn symbol(&self) -> char {
        match self {
            PieceKind::Attacker => 'A',
            PieceKind::Defender => 'D',
            PieceKind::Support => 'S',
            PieceKind::Magic => 'M',
            PieceKind::Victory => 'V',
        }
    }
}

/// A piece on the board. Identity never changes; capture removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub team: Team,
    pub kind: PieceKind,
}

impl Piece {
    pub const fn new(team: Team, kind: PieceKind) -> Self {
        Self { team, kind }
    }
}

/// Grid cells as rows of optional pieces
pub type Cells = [[Option<Piece>; COLS as usize]; ROWS as usize];

/// The 10×9 board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: Cells,
}

impl Board {
    /// Create an empty board
    pub fn new() -> Self {
        Self {
            cells: [[None; COLS as usize]; ROWS as usize],
        }
    }

    /// Create the standard starting layout.
    ///
    /// Blue back rank (row 0): attackers on A-C and G-I, supports on D and F,
    /// victory on E. Blue row 2: defenders everywhere except E, magic on E.
    /// Red mirrors this on rows 9 and 7.
    pub fn standard() -> Self {
        let mut board = Self::new();
        for (team, back_row, front_row) in [(Team::Blue, 0, 2), (Team::Red, 9, 7)] {
            for col in 0..COLS {
                let back = match col {
                    3 | 5 => PieceKind::Support,
                    4 => PieceKind::Victory,
                    _ => PieceKind::Attacker,
                };
                let front = if col == 4 {
                    PieceKind::Magic
                } else {
                    PieceKind::Defender
                };
                board.cells[back_row][col as usize] = Some(Piece::new(team, back));
                board.cells[front_row][col as usize] = Some(Piece::new(team, front));
            }
        }
        board
    }

    /// Piece at a position, `None` if empty or off the board
    pub fn piece_at(&self, pos: Position) -> Option<Piece> {
        if !pos.is_valid() {
            return None;
        }
        self.cells[pos.row as usize][pos.col as usize]
    }

    /// Whether a cell holds nothing
    pub fn is_empty(&self, pos: Position) -> bool {
        self.piece_at(pos).is_none()
    }

    /// Put a piece on a cell, returning whatever was there before
    pub fn place(&mut self, pos: Position, piece: Piece) -> Option<Piece> {
        if !pos.is_valid() {
            return None;
        }
        self.cells[pos.row as usize][pos.col as usize].replace(piece)
    }

    /// Clear a cell, returning the piece that was on it
    pub fn remove(&mut self, pos: Position) -> Option<Piece> {
        if !pos.is_valid() {
            return None;
        }
        self.cells[pos.row as usize][pos.col as usize].take()
    }

    /// Zone membership for a team; a pure geometric predicate
    pub fn is_in_zone(&self, pos: Position, zone: Zone, team: Team) -> bool {
        pos.is_valid() && zone.contains(pos, team)
    }

    /// All occupied cells, row by row
    pub fn pieces(&self) -> impl Iterator<Item = (Position, Piece)> + '_ {
        Position::all().filter_map(move |pos| self.piece_at(pos).map(|piece| (pos, piece)))
    }

    /// All pieces belonging to one team
    pub fn team_pieces(&self, team: Team) -> impl Iterator<Item = (Position, Piece)> + '_ {
        self.pieces().filter(move |(_, piece)| piece.team == team)
    }

    /// Location of a team's piece of the given kind (first found)
    pub fn find(&self, team: Team, kind: PieceKind) -> Option<Position> {
        self.team_pieces(team)
            .find(|(_, piece)| piece.kind == kind)
            .map(|(pos, _)| pos)
    }

    /// Count of pieces per team
    pub fn count(&self, team: Team) -> usize {
        self.team_pieces(team).count()
    }

    /// Raw grid for serialization-friendly consumers
    pub fn cells(&self) -> &Cells {
        &self.cells
    }

    /// Plain-text rendering, one row per line. Red pieces are upper case,
    /// blue lower case, empty cells `.`.
    pub fn render(&self) -> String {
        let mut out = String::from("  A B C D E F G H I\n");
        for row in 0..ROWS {
            out.push_str(&row.to_string());
            for col in 0..COLS {
                out.push(' ');
                let cell = Position { row, col };
                out.push(match self.piece_at(cell) {
                    Some(piece) if piece.team == Team::Red => piece.kind.symbol(),
                    Some(piece) => piece.kind.symbol().to_ascii_lowercase(),
                    None => '.',
                });
            }
            out.push('\n');
        }
        out
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}
