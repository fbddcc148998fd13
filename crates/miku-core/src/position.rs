//! Board coordinates and zone geometry.
//!
//! This module provides the foundational coordinate types for the 10×9 board:
//! - `Team`: the two sides and their forward direction
//! - `Position`: a (row, col) cell, with `"<row><COL>"` notation such as `0E`
//! - `Direction`: unit steps used by the sliding and stepping rules
//! - `Zone`: the palace and magic zone predicates
//!
//! Row 0 is the blue back rank, row 9 the red back rank. Everything here is a
//! pure function of the coordinates; nothing knows about pieces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of rows on the board
pub const ROWS: i8 = 10;

/// Number of columns on the board
pub const COLS: i8 = 9;

/// Column letters used in notation
const COLUMN_LETTERS: [char; 9] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I'];

/// One of the two sides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    /// Moves first, occupies rows 5-9
    Red,
    /// Occupies rows 0-4
    Blue,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Red, Team::Blue];

    /// The other side
    pub const fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    /// Row delta that moves toward the enemy half
    pub const fn forward(self) -> i8 {
        match self {
            Team::Red => -1,
            Team::Blue => 1,
        }
    }

    /// Whether the row lies in this team's half of the board
    pub const fn owns_row(self, row: i8) -> bool {
        match self {
            Team::Blue => row >= 0 && row <= 4,
            Team::Red => row >= 5 && row <= 9,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Red => write!(f, "red"),
            Team::Blue => write!(f, "blue"),
        }
    }
}

/// A unit step on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Direction {
    pub d_row: i8,
    pub d_col: i8,
}

impl Direction {
    pub const UP: Direction = Direction::new(-1, 0);
    pub const DOWN: Direction = Direction::new(1, 0);
    pub const LEFT: Direction = Direction::new(0, -1);
    pub const RIGHT: Direction = Direction::new(0, 1);

    /// The four orthogonal steps
    pub const ORTHOGONAL: [Direction; 4] =
        [Direction::UP, Direction::DOWN, Direction::LEFT, Direction::RIGHT];

    /// The four diagonal steps
    pub const DIAGONAL: [Direction; 4] = [
        Direction::new(-1, -1),
        Direction::new(-1, 1),
        Direction::new(1, -1),
        Direction::new(1, 1),
    ];

    pub const fn new(d_row: i8, d_col: i8) -> Self {
        Self { d_row, d_col }
    }

    /// Moves along a column
    pub const fn is_vertical(&self) -> bool {
        self.d_col == 0 && self.d_row != 0
    }

    /// Moves along a row
    pub const fn is_horizontal(&self) -> bool {
        self.d_row == 0 && self.d_col != 0
    }
}

/// A cell on the board.
///
/// Construction through [`Position::new`] is bounds-checked; the fields are
/// public for pattern matching and serialization, and every consumer that
/// receives an untrusted position re-checks [`Position::is_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: i8,
    pub col: i8,
}

impl Position {
    /// Create a position, returning `None` if it is off the board
    pub const fn new(row: i8, col: i8) -> Option<Self> {
        let pos = Self { row, col };
        if pos.is_valid() {
            Some(pos)
        } else {
            None
        }
    }

    /// Whether the position lies on the 10×9 board
    pub const fn is_valid(&self) -> bool {
        self.row >= 0 && self.row < ROWS && self.col >= 0 && self.col < COLS
    }

    /// The neighbouring cell in `dir`, if still on the board
    pub const fn step(&self, dir: Direction) -> Option<Position> {
        Position::new(self.row + dir.d_row, self.col + dir.d_col)
    }

    /// Which half of the board this cell belongs to
    pub const fn half(&self) -> Team {
        if self.row <= 4 {
            Team::Blue
        } else {
            Team::Red
        }
    }

    /// Index into a row-major 90-cell array
    pub const fn index(&self) -> usize {
        self.row as usize * COLS as usize + self.col as usize
    }

    /// Every cell, row by row
    pub fn all() -> impl Iterator<Item = Position> {
        (0..ROWS).flat_map(|row| (0..COLS).map(move |col| Position { row, col }))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match COLUMN_LETTERS.get(self.col as usize) {
            Some(letter) if self.is_valid() => write!(f, "{}{}", self.row, letter),
            _ => write!(f, "({}, {})", self.row, self.col),
        }
    }
}

/// Error parsing position notation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid position notation: {0:?}")]
pub struct ParsePositionError(pub String);

impl FromStr for Position {
    type Err = ParsePositionError;

    /// Parse notation such as `0A` or `9e`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePositionError(s.to_string());
        let mut chars = s.trim().chars();
        let row = chars.next().and_then(|c| c.to_digit(10)).ok_or_else(err)?;
        let letter = chars.next().ok_or_else(err)?.to_ascii_uppercase();
        if chars.next().is_some() {
            return Err(err());
        }
        let col = COLUMN_LETTERS
            .iter()
            .position(|&c| c == letter)
            .ok_or_else(err)?;
        Position::new(row as i8, col as i8).ok_or_else(err)
    }
}

/// Named regions that confine the stepping pieces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// 3×3 home of the victory piece
    Palace,
    /// 3×3 home of the magic piece, sharing one row with the palace
    MagicZone,
}

impl Zone {
    /// Whether `pos` lies in this zone for `team`
    pub const fn contains(self, pos: Position, team: Team) -> bool {
        if pos.col < 3 || pos.col > 5 {
            return false;
        }
        let (low, high) = match (self, team) {
            (Zone::Palace, Team::Blue) => (0, 2),
            (Zone::Palace, Team::Red) => (7, 9),
            (Zone::MagicZone, Team::Blue) => (2, 4),
            (Zone::MagicZone, Team::Red) => (5, 7),
        };
        pos.row >= low && pos.row <= high
    }
}
