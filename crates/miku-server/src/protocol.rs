//! WebSocket protocol messages for Miku Chess multiplayer.

use miku_core::{GameEvent, GameStateJson, MatchStatus, Position, Team};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a live match
pub type MatchId = Uuid;

/// Identifies a participant across reconnects
pub type PlayerId = Uuid;

/// How a match is played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// One participant on a shared device controls both teams
    Local,
    /// Two participants, one per team
    Online,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Open a new match; the creator plays red (or both teams locally)
    CreateMatch { mode: MatchMode },

    /// Take the second seat of a waiting online match
    JoinMatch { match_id: MatchId },

    /// Rebind this connection to a seat held before a disconnect
    Rejoin { match_id: MatchId, player_id: PlayerId },

    /// Request a full state snapshot
    GetState,

    /// Ask where the piece at `from` may go
    LegalMoves { from: Position },

    /// Submit a move for the team this connection controls
    Move { from: Position, to: Position },

    /// Decline the optional second move
    SkipSecondMove,

    /// Detach from the current match without closing it
    LeaveMatch,

    /// Shut the match down for every participant
    CloseMatch,

    /// Send chat message
    Chat { message: String },

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Greeting for a fresh connection
    Welcome { connection_id: Uuid },

    /// Match created; `team` is `None` when the player controls both
    MatchCreated {
        match_id: MatchId,
        player_id: PlayerId,
        mode: MatchMode,
        team: Option<Team>,
        state: GameStateJson,
    },

    /// Seat taken in an existing match
    MatchJoined {
        match_id: MatchId,
        player_id: PlayerId,
        team: Option<Team>,
        state: GameStateJson,
    },

    /// Snapshot in reply to `GetState` or after a rejoin
    State { state: GameStateJson },

    /// Legal destinations for one source
    LegalMoves { from: Position, moves: Vec<Position> },

    /// The second participant arrived and the match started
    PlayerJoined {
        player_id: PlayerId,
        team: Team,
        state: GameStateJson,
    },

    /// A move was applied
    MoveMade {
        from: Position,
        to: Position,
        events: Vec<GameEvent>,
        state: GameStateJson,
    },

    /// The turn passed without a move (second move skipped)
    TurnChanged { state: GameStateJson },

    /// A participant lost their connection
    PlayerDisconnected {
        player_id: PlayerId,
        state: GameStateJson,
    },

    /// A participant came back on a new connection
    PlayerReconnected {
        player_id: PlayerId,
        state: GameStateJson,
    },

    /// Match reached a terminal status
    GameOver {
        status: MatchStatus,
        winner: Option<Team>,
        state: GameStateJson,
    },

    /// Chat message received
    ChatMessage {
        player_id: PlayerId,
        team: Option<Team>,
        message: String,
    },

    /// This connection is no longer bound to a match
    LeftMatch,

    /// The match was shut down
    MatchClosed { match_id: MatchId },

    /// Request rejected; `code` names the error kind
    Error { code: String, message: String },

    /// Pong response
    Pong,
}
