//! Match rooms.
//!
//! A `MatchRoom` owns one `GameState` and the seats around it. Each room runs
//! inside its own task (`run_room`) and is reached only through a
//! `MatchHandle`, so every command for a match is applied in arrival order
//! and nothing else ever touches the game state.

use crate::config::RoomConfig;
use crate::protocol::{MatchId, MatchMode, PlayerId, ServerMessage};
use dashmap::DashMap;
use miku_core::{GameError, GameEvent, GameState, GameStateJson, MatchStatus, Position, Team};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Match not found")]
    UnknownMatch,

    #[error("Match is full")]
    MatchFull,

    #[error("Match cannot be joined")]
    MatchNotJoinable,

    #[error("Player not in match")]
    NotInMatch,

    #[error("Match has closed")]
    MatchClosed,

    #[error(transparent)]
    Game(#[from] GameError),
}

impl RoomError {
    /// Stable name of the error kind for clients
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::UnknownMatch => "UnknownMatch",
            RoomError::MatchFull => "MatchFull",
            RoomError::MatchNotJoinable => "MatchNotJoinable",
            RoomError::NotInMatch => "NotInMatch",
            RoomError::MatchClosed => "MatchClosed",
            RoomError::Game(err) => match err {
                GameError::NotYourTurn => "NotYourTurn",
                GameError::MatchNotPlaying => "MatchNotPlaying",
                GameError::IllegalMove => "IllegalMove",
                GameError::PositionFrozen => "PositionFrozen",
                GameError::NoPieceAtSource => "NoPieceAtSource",
                GameError::NoPendingSecondMove => "NoPendingSecondMove",
            },
        }
    }
}

/// Outgoing message queue of one connection
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Which teams a participant moves for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    Single(Team),
    /// Local play: one participant moves for whichever team is to move
    Both,
}

impl Seat {
    pub fn team(&self) -> Option<Team> {
        match self {
            Seat::Single(team) => Some(*team),
            Seat::Both => None,
        }
    }

    fn acting_team(&self, game: &GameState) -> Team {
        match self {
            Seat::Single(team) => *team,
            Seat::Both => game.current_team,
        }
    }
}

/// A participant in a match.
#[derive(Debug)]
pub struct RoomPlayer {
    pub id: PlayerId,
    pub seat: Seat,
    /// `None` while disconnected
    outbox: Option<Outbox>,
}

impl RoomPlayer {
    fn new(id: PlayerId, seat: Seat, outbox: Option<Outbox>) -> Self {
        Self { id, seat, outbox }
    }

    pub fn is_connected(&self) -> bool {
        self.outbox.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver a message; a dead connection is dropped, never an error
    fn send(&mut self, msg: ServerMessage) {
        if let Some(tx) = &self.outbox {
            if tx.send(msg).is_err() {
                self.outbox = None;
            }
        }
    }
}

/// Seat assignment returned to a creating or joining participant
#[derive(Debug, Clone)]
pub struct SeatAck {
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub team: Option<Team>,
    pub state: GameStateJson,
}

/// One match and its participants, in seat order (red first).
pub struct MatchRoom {
    pub id: MatchId,
    pub mode: MatchMode,
    pub game: GameState,
    pub players: Vec<RoomPlayer>,
}

impl MatchRoom {
    /// Online matches wait for a second player; local matches start at once
    pub fn new(id: MatchId, mode: MatchMode, creator: PlayerId, outbox: Option<Outbox>) -> Self {
        let mut game = GameState::new();
        let seat = match mode {
            MatchMode::Local => {
                game.start();
                Seat::Both
            }
            MatchMode::Online => Seat::Single(Team::Red),
        };

        Self {
            id,
            mode,
            game,
            players: vec![RoomPlayer::new(creator, seat, outbox)],
        }
    }

    pub fn snapshot(&self) -> GameStateJson {
        GameStateJson::from(&self.game)
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected()).count()
    }

    fn player(&self, player_id: PlayerId) -> Result<&RoomPlayer, RoomError> {
        self.players
            .iter()
            .find(|p| p.id == player_id)
            .ok_or(RoomError::NotInMatch)
    }

    fn player_mut(&mut self, player_id: PlayerId) -> Result<&mut RoomPlayer, RoomError> {
        self.players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or(RoomError::NotInMatch)
    }

    pub fn ack(&self, player_id: PlayerId) -> Result<SeatAck, RoomError> {
        let player = self.player(player_id)?;
        Ok(SeatAck {
            match_id: self.id,
            player_id,
            team: player.seat.team(),
            state: self.snapshot(),
        })
    }

    /// Seat the second participant on the opposite team and start play
    pub fn join(&mut self, player_id: PlayerId, outbox: Option<Outbox>) -> Result<SeatAck, RoomError> {
        if self.mode == MatchMode::Local || self.game.is_finished() {
            return Err(RoomError::MatchNotJoinable);
        }
        if self.players.len() >= 2 {
            return Err(RoomError::MatchFull);
        }
        if self.game.status != MatchStatus::Waiting {
            return Err(RoomError::MatchNotJoinable);
        }

        let first_team = self.players[0].seat.team().unwrap_or(Team::Red);
        let team = first_team.opponent();
        self.players
            .push(RoomPlayer::new(player_id, Seat::Single(team), outbox));
        self.game.start();

        info!(match_id = %self.id, %player_id, %team, "player joined, match started");

        let ack = self.ack(player_id)?;
        self.send_to(
            player_id,
            ServerMessage::MatchJoined {
                match_id: self.id,
                player_id,
                team: Some(team),
                state: ack.state.clone(),
            },
        );
        self.broadcast(ServerMessage::PlayerJoined {
            player_id,
            team,
            state: ack.state.clone(),
        });

        Ok(ack)
    }

    /// Attach a new connection to an existing seat
    pub fn rejoin(&mut self, player_id: PlayerId, outbox: Option<Outbox>) -> Result<SeatAck, RoomError> {
        self.player_mut(player_id)?.outbox = outbox;
        let ack = self.ack(player_id)?;

        info!(match_id = %self.id, %player_id, "player reconnected");

        self.send_to(
            player_id,
            ServerMessage::MatchJoined {
                match_id: self.id,
                player_id,
                team: ack.team,
                state: ack.state.clone(),
            },
        );
        self.broadcast_except(
            player_id,
            ServerMessage::PlayerReconnected {
                player_id,
                state: ack.state.clone(),
            },
        );

        Ok(ack)
    }

    /// Drop a participant's connection but keep the seat for a rejoin.
    ///
    /// With `from` set, only that connection is detached; a seat already
    /// taken over by a newer connection is left alone.
    pub fn leave(&mut self, player_id: PlayerId, from: Option<&Outbox>) {
        let Ok(player) = self.player_mut(player_id) else {
            return;
        };
        let current = match (&player.outbox, from) {
            (Some(current), Some(from)) => current.same_channel(from),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !current {
            return;
        }
        player.outbox = None;

        info!(match_id = %self.id, %player_id, "player disconnected");

        let state = self.snapshot();
        self.broadcast(ServerMessage::PlayerDisconnected { player_id, state });
    }

    pub fn submit_move(
        &mut self,
        player_id: PlayerId,
        from: Position,
        to: Position,
    ) -> Result<Vec<GameEvent>, RoomError> {
        let team = self.player(player_id)?.seat.acting_team(&self.game);
        let events = self.game.apply_move(team, from, to)?;

        debug!(match_id = %self.id, %team, %from, %to, "move applied");

        self.broadcast(ServerMessage::MoveMade {
            from,
            to,
            events: events.clone(),
            state: self.snapshot(),
        });
        self.announce_game_over();

        Ok(events)
    }

    pub fn skip_second_move(&mut self, player_id: PlayerId) -> Result<Vec<GameEvent>, RoomError> {
        let team = self.player(player_id)?.seat.acting_team(&self.game);
        let events = self.game.apply_skip(team)?;

        debug!(match_id = %self.id, %team, "second move skipped");

        self.broadcast(ServerMessage::TurnChanged {
            state: self.snapshot(),
        });
        self.announce_game_over();

        Ok(events)
    }

    pub fn legal_moves(&self, from: Position) -> Vec<Position> {
        self.game.legal_moves_from(from)
    }

    pub fn chat(&mut self, player_id: PlayerId, message: String) -> Result<(), RoomError> {
        let team = self.player(player_id)?.seat.team();
        self.broadcast(ServerMessage::ChatMessage {
            player_id,
            team,
            message,
        });
        Ok(())
    }

    fn announce_game_over(&mut self) {
        if !self.game.is_finished() {
            return;
        }

        info!(match_id = %self.id, status = ?self.game.status, "match finished");

        self.broadcast(ServerMessage::GameOver {
            status: self.game.status,
            winner: self.game.get_winner(),
            state: self.snapshot(),
        });
    }

    /// Send a message to a specific player.
    pub fn send_to(&mut self, player_id: PlayerId, msg: ServerMessage) {
        if let Ok(player) = self.player_mut(player_id) {
            player.send(msg);
        }
    }

    /// Broadcast a message to all players in the match.
    pub fn broadcast(&mut self, msg: ServerMessage) {
        for player in &mut self.players {
            player.send(msg.clone());
        }
    }

    /// Broadcast a message to all players in the match except one.
    pub fn broadcast_except(&mut self, except: PlayerId, msg: ServerMessage) {
        for player in self.players.iter_mut().filter(|p| p.id != except) {
            player.send(msg.clone());
        }
    }

    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                player_id,
                outbox,
                reply,
            } => {
                let _ = reply.send(self.join(player_id, outbox));
            }
            RoomCommand::Rejoin {
                player_id,
                outbox,
                reply,
            } => {
                let _ = reply.send(self.rejoin(player_id, outbox));
            }
            RoomCommand::Leave { player_id, outbox } => self.leave(player_id, outbox.as_ref()),
            RoomCommand::Move {
                player_id,
                from,
                to,
                reply,
            } => {
                let _ = reply.send(self.submit_move(player_id, from, to));
            }
            RoomCommand::Skip { player_id, reply } => {
                let _ = reply.send(self.skip_second_move(player_id));
            }
            RoomCommand::LegalMoves { from, reply } => {
                let _ = reply.send(self.legal_moves(from));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            RoomCommand::Chat {
                player_id,
                message,
                reply,
            } => {
                let _ = reply.send(self.chat(player_id, message));
            }
            // Handled by the task loop
            RoomCommand::Close => {}
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

/// Requests delivered to a match task
pub enum RoomCommand {
    Join {
        player_id: PlayerId,
        outbox: Option<Outbox>,
        reply: Reply<Result<SeatAck, RoomError>>,
    },
    Rejoin {
        player_id: PlayerId,
        outbox: Option<Outbox>,
        reply: Reply<Result<SeatAck, RoomError>>,
    },
    Leave {
        player_id: PlayerId,
        outbox: Option<Outbox>,
    },
    Move {
        player_id: PlayerId,
        from: Position,
        to: Position,
        reply: Reply<Result<Vec<GameEvent>, RoomError>>,
    },
    Skip {
        player_id: PlayerId,
        reply: Reply<Result<Vec<GameEvent>, RoomError>>,
    },
    LegalMoves {
        from: Position,
        reply: Reply<Vec<Position>>,
    },
    Snapshot {
        reply: Reply<GameStateJson>,
    },
    Chat {
        player_id: PlayerId,
        message: String,
        reply: Reply<Result<(), RoomError>>,
    },
    Close,
}

/// Live matches by id
pub type MatchTable = Arc<DashMap<MatchId, MatchHandle>>;

/// Cloneable address of a running match task
#[derive(Debug, Clone)]
pub struct MatchHandle {
    pub id: MatchId,
    commands: mpsc::Sender<RoomCommand>,
}

impl MatchHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RoomError::MatchClosed)?;
        response.await.map_err(|_| RoomError::MatchClosed)
    }

    pub async fn join(&self, player_id: PlayerId, outbox: Option<Outbox>) -> Result<SeatAck, RoomError> {
        self.request(|reply| RoomCommand::Join {
            player_id,
            outbox,
            reply,
        })
        .await?
    }

    pub async fn rejoin(&self, player_id: PlayerId, outbox: Option<Outbox>) -> Result<SeatAck, RoomError> {
        self.request(|reply| RoomCommand::Rejoin {
            player_id,
            outbox,
            reply,
        })
        .await?
    }

    /// Fire-and-forget; a closed match has nobody left to tell
    pub async fn leave(&self, player_id: PlayerId, outbox: Option<Outbox>) {
        let _ = self
            .commands
            .send(RoomCommand::Leave { player_id, outbox })
            .await;
    }

    pub async fn submit_move(
        &self,
        player_id: PlayerId,
        from: Position,
        to: Position,
    ) -> Result<Vec<GameEvent>, RoomError> {
        self.request(|reply| RoomCommand::Move {
            player_id,
            from,
            to,
            reply,
        })
        .await?
    }

    pub async fn skip_second_move(&self, player_id: PlayerId) -> Result<Vec<GameEvent>, RoomError> {
        self.request(|reply| RoomCommand::Skip { player_id, reply })
            .await?
    }

    pub async fn legal_moves(&self, from: Position) -> Result<Vec<Position>, RoomError> {
        self.request(|reply| RoomCommand::LegalMoves { from, reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<GameStateJson, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn chat(&self, player_id: PlayerId, message: String) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Chat {
            player_id,
            message,
            reply,
        })
        .await?
    }

    pub async fn close(&self) {
        let _ = self.commands.send(RoomCommand::Close).await;
    }

    /// Whether the match task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Start the task for `room` and register it in `table`
pub fn spawn_room(room: MatchRoom, config: RoomConfig, table: MatchTable) -> MatchHandle {
    let (commands, inbox) = mpsc::channel(config.queue_capacity);
    let handle = MatchHandle {
        id: room.id,
        commands,
    };
    table.insert(room.id, handle.clone());
    tokio::spawn(run_room(room, inbox, config.idle_timeout, table));
    handle
}

/// Drain commands in arrival order until closed or idle for `idle_timeout`
/// with nobody connected.
async fn run_room(
    mut room: MatchRoom,
    mut inbox: mpsc::Receiver<RoomCommand>,
    idle_timeout: Duration,
    table: MatchTable,
) {
    info!(match_id = %room.id, mode = ?room.mode, "match task started");

    loop {
        let idle = room.connected_count() == 0;
        tokio::select! {
            command = inbox.recv() => match command {
                Some(RoomCommand::Close) | None => break,
                Some(command) => room.handle(command),
            },
            _ = tokio::time::sleep(idle_timeout), if idle => {
                info!(match_id = %room.id, "no participants connected, reaping match");
                break;
            }
        }
    }

    // Queued requests fail with `MatchClosed` from here on
    drop(inbox);
    table.remove(&room.id);
    room.broadcast(ServerMessage::MatchClosed { match_id: room.id });
    info!(match_id = %room.id, "match task stopped");
}
