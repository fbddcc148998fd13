//! WebSocket server and connection handling.

use crate::config::RoomConfig;
use crate::protocol::{ClientMessage, MatchId, MatchMode, PlayerId, ServerMessage};
use crate::room::{spawn_room, MatchHandle, MatchRoom, MatchTable, Outbox, RoomError, SeatAck};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Server state shared across all connections.
pub struct ServerState {
    /// All live matches; each entry is removed by its own task on exit
    pub matches: MatchTable,
    pub room_config: RoomConfig,
}

impl ServerState {
    pub fn new(room_config: RoomConfig) -> Self {
        Self {
            matches: Arc::new(DashMap::new()),
            room_config,
        }
    }

    /// Create a match and start its task. The creator takes the first seat.
    pub fn create_match(
        &self,
        mode: MatchMode,
        player_id: PlayerId,
        outbox: Option<Outbox>,
    ) -> Result<(MatchHandle, SeatAck), RoomError> {
        let room = MatchRoom::new(Uuid::new_v4(), mode, player_id, outbox);
        let ack = room.ack(player_id)?;
        let handle = spawn_room(room, self.room_config, Arc::clone(&self.matches));

        info!(match_id = %handle.id, ?mode, live_matches = self.match_count(), "match created");
        Ok((handle, ack))
    }

    pub fn get_match(&self, match_id: MatchId) -> Result<MatchHandle, RoomError> {
        self.matches
            .get(&match_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
            .ok_or(RoomError::UnknownMatch)
    }

    /// Stop a match; later requests for it fail with `UnknownMatch`
    pub async fn close_match(&self, match_id: MatchId) -> Result<(), RoomError> {
        let (_, handle) = self
            .matches
            .remove(&match_id)
            .ok_or(RoomError::UnknownMatch)?;
        handle.close().await;
        Ok(())
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

/// Per-connection state
pub struct Session {
    pub connection_id: Uuid,
    outbox: Outbox,
    /// Match and seat this connection acts for
    binding: Option<(MatchHandle, PlayerId)>,
}

impl Session {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            outbox,
            binding: None,
        }
    }

    fn send(&self, msg: ServerMessage) {
        let _ = self.outbox.send(msg);
    }

    fn send_error(&self, err: &RoomError) {
        self.send(ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    fn bound(&self) -> Result<(&MatchHandle, PlayerId), RoomError> {
        self.binding
            .as_ref()
            .map(|(handle, player_id)| (handle, *player_id))
            .ok_or(RoomError::NotInMatch)
    }

    /// Release the current seat, keeping it open for a rejoin
    async fn unbind(&mut self) -> bool {
        match self.binding.take() {
            Some((handle, player_id)) => {
                handle.leave(player_id, Some(self.outbox.clone())).await;
                true
            }
            None => false,
        }
    }
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Miku Chess server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Outgoing messages from this handler and from match tasks
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session = Session::new(tx);
    let connection_id = session.connection_id;

    let welcome = ServerMessage::Welcome { connection_id };
    ws_sender
        .send(Message::Text(serde_json::to_string(&welcome)?))
        .await?;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode message: {}", e),
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if let Err(e) = handle_message(&mut session, client_msg, &state).await {
                        debug!(%connection_id, code = e.code(), "request rejected");
                        session.send_error(&e);
                    }
                }
                Err(e) => {
                    warn!("Invalid message from {}: {}", connection_id, e);
                    session.send(ServerMessage::Error {
                        code: "InvalidMessage".to_string(),
                        message: e.to_string(),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", connection_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // The seat survives the connection so the player can rejoin
    session.unbind().await;
    send_task.abort();

    info!("Connection closed for {}", connection_id);
    Ok(())
}

/// Handle a client message. Errors go back to this connection only.
pub async fn handle_message(
    session: &mut Session,
    msg: ClientMessage,
    state: &ServerState,
) -> Result<(), RoomError> {
    match msg {
        ClientMessage::CreateMatch { mode } => {
            session.unbind().await;

            let player_id = Uuid::new_v4();
            let (handle, ack) = state.create_match(mode, player_id, Some(session.outbox.clone()))?;
            session.send(ServerMessage::MatchCreated {
                match_id: ack.match_id,
                player_id,
                mode,
                team: ack.team,
                state: ack.state,
            });
            session.binding = Some((handle, player_id));
        }

        ClientMessage::JoinMatch { match_id } => {
            let handle = state.get_match(match_id)?;
            let player_id = Uuid::new_v4();
            // Confirmation arrives through the outbox from the match task
            handle
                .join(player_id, Some(session.outbox.clone()))
                .await?;
            session.unbind().await;
            session.binding = Some((handle, player_id));
        }

        ClientMessage::Rejoin {
            match_id,
            player_id,
        } => {
            let handle = state.get_match(match_id)?;
            handle
                .rejoin(player_id, Some(session.outbox.clone()))
                .await?;
            if session
                .binding
                .as_ref()
                .is_some_and(|(h, p)| h.id != match_id || *p != player_id)
            {
                session.unbind().await;
            }
            session.binding = Some((handle, player_id));
        }

        ClientMessage::GetState => {
            let (handle, _) = session.bound()?;
            let state = handle.snapshot().await?;
            session.send(ServerMessage::State { state });
        }

        ClientMessage::LegalMoves { from } => {
            let (handle, _) = session.bound()?;
            let moves = handle.legal_moves(from).await?;
            session.send(ServerMessage::LegalMoves { from, moves });
        }

        ClientMessage::Move { from, to } => {
            let (handle, player_id) = session.bound()?;
            handle.submit_move(player_id, from, to).await?;
        }

        ClientMessage::SkipSecondMove => {
            let (handle, player_id) = session.bound()?;
            handle.skip_second_move(player_id).await?;
        }

        ClientMessage::LeaveMatch => {
            if !session.unbind().await {
                return Err(RoomError::NotInMatch);
            }
            session.send(ServerMessage::LeftMatch);
        }

        ClientMessage::CloseMatch => {
            let (handle, _) = session.bound()?;
            let match_id = handle.id;
            session.binding = None;
            state.close_match(match_id).await?;
        }

        ClientMessage::Chat { message } => {
            let (handle, player_id) = session.bound()?;
            handle.chat(player_id, message).await?;
        }

        ClientMessage::Ping => {
            session.send(ServerMessage::Pong);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miku_core::{GameError, MatchStatus, Position, Team};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn pos(notation: &str) -> Position {
        notation.parse().unwrap()
    }

    fn session() -> (Session, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    async fn next(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
        rx.recv().await.expect("connection outbox closed")
    }

    /// Create an online match on `red` and join it with `blue`.
    async fn online_match(
        state: &ServerState,
        red: &mut Session,
        red_rx: &mut UnboundedReceiver<ServerMessage>,
        blue: &mut Session,
        blue_rx: &mut UnboundedReceiver<ServerMessage>,
    ) -> MatchId {
        handle_message(
            red,
            ClientMessage::CreateMatch {
                mode: MatchMode::Online,
            },
            state,
        )
        .await
        .unwrap();
        let match_id = match next(red_rx).await {
            ServerMessage::MatchCreated { match_id, team, .. } => {
                assert_eq!(team, Some(Team::Red));
                match_id
            }
            other => panic!("unexpected message: {other:?}"),
        };

        handle_message(blue, ClientMessage::JoinMatch { match_id }, state)
            .await
            .unwrap();
        assert!(matches!(
            next(blue_rx).await,
            ServerMessage::MatchJoined {
                team: Some(Team::Blue),
                ..
            }
        ));
        assert!(matches!(next(blue_rx).await, ServerMessage::PlayerJoined { .. }));
        assert!(matches!(next(red_rx).await, ServerMessage::PlayerJoined { .. }));

        match_id
    }

    #[tokio::test]
    async fn test_local_match_flow() {
        let state = ServerState::default();
        let (mut s, mut rx) = session();

        handle_message(
            &mut s,
            ClientMessage::CreateMatch {
                mode: MatchMode::Local,
            },
            &state,
        )
        .await
        .unwrap();
        match next(&mut rx).await {
            ServerMessage::MatchCreated { team, state, .. } => {
                assert_eq!(team, None);
                assert_eq!(state.state.status, MatchStatus::Playing);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(state.match_count(), 1);

        for (from, to) in [("9A", "8A"), ("0A", "1A")] {
            handle_message(
                &mut s,
                ClientMessage::Move {
                    from: pos(from),
                    to: pos(to),
                },
                &state,
            )
            .await
            .unwrap();
            assert!(matches!(next(&mut rx).await, ServerMessage::MoveMade { .. }));
        }

        handle_message(&mut s, ClientMessage::GetState, &state)
            .await
            .unwrap();
        match next(&mut rx).await {
            ServerMessage::State { state } => {
                assert_eq!(state.state.turn_number, 3);
                assert_eq!(state.state.current_team, Team::Red);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_goes_only_to_requester() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;

        let err = handle_message(
            &mut blue,
            ClientMessage::Move {
                from: pos("0A"),
                to: pos("1A"),
            },
            &state,
        )
        .await
        .unwrap_err();
        assert_eq!(err, RoomError::Game(GameError::NotYourTurn));
        assert!(red_rx.try_recv().is_err());
        assert!(blue_rx.try_recv().is_err());

        handle_message(
            &mut red,
            ClientMessage::Move {
                from: pos("9A"),
                to: pos("8A"),
            },
            &state,
        )
        .await
        .unwrap();
        assert!(matches!(next(&mut red_rx).await, ServerMessage::MoveMade { .. }));
        assert!(matches!(next(&mut blue_rx).await, ServerMessage::MoveMade { .. }));
    }

    #[tokio::test]
    async fn test_legal_moves_query() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;

        handle_message(&mut red, ClientMessage::LegalMoves { from: pos("9A") }, &state)
            .await
            .unwrap();
        match next(&mut red_rx).await {
            ServerMessage::LegalMoves { from, moves } => {
                assert_eq!(from, pos("9A"));
                assert!(moves.contains(&pos("8A")));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // Blue pieces have no moves while red is to move
        handle_message(&mut blue, ClientMessage::LegalMoves { from: pos("0A") }, &state)
            .await
            .unwrap();
        assert!(matches!(
            next(&mut blue_rx).await,
            ServerMessage::LegalMoves { moves, .. } if moves.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_unbound_connection_is_rejected() {
        let state = ServerState::default();
        let (mut s, _rx) = session();

        for msg in [
            ClientMessage::GetState,
            ClientMessage::SkipSecondMove,
            ClientMessage::LeaveMatch,
            ClientMessage::CloseMatch,
        ] {
            assert_eq!(
                handle_message(&mut s, msg, &state).await.unwrap_err(),
                RoomError::NotInMatch
            );
        }

        assert_eq!(
            handle_message(
                &mut s,
                ClientMessage::JoinMatch {
                    match_id: Uuid::new_v4()
                },
                &state
            )
            .await
            .unwrap_err(),
            RoomError::UnknownMatch
        );
    }

    #[tokio::test]
    async fn test_third_connection_cannot_join() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        let match_id = online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;

        let (mut third, _third_rx) = session();
        assert_eq!(
            handle_message(&mut third, ClientMessage::JoinMatch { match_id }, &state)
                .await
                .unwrap_err(),
            RoomError::MatchFull
        );
    }

    #[tokio::test]
    async fn test_rejoin_after_disconnect() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        let match_id = online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;
        let blue_id = blue.binding.as_ref().map(|(_, p)| *p).unwrap();

        // Connection drops
        blue.unbind().await;
        drop(blue_rx);
        assert!(matches!(
            next(&mut red_rx).await,
            ServerMessage::PlayerDisconnected { player_id, .. } if player_id == blue_id
        ));

        let (mut again, mut again_rx) = session();
        handle_message(
            &mut again,
            ClientMessage::Rejoin {
                match_id,
                player_id: blue_id,
            },
            &state,
        )
        .await
        .unwrap();
        assert!(matches!(
            next(&mut again_rx).await,
            ServerMessage::MatchJoined {
                team: Some(Team::Blue),
                ..
            }
        ));
        assert!(matches!(
            next(&mut red_rx).await,
            ServerMessage::PlayerReconnected { .. }
        ));

        // Strangers cannot take a seat by guessing
        let (mut stranger, _stranger_rx) = session();
        assert_eq!(
            handle_message(
                &mut stranger,
                ClientMessage::Rejoin {
                    match_id,
                    player_id: Uuid::new_v4(),
                },
                &state,
            )
            .await
            .unwrap_err(),
            RoomError::NotInMatch
        );
    }

    #[tokio::test]
    async fn test_close_match() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        let match_id = online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;

        handle_message(&mut red, ClientMessage::CloseMatch, &state)
            .await
            .unwrap();
        assert!(matches!(
            next(&mut blue_rx).await,
            ServerMessage::MatchClosed { match_id: id } if id == match_id
        ));
        assert_eq!(state.match_count(), 0);

        assert_eq!(
            handle_message(&mut blue, ClientMessage::GetState, &state)
                .await
                .unwrap_err(),
            RoomError::MatchClosed
        );
        assert_eq!(
            handle_message(&mut red, ClientMessage::GetState, &state)
                .await
                .unwrap_err(),
            RoomError::NotInMatch
        );
    }

    #[tokio::test]
    async fn test_chat_and_ping() {
        let state = ServerState::default();
        let (mut red, mut red_rx) = session();
        let (mut blue, mut blue_rx) = session();
        online_match(&state, &mut red, &mut red_rx, &mut blue, &mut blue_rx).await;

        handle_message(
            &mut blue,
            ClientMessage::Chat {
                message: "gl hf".to_string(),
            },
            &state,
        )
        .await
        .unwrap();
        for rx in [&mut red_rx, &mut blue_rx] {
            assert!(matches!(
                next(rx).await,
                ServerMessage::ChatMessage { team: Some(Team::Blue), message, .. } if message == "gl hf"
            ));
        }

        handle_message(&mut red, ClientMessage::Ping, &state)
            .await
            .unwrap();
        assert!(matches!(next(&mut red_rx).await, ServerMessage::Pong));
    }
}
