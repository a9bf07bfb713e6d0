//! The `com.dowuz.minesweeper.api-v1` sub-protocol.
//!
//! Every game id is a room. A client that touches a game joins its room,
//! and every state change is fanned out to the room so all of the
//! client's sockets (and any spectators) stay in sync. Anonymous sockets
//! can play too; they just get their updates directly.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use wsmux::prelude::*;

use crate::board::{Board, Difficulty, Move, View};

pub const SUBPROTOCOL: &str = "com.dowuz.minesweeper.api-v1";

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionCommand {
    pub game_id: String,
    pub cell: usize,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub tournament: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateRequest {
    pub game_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResponse {
    pub game_id: String,
    #[serde(flatten)]
    pub view: View,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

type Games = Arc<Mutex<HashMap<String, Board>>>;

#[derive(Clone, Copy)]
enum Action {
    Explore,
    Flag,
}

/// Builds the sub-protocol with a fresh, empty set of games.
pub fn subprotocol() -> Result<Subprotocol, WsmuxError> {
    let games = Games::default();
    let mut builder = Subprotocol::builder(SUBPROTOCOL);

    builder.outbound("state")?;
    builder.outbound("error")?;

    let explore = Arc::clone(&games);
    builder.inbound("explore", move |socket: Socket, payload: Vec<u8>| {
        act(Arc::clone(&explore), Action::Explore, socket, payload)
    })?;
    let flag = Arc::clone(&games);
    builder.inbound("flag", move |socket: Socket, payload: Vec<u8>| {
        act(Arc::clone(&flag), Action::Flag, socket, payload)
    })?;
    builder.inbound("state_request", move |socket: Socket, payload: Vec<u8>| {
        state_request(Arc::clone(&games), socket, payload)
    })?;

    builder.client_id(|request: &wsmux::transport::RequestContext| {
        request
            .query_param("client")
            .or_else(|| request.header("x-client-id").map(str::to_owned))
            .and_then(ClientId::new)
    });

    Ok(builder.build())
}

async fn act(
    games: Games,
    action: Action,
    socket: Socket,
    payload: Vec<u8>,
) -> Result<(), HandlerError> {
    let cmd: ActionCommand = json::from_payload(&payload)?;
    info!(
        game_id = %cmd.game_id,
        cell = cmd.cell,
        mode = %cmd.mode,
        tournament = %cmd.tournament,
        client = ?socket.client_id(),
        "{} command received",
        match action {
            Action::Explore => "explore",
            Action::Flag => "flag",
        }
    );

    let (outcome, view) = {
        let mut games = games.lock();
        let board = games
            .entry(cmd.game_id.clone())
            .or_insert_with(|| Board::random(cmd.difficulty));
        let outcome = match action {
            Action::Explore => board.explore(cmd.cell),
            Action::Flag => board.flag(cmd.cell),
        };
        (outcome, board.view())
    };

    if outcome == Move::Ignored {
        let error = ErrorResponse { message: format!("cell {} cannot be played", cmd.cell) };
        socket.send_json("error", &error).await?;
        return Ok(());
    }

    publish(&socket, cmd.game_id, view).await
}

async fn state_request(games: Games, socket: Socket, payload: Vec<u8>) -> Result<(), HandlerError> {
    let req: StateRequest = json::from_payload(&payload)?;
    info!(game_id = %req.game_id, client = ?socket.client_id(), "state request received");

    let view = games.lock().get(&req.game_id).map(Board::view);
    let Some(view) = view else {
        let error = ErrorResponse { message: format!("no game {}", req.game_id) };
        socket.send_json("error", &error).await?;
        return Ok(());
    };

    if socket.client_id().is_some() {
        socket.join(&req.game_id)?;
    }
    socket
        .send_json("state", &StateResponse { game_id: req.game_id, view })
        .await?;
    Ok(())
}

/// Sends the new state to everyone following the game.
async fn publish(socket: &Socket, game_id: String, view: View) -> Result<(), HandlerError> {
    if socket.client_id().is_none() {
        socket.send_json("state", &StateResponse { game_id, view }).await?;
        return Ok(());
    }

    socket.join(&game_id)?;
    let room = game_id.clone();
    socket
        .subprotocol()
        .send_json_to_room(&room, "state", &StateResponse { game_id, view })
        .await?;
    Ok(())
}
