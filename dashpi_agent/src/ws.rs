//! WebSocket upgrade handlers for the control and terminal endpoints.

use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::Response,
};
use futures_util::stream::StreamExt;
use tracing::info;

use crate::session::run_session;
use crate::state::AppState;
use crate::terminal::serve_terminal;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("control client connected");
    let (sink, stream) = socket.split();
    run_session(sink, stream, state).await;
    info!("control client disconnected");
}

pub async fn term_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_terminal(socket, state))
}

async fn handle_terminal(socket: WebSocket, state: AppState) {
    info!("terminal client connected");
    let (sink, stream) = socket.split();
    serve_terminal(sink, stream, &state.config).await;
}
