use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;

use crate::extractors::CurrentUser;
use crate::hub::session;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(
    State(state): State<AppState>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    let config = state.config.hub.clone();
    ws.on_upgrade(move |socket| session::run(hub, config, user.id, socket))
}
