// Edge transport layer.
//
// Translates wire traffic into LobbyServer calls and broadcasts events back;
// owns no policy. Organized as:
//
// - handler: WebSocket upgrade entry point
// - connection: the per-socket loop (identify-first, seq numbering, rate ceiling)
// - game_api: HTTP/JSON surface for external games
// - routes: router assembly, health and metrics endpoints

mod connection;
mod game_api;
mod handler;
mod routes;

pub use handler::websocket_handler;
pub use routes::{create_router, AppState};
