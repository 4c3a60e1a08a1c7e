pub mod signaling_routes;
pub mod signaling_websocket;

pub use signaling_routes::routes;
