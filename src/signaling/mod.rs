mod handler;
pub mod messages;
pub mod peer;
pub mod room;
pub mod router;
mod server;

pub use handler::SignalingHandler;
pub use messages::{ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription};
pub use peer::{PeerRole, PeerSession};
pub use room::{RoomRegistry, RoomStatus};
pub use router::SignalingRouter;
pub use server::SignalingServer;
