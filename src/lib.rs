pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod negotiation;
pub mod signaling;

pub use config::Config;
pub use error::{Result, SignalingError};
