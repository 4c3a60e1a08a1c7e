use thiserror::Error;

/// Error types for the signaling relay and its negotiation clients
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Room and peer management errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Peer {peer_id} is not the teacher of room {room_code}")]
    UnauthorizedActivation { peer_id: String, room_code: String },

    #[error("Peer {peer_id} already joined room {room_code} as {role}")]
    AlreadyJoined {
        peer_id: String,
        room_code: String,
        role: String,
    },

    #[error("Could not allocate a free room code after {0} attempts")]
    RoomCodesExhausted(usize),

    /// Signaling errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("No negotiation session for peer {0}")]
    StaleMessage(String),

    #[error("Unexpected {message} while negotiation is {state}")]
    ProtocolViolation { message: String, state: String },

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Signaling connection error: {0}")]
    Connection(String),

    /// Media transport errors
    #[error("Transport failure for peer {peer_id}: {reason}")]
    TransportFailure { peer_id: String, reason: String },

    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using SignalingError
pub type Result<T> = std::result::Result<T, SignalingError>;

impl SignalingError {
    pub fn internal(msg: impl Into<String>) -> Self {
        SignalingError::Internal(msg.into())
    }

    pub fn webrtc_api(msg: impl Into<String>) -> Self {
        SignalingError::WebRtcApi(msg.into())
    }

    pub fn transport(peer_id: impl Into<String>, reason: impl ToString) -> Self {
        SignalingError::TransportFailure {
            peer_id: peer_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn protocol_violation(message: impl Into<String>, state: impl ToString) -> Self {
        SignalingError::ProtocolViolation {
            message: message.into(),
            state: state.to_string(),
        }
    }
}

impl From<webrtc::Error> for SignalingError {
    fn from(err: webrtc::Error) -> Self {
        SignalingError::WebRtcApi(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalingError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalingError::Connection(err.to_string())
    }
}
