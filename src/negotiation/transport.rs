use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::signaling::{ClientMessage, IceCandidate, SessionDescription};

/// Coarse connectivity reported by the media engine for one peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which media an answer agrees to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub receive_video: bool,
    pub receive_audio: bool,
}

impl MediaConstraints {
    /// Students watch the teacher's video and neither send nor receive audio.
    pub const VIEWER: MediaConstraints = MediaConstraints {
        receive_video: true,
        receive_audio: false,
    };
}

/// The media engine operations a negotiation needs.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds one transport per negotiation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: MediaTransport + 'static;

    async fn create(&self, events: TransportEvents) -> Result<Self::Transport>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
}

/// A callback from the media engine, tagged with the session that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub remote_id: String,
    pub session_id: u64,
    pub kind: TransportEventKind,
}

pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Handle a transport uses to report callbacks back to its supervisor
#[derive(Debug, Clone)]
pub struct TransportEvents {
    remote_id: String,
    session_id: u64,
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    pub fn new(remote_id: impl Into<String>, session_id: u64, sender: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            remote_id: remote_id.into(),
            session_id,
            sender,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEventKind::LocalCandidate(candidate));
    }

    pub fn connectivity(&self, state: ConnectivityState) {
        self.emit(TransportEventKind::Connectivity(state));
    }

    fn emit(&self, kind: TransportEventKind) {
        let event = TransportEvent {
            remote_id: self.remote_id.clone(),
            session_id: self.session_id,
            kind,
        };
        if self.sender.send(event).is_err() {
            tracing::debug!(remote_id = %self.remote_id, "Supervisor gone, dropping transport event");
        }
    }
}

/// Where a negotiation puts the signaling messages it wants relayed
pub type SignalSender = mpsc::UnboundedSender<ClientMessage>;
