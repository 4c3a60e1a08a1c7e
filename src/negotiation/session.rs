use std::collections::VecDeque;
use std::fmt;

use super::transport::{ConnectivityState, MediaConstraints, MediaTransport, SignalSender};
use crate::error::{Result, SignalingError};
use crate::signaling::messages::encode_payload;
use crate::signaling::{ClientMessage, IceCandidate, SessionDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    OfferSent,
    OfferReceived,
    AnswerExchanged,
    Connected,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Teacher side: sends the offer
    Offerer,
    /// Student side: answers the teacher's offer
    Answerer,
}

/// What the owner should do after a connectivity report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityOutcome {
    Continue,
    Failed,
    TearDown,
}

/// Offer/answer/ICE exchange with one remote peer.
///
/// Remote candidates that arrive before the remote description are queued and
/// applied in arrival order as soon as it is set. Local candidates go out
/// immediately whatever the state.
pub struct NegotiationSession<T> {
    id: u64,
    remote_id: String,
    role: NegotiationRole,
    room_code: Option<String>,
    state: NegotiationState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: VecDeque<IceCandidate>,
    transport: T,
    signals: SignalSender,
}

impl<T: MediaTransport> NegotiationSession<T> {
    pub fn offerer(
        id: u64,
        remote_id: impl Into<String>,
        room_code: impl Into<String>,
        transport: T,
        signals: SignalSender,
    ) -> Self {
        Self::new(id, remote_id.into(), NegotiationRole::Offerer, Some(room_code.into()), transport, signals)
    }

    pub fn answerer(id: u64, remote_id: impl Into<String>, transport: T, signals: SignalSender) -> Self {
        Self::new(id, remote_id.into(), NegotiationRole::Answerer, None, transport, signals)
    }

    fn new(
        id: u64,
        remote_id: String,
        role: NegotiationRole,
        room_code: Option<String>,
        transport: T,
        signals: SignalSender,
    ) -> Self {
        Self {
            id,
            remote_id,
            role,
            room_code,
            state: NegotiationState::Idle,
            local_description: None,
            remote_description: None,
            pending_candidates: VecDeque::new(),
            transport,
            signals,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Teacher side: `Idle -> OfferSent`.
    pub async fn start_offer(&mut self) -> Result<()> {
        self.expect(NegotiationRole::Offerer, NegotiationState::Idle, "start offer")?;

        let offer = self.transport.create_offer().await;
        let offer = offer.map_err(|e| self.fail(e))?;
        let applied = self.transport.set_local_description(offer.clone()).await;
        applied.map_err(|e| self.fail(e))?;

        self.local_description = Some(offer.clone());
        self.state = NegotiationState::OfferSent;

        self.send(ClientMessage::Offer {
            room_code: self.room_code.clone(),
            offer: encode_payload(&offer)?,
            target_id: Some(self.remote_id.clone()),
        })?;

        tracing::info!(remote_id = %self.remote_id, "Offer sent");
        Ok(())
    }

    /// Teacher side: `OfferSent -> AnswerExchanged`. Any other state is a
    /// protocol violation and leaves the session untouched.
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.role != NegotiationRole::Offerer || self.state != NegotiationState::OfferSent {
            tracing::warn!(
                remote_id = %self.remote_id,
                state = %self.state,
                "Ignoring answer outside of OfferSent"
            );
            return Err(SignalingError::protocol_violation("answer", self.state));
        }

        let applied = self.transport.set_remote_description(answer.clone()).await;
        applied.map_err(|e| self.fail(e))?;

        self.remote_description = Some(answer);
        self.state = NegotiationState::AnswerExchanged;
        tracing::info!(remote_id = %self.remote_id, "Answer applied");

        self.drain_pending_candidates().await;
        Ok(())
    }

    /// Student side: `Idle -> OfferReceived -> AnswerExchanged`.
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> Result<()> {
        self.expect(NegotiationRole::Answerer, NegotiationState::Idle, "offer")?;
        self.state = NegotiationState::OfferReceived;

        let applied = self.transport.set_remote_description(offer.clone()).await;
        applied.map_err(|e| self.fail(e))?;
        self.remote_description = Some(offer);

        self.drain_pending_candidates().await;

        let answer = self.transport.create_answer(MediaConstraints::VIEWER).await;
        let answer = answer.map_err(|e| self.fail(e))?;
        let applied = self.transport.set_local_description(answer.clone()).await;
        applied.map_err(|e| self.fail(e))?;

        self.local_description = Some(answer.clone());
        self.send(ClientMessage::Answer {
            answer: encode_payload(&answer)?,
            target_id: self.remote_id.clone(),
        })?;
        self.state = NegotiationState::AnswerExchanged;

        tracing::info!(remote_id = %self.remote_id, "Answer sent");
        Ok(())
    }

    /// Applies a candidate from the remote peer, or queues it until the
    /// remote description exists.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state.is_terminal() {
            tracing::debug!(remote_id = %self.remote_id, "Dropping candidate for failed session");
            return Ok(());
        }

        if self.remote_description.is_none() {
            self.pending_candidates.push_back(candidate);
            tracing::debug!(
                remote_id = %self.remote_id,
                queue_size = self.pending_candidates.len(),
                "ICE candidate queued"
            );
            return Ok(());
        }

        self.transport
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| SignalingError::transport(&self.remote_id, e))
    }

    /// Forwards a locally gathered candidate to the remote peer.
    pub fn send_local_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.send(ClientMessage::IceCandidate {
            candidate: encode_payload(&candidate)?,
            target_id: Some(self.remote_id.clone()),
        })
    }

    pub fn on_connectivity(&mut self, connectivity: ConnectivityState) -> ConnectivityOutcome {
        if self.state.is_terminal() {
            return ConnectivityOutcome::TearDown;
        }

        match connectivity {
            ConnectivityState::Connected => {
                self.state = NegotiationState::Connected;
                tracing::info!(remote_id = %self.remote_id, "Media path connected");
                ConnectivityOutcome::Continue
            }
            ConnectivityState::Failed => {
                self.state = NegotiationState::Failed;
                tracing::error!(remote_id = %self.remote_id, "Media path failed");
                ConnectivityOutcome::Failed
            }
            ConnectivityState::Closed => ConnectivityOutcome::TearDown,
            ConnectivityState::Disconnected => {
                tracing::warn!(remote_id = %self.remote_id, "Media path disconnected");
                ConnectivityOutcome::Continue
            }
            ConnectivityState::New | ConnectivityState::Connecting => ConnectivityOutcome::Continue,
        }
    }

    /// Releases the underlying transport.
    pub async fn close(&mut self) {
        self.pending_candidates.clear();
        if let Err(e) = self.transport.close().await {
            tracing::warn!(remote_id = %self.remote_id, error = %e, "Error closing transport");
        }
        tracing::debug!(remote_id = %self.remote_id, "Negotiation closed");
    }

    async fn drain_pending_candidates(&mut self) {
        if self.pending_candidates.is_empty() {
            return;
        }

        tracing::info!(
            remote_id = %self.remote_id,
            count = self.pending_candidates.len(),
            "Flushing queued ICE candidates"
        );

        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                tracing::error!(remote_id = %self.remote_id, error = %e, "Failed to add queued ICE candidate");
            }
        }
    }

    fn expect(&self, role: NegotiationRole, state: NegotiationState, message: &str) -> Result<()> {
        if self.role != role || self.state != state {
            return Err(SignalingError::protocol_violation(message, self.state));
        }
        Ok(())
    }

    fn fail(&mut self, error: SignalingError) -> SignalingError {
        self.state = NegotiationState::Failed;
        tracing::error!(remote_id = %self.remote_id, error = %error, "Negotiation failed");
        SignalingError::transport(&self.remote_id, error)
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.signals
            .send(message)
            .map_err(|_| SignalingError::Connection("signaling channel closed".to_string()))
    }
}
