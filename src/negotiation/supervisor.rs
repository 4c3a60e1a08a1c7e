use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::session::{ConnectivityOutcome, NegotiationSession, NegotiationState};
use super::transport::{
    ConnectivityState, MediaTransport, SignalSender, TransportEvent, TransportEventKind, TransportEvents, TransportFactory,
};
use crate::error::{Result, SignalingError};
use crate::signaling::messages::decode_payload;
use crate::signaling::{ClientMessage, IceCandidate, SessionDescription};

type SharedSession<T> = Arc<Mutex<NegotiationSession<T>>>;

/// Connectivity change surfaced to whoever drives the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub remote_id: String,
    pub state: ConnectivityState,
}

fn failed(remote_id: &str, error: SignalingError) -> ConnectionStatus {
    tracing::error!(remote_id = %remote_id, error = %error, "Negotiation failed");
    ConnectionStatus {
        remote_id: remote_id.to_string(),
        state: ConnectivityState::Failed,
    }
}

/// Applies one engine callback to its session. `None` means the event was
/// stale; otherwise the outcome and the status worth surfacing.
async fn apply_transport_event<T: MediaTransport>(
    session: &SharedSession<T>,
    event: TransportEvent,
) -> Option<(ConnectivityOutcome, Option<ConnectionStatus>)> {
    let mut session = session.lock().await;
    if session.id() != event.session_id {
        tracing::debug!(remote_id = %event.remote_id, "Ignoring event from a replaced transport");
        return None;
    }

    match event.kind {
        TransportEventKind::LocalCandidate(candidate) => {
            if let Err(e) = session.send_local_candidate(candidate) {
                tracing::warn!(remote_id = %event.remote_id, error = %e, "Failed to send local candidate");
            }
            Some((ConnectivityOutcome::Continue, None))
        }
        TransportEventKind::Connectivity(state) => {
            let outcome = session.on_connectivity(state);
            let status = match state {
                ConnectivityState::New | ConnectivityState::Connecting => None,
                _ => Some(ConnectionStatus {
                    remote_id: event.remote_id,
                    state,
                }),
            };
            Some((outcome, status))
        }
    }
}

/// Teacher side: one negotiation per watching student.
pub struct TeacherSupervisor<F: TransportFactory> {
    factory: F,
    room_code: String,
    signals: SignalSender,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_session_id: AtomicU64,
    streaming: AtomicBool,
    roster: RwLock<BTreeSet<String>>,
    sessions: RwLock<HashMap<String, SharedSession<F::Transport>>>,
}

impl<F: TransportFactory> TeacherSupervisor<F> {
    pub fn new(
        factory: F,
        room_code: impl Into<String>,
        signals: SignalSender,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            factory,
            room_code: room_code.into(),
            signals,
            events,
            next_session_id: AtomicU64::new(1),
            streaming: AtomicBool::new(false),
            roster: RwLock::new(BTreeSet::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub async fn students(&self) -> Vec<String> {
        self.roster.read().await.iter().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_state(&self, student_id: &str) -> Option<NegotiationState> {
        let session = self.session(student_id).await?;
        let state = session.lock().await.state();
        Some(state)
    }

    async fn session(&self, student_id: &str) -> Option<SharedSession<F::Transport>> {
        self.sessions.read().await.get(student_id).cloned()
    }

    /// Students already in the room when the teacher joined.
    pub async fn set_roster(&self, student_ids: impl IntoIterator<Item = String>) {
        let mut roster = self.roster.write().await;
        roster.extend(student_ids);
    }

    /// Returns a `Failed` status when the student's negotiation could not start.
    pub async fn student_joined(&self, student_id: &str) -> Option<ConnectionStatus> {
        self.roster.write().await.insert(student_id.to_string());

        if !self.is_streaming() {
            return None;
        }
        self.open_session(student_id).await.err().map(|e| failed(student_id, e))
    }

    pub async fn student_left(&self, student_id: &str) {
        self.roster.write().await.remove(student_id);
        self.close_session(student_id).await;
    }

    /// Announces the stream and opens a session for every known student.
    /// One student's failure does not stop the others; each one comes back as
    /// a `Failed` status.
    pub async fn start_streaming(&self) -> Result<Vec<ConnectionStatus>> {
        self.streaming.store(true, Ordering::SeqCst);
        self.send(ClientMessage::StartStream {
            room_code: self.room_code.clone(),
        })?;

        let mut failures = Vec::new();
        for student_id in self.students().await {
            if let Err(e) = self.open_session(&student_id).await {
                failures.push(failed(&student_id, e));
            }
        }

        let sessions = self.session_count().await;
        tracing::info!(
            room_code = %self.room_code,
            sessions = sessions,
            failed = failures.len(),
            "Streaming started"
        );
        Ok(failures)
    }

    /// Closes every session and announces the end of the stream.
    pub async fn stop_streaming(&self) -> Result<()> {
        self.streaming.store(false, Ordering::SeqCst);

        let sessions: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in sessions {
            session.lock().await.close().await;
        }

        tracing::info!(room_code = %self.room_code, "Streaming stopped");
        self.send(ClientMessage::StopStream {
            room_code: self.room_code.clone(),
        })
    }

    /// No-op when a session for the student already exists.
    async fn open_session(&self, student_id: &str) -> Result<()> {
        if self.sessions.read().await.contains_key(student_id) {
            return Ok(());
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let events = TransportEvents::new(student_id, session_id, self.events.clone());
        let transport = self.factory.create(events).await?;

        let session = Arc::new(Mutex::new(NegotiationSession::offerer(
            session_id,
            student_id,
            self.room_code.clone(),
            transport,
            self.signals.clone(),
        )));
        // hold the session until the offer is out so early messages queue behind it
        let mut guard = session.lock().await;

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(student_id) {
                drop(sessions);
                guard.close().await;
                return Ok(());
            }
            sessions.insert(student_id.to_string(), session.clone());
        }

        if let Err(e) = guard.start_offer().await {
            guard.close().await;
            drop(guard);
            self.remove_if_same(student_id, &session).await;
            return Err(e);
        }

        Ok(())
    }

    async fn close_session(&self, student_id: &str) {
        let session = self.sessions.write().await.remove(student_id);
        if let Some(session) = session {
            session.lock().await.close().await;
            tracing::info!(student_id = %student_id, "Negotiation torn down");
        }
    }

    async fn remove_if_same(&self, student_id: &str, session: &SharedSession<F::Transport>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(student_id).is_some_and(|current| Arc::ptr_eq(current, session)) {
            sessions.remove(student_id);
        }
    }

    pub async fn handle_answer(&self, sender_id: &str, answer: Value) -> Result<()> {
        let answer: SessionDescription = decode_payload(answer)?;
        let session = self
            .session(sender_id)
            .await
            .ok_or_else(|| SignalingError::StaleMessage(sender_id.to_string()))?;

        let result = session.lock().await.apply_answer(answer).await;
        result
    }

    pub async fn handle_remote_candidate(&self, sender_id: &str, candidate: Value) -> Result<()> {
        let candidate: IceCandidate = decode_payload(candidate)?;
        let session = self
            .session(sender_id)
            .await
            .ok_or_else(|| SignalingError::StaleMessage(sender_id.to_string()))?;

        let result = session.lock().await.add_remote_candidate(candidate).await;
        result
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) -> Option<ConnectionStatus> {
        let remote_id = event.remote_id.clone();
        let session = self.session(&remote_id).await?;

        let (outcome, status) = apply_transport_event(&session, event).await?;
        if outcome != ConnectivityOutcome::Continue {
            self.remove_if_same(&remote_id, &session).await;
            session.lock().await.close().await;
            tracing::info!(student_id = %remote_id, outcome = ?outcome, "Negotiation torn down");
        }
        status
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.signals
            .send(message)
            .map_err(|_| SignalingError::Connection("signaling channel closed".to_string()))
    }
}

/// Student side: at most one negotiation, with whichever teacher offered last.
pub struct StudentSupervisor<F: TransportFactory> {
    factory: F,
    signals: SignalSender,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_session_id: AtomicU64,
    current: Mutex<Option<SharedSession<F::Transport>>>,
}

impl<F: TransportFactory> StudentSupervisor<F> {
    pub fn new(factory: F, signals: SignalSender, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            factory,
            signals,
            events,
            next_session_id: AtomicU64::new(1),
            current: Mutex::new(None),
        }
    }

    async fn current(&self) -> Option<SharedSession<F::Transport>> {
        self.current.lock().await.clone()
    }

    pub async fn teacher_id(&self) -> Option<String> {
        let session = self.current().await?;
        let remote_id = session.lock().await.remote_id().to_string();
        Some(remote_id)
    }

    pub async fn state(&self) -> Option<NegotiationState> {
        let session = self.current().await?;
        let state = session.lock().await.state();
        Some(state)
    }

    /// Every offer starts a fresh negotiation: whatever came before, including
    /// queued candidates, is discarded with the old session. An undecodable
    /// offer is an error; a negotiation that fails comes back as a `Failed`
    /// status after its session is torn down.
    pub async fn handle_offer(&self, sender_id: &str, offer: Value) -> Result<Option<ConnectionStatus>> {
        let offer: SessionDescription = decode_payload(offer)?;
        let result = self.answer_offer(sender_id, offer).await;
        Ok(result.err().map(|e| failed(sender_id, e)))
    }

    async fn answer_offer(&self, sender_id: &str, offer: SessionDescription) -> Result<()> {
        let session = {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.take() {
                let mut previous = previous.lock().await;
                tracing::info!(
                    previous_teacher = %previous.remote_id(),
                    teacher_id = %sender_id,
                    "Restarting negotiation for new offer"
                );
                previous.close().await;
            }

            let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
            let events = TransportEvents::new(sender_id, session_id, self.events.clone());
            let transport = self.factory.create(events).await?;
            let session = Arc::new(Mutex::new(NegotiationSession::answerer(
                session_id,
                sender_id,
                transport,
                self.signals.clone(),
            )));
            *current = Some(session.clone());
            session
        };

        let result = session.lock().await.accept_offer(offer).await;
        if result.is_err() {
            self.close_if_same(&session).await;
        }
        result
    }

    pub async fn handle_remote_candidate(&self, sender_id: &str, candidate: Value) -> Result<()> {
        let candidate: IceCandidate = decode_payload(candidate)?;
        let session = self.session_for(sender_id).await?;

        let result = session.lock().await.add_remote_candidate(candidate).await;
        result
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) -> Option<ConnectionStatus> {
        let session = self.session_for(&event.remote_id).await.ok()?;

        let (outcome, status) = apply_transport_event(&session, event).await?;
        if outcome != ConnectivityOutcome::Continue {
            self.close_if_same(&session).await;
        }
        status
    }

    /// Stream stopped or teacher gone.
    pub async fn close(&self) {
        let session = self.current.lock().await.take();
        if let Some(session) = session {
            session.lock().await.close().await;
            tracing::info!("Negotiation with teacher closed");
        }
    }

    async fn session_for(&self, sender_id: &str) -> Result<SharedSession<F::Transport>> {
        let session = self
            .current()
            .await
            .ok_or_else(|| SignalingError::StaleMessage(sender_id.to_string()))?;

        let matches = session.lock().await.remote_id() == sender_id;
        if !matches {
            return Err(SignalingError::StaleMessage(sender_id.to_string()));
        }
        Ok(session)
    }

    async fn close_if_same(&self, session: &SharedSession<F::Transport>) {
        let removed = {
            let mut current = self.current.lock().await;
            match current.as_ref() {
                Some(existing) if Arc::ptr_eq(existing, session) => current.take(),
                _ => None,
            }
        };
        if let Some(session) = removed {
            session.lock().await.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::testing::{candidate, Call, FakeFactory};
    use crate::signaling::messages::encode_payload;

    struct TeacherHarness {
        supervisor: TeacherSupervisor<FakeFactory>,
        factory: FakeFactory,
        signals: mpsc::UnboundedReceiver<ClientMessage>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    }

    fn teacher() -> TeacherHarness {
        let factory = FakeFactory::new();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let supervisor = TeacherSupervisor::new(factory.clone(), "482913", signal_tx, event_tx);
        TeacherHarness {
            supervisor,
            factory,
            signals,
            events,
        }
    }

    fn student() -> (
        StudentSupervisor<FakeFactory>,
        FakeFactory,
        mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        let factory = FakeFactory::new();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        (StudentSupervisor::new(factory.clone(), signal_tx, event_tx), factory, signals)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn answer(sdp: &str) -> Value {
        encode_payload(&SessionDescription::answer(sdp)).unwrap()
    }

    fn offer(sdp: &str) -> Value {
        encode_payload(&SessionDescription::offer(sdp)).unwrap()
    }

    fn candidate_value(name: &str) -> Value {
        encode_payload(&candidate(name)).unwrap()
    }

    fn offer_targets(messages: &[ClientMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|message| match message {
                ClientMessage::Offer { target_id, .. } => target_id.clone(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_classroom_negotiation_scenario() {
        let mut h = teacher();
        assert_eq!(h.supervisor.student_joined("S1").await, None);
        assert_eq!(h.supervisor.student_joined("S2").await, None);
        assert_eq!(h.supervisor.session_count().await, 0);

        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());
        assert_eq!(h.supervisor.session_count().await, 2);
        let sent = drain(&mut h.signals);
        assert_eq!(
            sent[0],
            ClientMessage::StartStream {
                room_code: "482913".to_string()
            }
        );
        assert_eq!(offer_targets(&sent), vec!["S1".to_string(), "S2".to_string()]);

        h.supervisor.handle_answer("S1", answer("from-s1")).await.unwrap();
        assert_eq!(h.supervisor.session_state("S1").await, Some(NegotiationState::AnswerExchanged));
        assert_eq!(h.supervisor.session_state("S2").await, Some(NegotiationState::OfferSent));
    }

    #[tokio::test]
    async fn test_student_joining_while_streaming_gets_offer() {
        let mut h = teacher();
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());
        drain(&mut h.signals);

        assert_eq!(h.supervisor.student_joined("late").await, None);
        assert_eq!(offer_targets(&drain(&mut h.signals)), vec!["late".to_string()]);
        assert_eq!(h.supervisor.session_state("late").await, Some(NegotiationState::OfferSent));

        // a duplicate notification does not start a second negotiation
        assert_eq!(h.supervisor.student_joined("late").await, None);
        assert!(drain(&mut h.signals).is_empty());
        assert_eq!(h.factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_student_left_closes_its_session_only() {
        let h = teacher();
        h.supervisor.set_roster(vec!["S1".to_string(), "S2".to_string()]).await;
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());

        h.supervisor.student_left("S1").await;
        assert!(h.factory.transport("S1").unwrap().is_closed());
        assert!(!h.factory.transport("S2").unwrap().is_closed());
        assert_eq!(h.supervisor.session_count().await, 1);
        assert_eq!(h.supervisor.students().await, vec!["S2".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_streaming_closes_everything() {
        let mut h = teacher();
        h.supervisor.set_roster(vec!["S1".to_string(), "S2".to_string()]).await;
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());
        drain(&mut h.signals);

        h.supervisor.stop_streaming().await.unwrap();
        assert_eq!(h.supervisor.session_count().await, 0);
        assert!(!h.supervisor.is_streaming());
        assert!(h.factory.transport("S1").unwrap().is_closed());
        assert!(h.factory.transport("S2").unwrap().is_closed());
        assert_eq!(
            drain(&mut h.signals),
            vec![ClientMessage::StopStream {
                room_code: "482913".to_string()
            }]
        );

        // joins after stopping do not negotiate
        assert_eq!(h.supervisor.student_joined("S3").await, None);
        assert_eq!(h.supervisor.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_one_failing_student_does_not_affect_others() {
        let h = teacher();
        h.factory.fail_negotiation_for("S1");
        h.supervisor.set_roster(vec!["S1".to_string(), "S2".to_string()]).await;

        let failures = h.supervisor.start_streaming().await.unwrap();
        assert_eq!(
            failures,
            vec![ConnectionStatus {
                remote_id: "S1".to_string(),
                state: ConnectivityState::Failed,
            }]
        );
        assert_eq!(h.supervisor.session_count().await, 1);
        assert_eq!(h.supervisor.session_state("S1").await, None);
        assert!(h.factory.transport("S1").unwrap().is_closed());
        assert_eq!(h.supervisor.session_state("S2").await, Some(NegotiationState::OfferSent));
    }

    #[tokio::test]
    async fn test_late_student_failure_is_reported() {
        let mut h = teacher();
        h.factory.fail_negotiation_for("late");
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());
        drain(&mut h.signals);

        let status = h.supervisor.student_joined("late").await;
        assert_eq!(status.map(|s| s.state), Some(ConnectivityState::Failed));
        assert_eq!(h.supervisor.session_count().await, 0);
        assert!(h.factory.transport("late").unwrap().is_closed());
        assert!(offer_targets(&drain(&mut h.signals)).is_empty());
    }

    #[tokio::test]
    async fn test_stale_messages_are_reported() {
        let h = teacher();
        let result = h.supervisor.handle_answer("ghost", answer("x")).await;
        assert!(matches!(result, Err(SignalingError::StaleMessage(_))));

        let result = h.supervisor.handle_remote_candidate("ghost", candidate_value("c")).await;
        assert!(matches!(result, Err(SignalingError::StaleMessage(_))));

        let result = h.supervisor.handle_answer("ghost", serde_json::json!({"sdp": 5})).await;
        assert!(matches!(result, Err(SignalingError::MalformedMessage(_))));
    }

    #[tokio::test]
    async fn test_teacher_queues_candidates_until_answer() {
        let h = teacher();
        h.supervisor.set_roster(vec!["S1".to_string()]).await;
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());

        h.supervisor.handle_remote_candidate("S1", candidate_value("c1")).await.unwrap();
        h.supervisor.handle_remote_candidate("S1", candidate_value("c2")).await.unwrap();
        let transport = h.factory.transport("S1").unwrap();
        assert!(transport.applied_candidates().is_empty());

        h.supervisor.handle_answer("S1", answer("a")).await.unwrap();
        assert_eq!(transport.applied_candidates(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_transport_events_drive_teacher_sessions() {
        let mut h = teacher();
        h.supervisor.set_roster(vec!["S1".to_string()]).await;
        assert!(h.supervisor.start_streaming().await.unwrap().is_empty());
        h.supervisor.handle_answer("S1", answer("a")).await.unwrap();
        drain(&mut h.signals);

        let engine = h.factory.events("S1").unwrap();
        engine.local_candidate(candidate("mine"));
        let event = h.events.try_recv().unwrap();
        assert_eq!(event.session_id, 1);

        assert_eq!(h.supervisor.handle_transport_event(event).await, None);
        match drain(&mut h.signals).as_slice() {
            [ClientMessage::IceCandidate { target_id, candidate }] => {
                assert_eq!(target_id.as_deref(), Some("S1"));
                assert_eq!(candidate["candidate"], "mine");
            }
            other => panic!("unexpected messages {:?}", other),
        }

        engine.connectivity(ConnectivityState::Connected);
        let status = h.supervisor.handle_transport_event(h.events.try_recv().unwrap()).await;
        assert_eq!(
            status,
            Some(ConnectionStatus {
                remote_id: "S1".to_string(),
                state: ConnectivityState::Connected
            })
        );
        assert_eq!(h.supervisor.session_state("S1").await, Some(NegotiationState::Connected));

        engine.connectivity(ConnectivityState::Failed);
        let status = h.supervisor.handle_transport_event(h.events.try_recv().unwrap()).await;
        assert_eq!(status.map(|s| s.state), Some(ConnectivityState::Failed));
        assert_eq!(h.supervisor.session_state("S1").await, None);
        assert!(h.factory.transport("S1").unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_student_answers_first_offer() {
        let (supervisor, factory, mut signals) = student();
        assert_eq!(supervisor.state().await, None);

        assert_eq!(supervisor.handle_offer("teacher", offer("o1")).await.unwrap(), None);
        assert_eq!(supervisor.state().await, Some(NegotiationState::AnswerExchanged));
        assert_eq!(supervisor.teacher_id().await.as_deref(), Some("teacher"));

        match drain(&mut signals).as_slice() {
            [ClientMessage::Answer { target_id, .. }] => assert_eq!(target_id, "teacher"),
            other => panic!("unexpected messages {:?}", other),
        }
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_answer_is_reported() {
        let (supervisor, factory, mut signals) = student();
        factory.fail_negotiation_for("teacher");

        let status = supervisor.handle_offer("teacher", offer("o1")).await.unwrap();
        assert_eq!(
            status,
            Some(ConnectionStatus {
                remote_id: "teacher".to_string(),
                state: ConnectivityState::Failed,
            })
        );
        assert_eq!(supervisor.state().await, None);
        assert!(factory.transport("teacher").unwrap().is_closed());
        assert!(drain(&mut signals).is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_offer_is_an_error() {
        let (supervisor, factory, _signals) = student();
        let result = supervisor.handle_offer("teacher", serde_json::json!({"sdp": 42})).await;
        assert!(result.is_err());
        assert_eq!(factory.created_count(), 0);
    }

    #[tokio::test]
    async fn test_candidates_before_any_offer_are_stale() {
        let (supervisor, _factory, _signals) = student();
        let result = supervisor.handle_remote_candidate("teacher", candidate_value("c")).await;
        assert!(matches!(result, Err(SignalingError::StaleMessage(_))));
    }

    #[tokio::test]
    async fn test_reoffer_restarts_cleanly() {
        let (supervisor, factory, mut signals) = student();
        assert_eq!(supervisor.handle_offer("teacher", offer("o1")).await.unwrap(), None);
        supervisor.handle_remote_candidate("teacher", candidate_value("old")).await.unwrap();

        assert_eq!(supervisor.handle_offer("teacher", offer("o2")).await.unwrap(), None);
        let transports = factory.all_transports("teacher");
        assert_eq!(transports.len(), 2);
        assert!(transports[0].is_closed());
        assert!(!transports[1].is_closed());

        // nothing from the first negotiation leaks into the second
        assert!(transports[1].applied_candidates().is_empty());
        assert_eq!(
            transports[1].calls()[0],
            Call::SetRemote(SessionDescription::offer("o2"))
        );
        assert_eq!(supervisor.state().await, Some(NegotiationState::AnswerExchanged));
        assert_eq!(drain(&mut signals).len(), 2);
    }

    #[tokio::test]
    async fn test_offer_from_new_teacher_replaces_session() {
        let (supervisor, factory, _signals) = student();
        assert_eq!(supervisor.handle_offer("teacher_a", offer("o1")).await.unwrap(), None);
        assert_eq!(supervisor.handle_offer("teacher_b", offer("o2")).await.unwrap(), None);

        assert!(factory.transport("teacher_a").unwrap().is_closed());
        assert_eq!(supervisor.teacher_id().await.as_deref(), Some("teacher_b"));

        let result = supervisor.handle_remote_candidate("teacher_a", candidate_value("c")).await;
        assert!(matches!(result, Err(SignalingError::StaleMessage(_))));
        supervisor.handle_remote_candidate("teacher_b", candidate_value("c")).await.unwrap();
        assert_eq!(factory.transport("teacher_b").unwrap().applied_candidates(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_events_from_replaced_transport_are_ignored() {
        let (supervisor, _factory, _signals) = student();
        assert_eq!(supervisor.handle_offer("teacher", offer("o1")).await.unwrap(), None);
        assert_eq!(supervisor.handle_offer("teacher", offer("o2")).await.unwrap(), None);

        let stale = TransportEvent {
            remote_id: "teacher".to_string(),
            session_id: 1,
            kind: TransportEventKind::Connectivity(ConnectivityState::Closed),
        };
        assert_eq!(supervisor.handle_transport_event(stale).await, None);
        assert_eq!(supervisor.state().await, Some(NegotiationState::AnswerExchanged));

        let current = TransportEvent {
            remote_id: "teacher".to_string(),
            session_id: 2,
            kind: TransportEventKind::Connectivity(ConnectivityState::Closed),
        };
        let status = supervisor.handle_transport_event(current).await;
        assert_eq!(status.map(|s| s.state), Some(ConnectivityState::Closed));
        assert_eq!(supervisor.state().await, None);
    }

    #[tokio::test]
    async fn test_student_close() {
        let (supervisor, factory, _signals) = student();
        assert_eq!(supervisor.handle_offer("teacher", offer("o1")).await.unwrap(), None);

        supervisor.close().await;
        assert_eq!(supervisor.state().await, None);
        assert!(factory.transport("teacher").unwrap().is_closed());
    }
}
