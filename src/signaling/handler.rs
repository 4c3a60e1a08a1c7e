use std::sync::Arc;

use serde_json::Value;
use warp::ws::Message;

use super::messages::{ClientMessage, ServerMessage};
use super::peer::{PeerRole, PeerSession};
use super::router::PeerSender;
use super::server::SignalingServer;
use crate::error::SignalingError;

/// Handles everything one signaling connection says, from join to disconnect.
pub struct SignalingHandler {
    server: Arc<SignalingServer>,
    session: PeerSession,
    sender: PeerSender,
}

impl SignalingHandler {
    pub async fn new(server: Arc<SignalingServer>, sender: PeerSender) -> Self {
        Self::with_session(server, PeerSession::new(), sender).await
    }

    pub async fn with_session(
        server: Arc<SignalingServer>,
        session: PeerSession,
        sender: PeerSender,
    ) -> Self {
        server.router().register(session.id(), sender.clone()).await;
        Self {
            server,
            session,
            sender,
        }
    }

    pub fn peer_id(&self) -> &str {
        self.session.id()
    }

    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    /// Parses and applies one text frame. Malformed frames are dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(
                    peer_id = %self.session.id(),
                    error = %e,
                    raw_message = %text,
                    "Dropping malformed signaling message"
                );
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        tracing::debug!(peer_id = %self.session.id(), kind = message.kind(), "Handling signaling message");

        match message {
            ClientMessage::TeacherJoin { room_code } => self.join_as_teacher(&room_code).await,
            ClientMessage::StudentJoin { room_code } => self.join_as_student(&room_code).await,
            ClientMessage::StartStream { room_code } => self.set_streaming(&room_code, true).await,
            ClientMessage::StopStream { room_code } => self.set_streaming(&room_code, false).await,
            ClientMessage::Offer { offer, target_id, .. } => {
                self.relay(
                    "offer",
                    target_id.as_deref(),
                    ServerMessage::Offer {
                        offer,
                        sender_id: self.session.id().to_string(),
                    },
                )
                .await
            }
            ClientMessage::Answer { answer, target_id } => {
                self.relay(
                    "answer",
                    Some(&target_id),
                    ServerMessage::Answer {
                        answer,
                        sender_id: self.session.id().to_string(),
                    },
                )
                .await
            }
            ClientMessage::IceCandidate { candidate, target_id } => {
                self.relay_candidate(candidate, target_id.as_deref()).await
            }
        }
    }

    async fn join_as_teacher(&mut self, room_code: &str) {
        if let Err(e) = self.session.check_join(PeerRole::Teacher, room_code) {
            self.reject_join(e);
            return;
        }

        let peer_id = self.session.id().to_string();
        self.server.router().join_group(room_code, &peer_id).await;
        match self.server.registry().join_as_teacher(room_code, &peer_id).await {
            Ok(student_ids) => {
                self.complete_join(PeerRole::Teacher, room_code, student_ids);
            }
            Err(e) => self.abandon_join(room_code, e).await,
        }
    }

    async fn join_as_student(&mut self, room_code: &str) {
        if let Err(e) = self.session.check_join(PeerRole::Student, room_code) {
            self.reject_join(e);
            return;
        }

        let peer_id = self.session.id().to_string();
        // in the broadcast group before the registry counts us, so a stream
        // started in between still reaches this peer
        self.server.router().join_group(room_code, &peer_id).await;
        match self.server.registry().join_as_student(room_code, &peer_id).await {
            Ok(joined) => {
                self.complete_join(PeerRole::Student, room_code, Vec::new());

                // a repeated join changes nothing the teacher needs to hear about
                let (true, Some(teacher_id)) = (joined.added, joined.teacher) else {
                    return;
                };
                self.server
                    .router()
                    .send_to(
                        &teacher_id,
                        &ServerMessage::StudentJoined {
                            student_id: peer_id,
                            student_count: joined.student_count,
                        },
                    )
                    .await;
            }
            Err(e) => self.abandon_join(room_code, e).await,
        }
    }

    fn complete_join(&mut self, role: PeerRole, room_code: &str, student_ids: Vec<String>) {
        if let Err(e) = self.session.assign(role, room_code) {
            // check_join ran just before, so only a logic error lands here
            tracing::error!(peer_id = %self.session.id(), error = %e, "Join bookkeeping failed");
            return;
        }

        self.reply(ServerMessage::JoinedRoom {
            room_code: room_code.to_string(),
            user_type: role,
            student_ids,
        });
    }

    async fn abandon_join(&self, room_code: &str, error: SignalingError) {
        if !self.session.is_joined() {
            self.server.router().leave_group(room_code, self.session.id()).await;
        }
        self.reject_join(error);
    }

    fn reject_join(&self, error: SignalingError) {
        let message = match &error {
            SignalingError::RoomNotFound(code) => {
                tracing::warn!(peer_id = %self.session.id(), room_code = %code, "Join for unknown room");
                "Room not found".to_string()
            }
            other => {
                tracing::warn!(peer_id = %self.session.id(), error = %other, "Join rejected");
                other.to_string()
            }
        };
        self.reply(ServerMessage::error(message));
    }

    async fn set_streaming(&self, room_code: &str, active: bool) {
        let peer_id = self.session.id();

        match self.server.registry().set_active(room_code, active, peer_id).await {
            Ok(()) => {
                let notice = if active {
                    ServerMessage::StreamStarted
                } else {
                    ServerMessage::StreamStopped
                };
                let delivered = self
                    .server
                    .router()
                    .broadcast(room_code, Some(peer_id), &notice)
                    .await;
                tracing::info!(
                    room_code = %room_code,
                    active = active,
                    recipients = delivered,
                    "Stream state broadcast"
                );
            }
            Err(SignalingError::UnauthorizedActivation { .. }) => {
                tracing::debug!(
                    peer_id = %peer_id,
                    room_code = %room_code,
                    "Ignoring stream control from non-teacher"
                );
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, room_code = %room_code, error = %e, "Stream control failed");
            }
        }
    }

    async fn relay_candidate(&self, candidate: Value, target_id: Option<&str>) {
        let message = ServerMessage::IceCandidate {
            candidate,
            sender_id: self.session.id().to_string(),
        };
        self.relay("ice-candidate", target_id, message).await;
    }

    async fn relay(&self, kind: &str, target_id: Option<&str>, message: ServerMessage) {
        let peer_id = self.session.id();
        let Some(room_code) = self.session.room_code() else {
            tracing::warn!(peer_id = %peer_id, kind = kind, "Dropping relay from peer outside any room");
            return;
        };

        let delivered = self
            .server
            .router()
            .relay(peer_id, Some(room_code), target_id, &message)
            .await;

        tracing::debug!(
            peer_id = %peer_id,
            room_code = %room_code,
            target_id = target_id.unwrap_or("room"),
            kind = kind,
            delivered = delivered,
            "Relayed signaling message"
        );
    }

    fn reply(&self, message: ServerMessage) {
        match message.to_json() {
            Ok(text) => {
                if self.sender.send(Message::text(text)).is_err() {
                    tracing::debug!(peer_id = %self.session.id(), "Reply dropped, connection closing");
                }
            }
            Err(e) => tracing::error!(peer_id = %self.session.id(), error = %e, "Failed to encode reply"),
        }
    }

    /// Disconnect path: leaves the room and tells whoever needs to know.
    pub async fn cleanup(&mut self) {
        let peer_id = self.session.id().to_string();
        let router = self.server.router().clone();
        router.unregister(&peer_id).await;

        let Some(room_code) = self.session.room_code().map(str::to_string) else {
            tracing::debug!(peer_id = %peer_id, "Connection closed before joining a room");
            return;
        };
        router.leave_group(&room_code, &peer_id).await;

        let Some(departure) = self
            .server
            .registry()
            .leave(&peer_id, self.session.role(), &room_code)
            .await
        else {
            return;
        };

        match departure.role {
            PeerRole::Teacher if departure.teacher_cleared => {
                let notified = router
                    .broadcast(&room_code, None, &ServerMessage::TeacherDisconnected)
                    .await;
                tracing::info!(room_code = %room_code, notified = notified, "Teacher disconnected");
            }
            PeerRole::Student => {
                if let Some(teacher_id) = departure.teacher.as_deref() {
                    router
                        .send_to(
                            teacher_id,
                            &ServerMessage::StudentLeft {
                                student_id: peer_id.clone(),
                                student_count: departure.student_count,
                            },
                        )
                        .await;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct TestPeer {
        handler: SignalingHandler,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl TestPeer {
        async fn connect(server: &Arc<SignalingServer>, id: &str) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let handler = SignalingHandler::with_session(server.clone(), PeerSession::with_id(id), tx).await;
            Self { handler, rx }
        }

        async fn send(&mut self, value: serde_json::Value) {
            self.handler.handle_text(&value.to_string()).await;
        }

        fn drain(&mut self) -> Vec<serde_json::Value> {
            let mut out = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                out.push(serde_json::from_str(message.to_str().unwrap()).unwrap());
            }
            out
        }
    }

    fn server() -> Arc<SignalingServer> {
        Arc::new(SignalingServer::new(RoomConfig::default()))
    }

    #[tokio::test]
    async fn test_classroom_scenario() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;

        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let joined = teacher.drain();
        assert_eq!(joined, vec![json!({"type": "joined-room", "roomCode": code, "userType": "teacher"})]);

        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        let mut s2 = TestPeer::connect(&server, "s2").await;
        s2.send(json!({"type": "student-join", "roomCode": code})).await;

        assert_eq!(s1.drain()[0]["type"], "joined-room");
        assert_eq!(s2.drain()[0]["userType"], "student");
        let notices = teacher.drain();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0], json!({"type": "student-joined", "studentId": "s1", "studentCount": 1}));
        assert_eq!(notices[1], json!({"type": "student-joined", "studentId": "s2", "studentCount": 2}));

        teacher.send(json!({"type": "start-stream", "roomCode": code})).await;
        assert!(server.registry().exists(&code).await.is_active);
        assert_eq!(s1.drain(), vec![json!({"type": "stream-started"})]);
        assert_eq!(s2.drain(), vec![json!({"type": "stream-started"})]);
        assert!(teacher.drain().is_empty());

        let offer = json!({"sdp": "v=0 offer", "type": "offer"});
        teacher
            .send(json!({"type": "offer", "roomCode": code, "offer": offer, "targetId": "s1"}))
            .await;
        assert_eq!(s1.drain(), vec![json!({"type": "offer", "offer": offer, "senderId": "teacher"})]);
        assert!(s2.drain().is_empty());

        let answer = json!({"sdp": "v=0 answer", "type": "answer"});
        s1.send(json!({"type": "answer", "answer": answer, "targetId": "teacher"})).await;
        assert_eq!(teacher.drain(), vec![json!({"type": "answer", "answer": answer, "senderId": "s1"})]);
        assert!(s2.drain().is_empty());
    }

    #[tokio::test]
    async fn test_untargeted_candidate_broadcasts_to_room() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        teacher.drain();
        s1.drain();

        let candidate = json!({"candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0});
        s1.send(json!({"type": "ice-candidate", "candidate": candidate})).await;
        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "ice-candidate", "candidate": candidate, "senderId": "s1"})]
        );
        assert!(s1.drain().is_empty());
    }

    #[tokio::test]
    async fn test_join_unknown_room_reports_error() {
        let server = server();
        let mut peer = TestPeer::connect(&server, "s1").await;
        peer.send(json!({"type": "student-join", "roomCode": "000000"})).await;

        assert_eq!(peer.drain(), vec![json!({"type": "error", "message": "Room not found"})]);
        assert!(!peer.handler.session().is_joined());
    }

    #[tokio::test]
    async fn test_role_switch_is_rejected() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut peer = TestPeer::connect(&server, "p1").await;
        peer.send(json!({"type": "student-join", "roomCode": code})).await;
        peer.drain();

        peer.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let replies = peer.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "error");
        assert_eq!(server.registry().teacher_of(&code).await, None);
        assert_eq!(peer.handler.session().role(), PeerRole::Student);
    }

    #[tokio::test]
    async fn test_student_cannot_start_stream() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        teacher.drain();
        s1.drain();

        s1.send(json!({"type": "start-stream", "roomCode": code})).await;
        assert!(!server.registry().exists(&code).await.is_active);
        assert!(teacher.drain().is_empty());
        assert!(s1.drain().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_and_unjoined_messages_are_dropped() {
        let server = server();
        let mut peer = TestPeer::connect(&server, "p1").await;
        peer.handler.handle_text("{not json").await;
        peer.send(json!({"type": "answer"})).await;
        peer.send(json!({"type": "offer", "offer": {"sdp": "x", "type": "offer"}, "targetId": "p2"}))
            .await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_teacher_disconnect_mid_stream() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        teacher.send(json!({"type": "start-stream", "roomCode": code})).await;
        s1.drain();

        teacher.handler.cleanup().await;
        assert_eq!(s1.drain(), vec![json!({"type": "teacher-disconnected"})]);

        let status = server.registry().exists(&code).await;
        assert!(status.exists);
        assert!(!status.is_active);
        assert_eq!(server.registry().teacher_of(&code).await, None);

        s1.handler.cleanup().await;
        assert!(!server.registry().exists(&code).await.exists);
    }

    #[tokio::test]
    async fn test_student_disconnect_notifies_teacher() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        teacher.drain();

        s1.handler.cleanup().await;
        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "student-left", "studentId": "s1", "studentCount": 0})]
        );
        assert_eq!(server.registry().exists(&code).await.student_count, 0);
    }

    #[tokio::test]
    async fn test_lone_teacher_disconnect_removes_room() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;

        teacher.handler.cleanup().await;
        assert!(!server.registry().exists(&code).await.exists);
    }

    #[tokio::test]
    async fn test_repeated_student_join_notifies_teacher_once() {
        let server = server();
        let code = server.registry().create_room().await.unwrap().room_code;
        let mut teacher = TestPeer::connect(&server, "teacher").await;
        teacher.send(json!({"type": "teacher-join", "roomCode": code})).await;
        teacher.drain();

        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;

        let replies = s1.drain();
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|reply| reply["type"] == "joined-room"));
        assert_eq!(
            teacher.drain(),
            vec![json!({"type": "student-joined", "studentId": "s1", "studentCount": 1})]
        );
    }

    #[tokio::test]
    async fn test_broadcast_group_follows_membership() {
        let server = server();
        let mut stray = TestPeer::connect(&server, "stray").await;
        stray.send(json!({"type": "student-join", "roomCode": "000000"})).await;
        assert_eq!(server.router().group_size("000000").await, 0);

        let code = server.registry().create_room().await.unwrap().room_code;
        let mut s1 = TestPeer::connect(&server, "s1").await;
        s1.send(json!({"type": "student-join", "roomCode": code})).await;
        assert_eq!(server.router().group_size(&code).await, 1);

        s1.handler.cleanup().await;
        assert_eq!(server.router().group_size(&code).await, 0);
    }
}
