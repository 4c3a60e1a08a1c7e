use std::future::Future;

use tokio::sync::mpsc;

use super::{Joined, SignalingClient, SignalingWriter};
use crate::error::{Result, SignalingError};
use crate::negotiation::{ConnectionStatus, StudentSupervisor, TeacherSupervisor, TransportFactory};
use crate::signaling::{ClientMessage, PeerRole, ServerMessage};

/// What a running classroom client observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassroomEvent {
    Joined(Joined),
    StudentJoined(String),
    StudentLeft(String),
    StreamStarted,
    StreamStopped,
    TeacherDisconnected,
    Connection(ConnectionStatus),
    ServerError(String),
}

fn notify(events: &mpsc::UnboundedSender<ClassroomEvent>, event: ClassroomEvent) {
    // nobody listening is fine
    let _ = events.send(event);
}

fn server_gone() -> SignalingError {
    SignalingError::Connection("server closed the connection".to_string())
}

async fn flush(writer: &mut SignalingWriter, signals: &mut mpsc::UnboundedReceiver<ClientMessage>) -> Result<()> {
    while let Ok(signal) = signals.try_recv() {
        writer.send(&signal).await?;
    }
    Ok(())
}

/// Joins `room_code` as its teacher, streams to every student until
/// `shutdown` resolves, then stops the stream and hangs up.
pub async fn run_teacher<F, S>(
    mut client: SignalingClient,
    factory: F,
    room_code: &str,
    events: mpsc::UnboundedSender<ClassroomEvent>,
    shutdown: S,
) -> Result<()>
where
    F: TransportFactory,
    S: Future<Output = ()>,
{
    let joined = client.join(PeerRole::Teacher, room_code).await?;
    let (mut writer, mut reader) = client.split();

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let supervisor = TeacherSupervisor::new(factory, room_code, signal_tx, transport_tx);

    supervisor.set_roster(joined.student_ids.clone()).await;
    tracing::info!(room_code = %room_code, students = joined.student_ids.len(), "Joined as teacher");
    notify(&events, ClassroomEvent::Joined(joined));

    for status in supervisor.start_streaming().await? {
        notify(&events, ClassroomEvent::Connection(status));
    }

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            Some(signal) = signal_rx.recv() => writer.send(&signal).await?,
            Some(event) = transport_rx.recv() => {
                if let Some(status) = supervisor.handle_transport_event(event).await {
                    notify(&events, ClassroomEvent::Connection(status));
                }
            }
            message = reader.recv() => {
                let message = message?.ok_or_else(server_gone)?;
                handle_teacher_message(&supervisor, &events, message).await;
            }
        }
    }

    supervisor.stop_streaming().await?;
    flush(&mut writer, &mut signal_rx).await?;
    writer.close().await
}

async fn handle_teacher_message<F: TransportFactory>(
    supervisor: &TeacherSupervisor<F>,
    events: &mpsc::UnboundedSender<ClassroomEvent>,
    message: ServerMessage,
) {
    match message {
        ServerMessage::StudentJoined { student_id, student_count } => {
            tracing::info!(student_id = %student_id, student_count, "Student joined");
            let status = supervisor.student_joined(&student_id).await;
            notify(events, ClassroomEvent::StudentJoined(student_id));
            if let Some(status) = status {
                notify(events, ClassroomEvent::Connection(status));
            }
        }
        ServerMessage::StudentLeft { student_id, student_count } => {
            tracing::info!(student_id = %student_id, student_count, "Student left");
            supervisor.student_left(&student_id).await;
            notify(events, ClassroomEvent::StudentLeft(student_id));
        }
        ServerMessage::Answer { answer, sender_id } => {
            if let Err(e) = supervisor.handle_answer(&sender_id, answer).await {
                tracing::warn!(student_id = %sender_id, error = %e, "Answer not applied");
            }
        }
        ServerMessage::IceCandidate { candidate, sender_id } => {
            match supervisor.handle_remote_candidate(&sender_id, candidate).await {
                Ok(()) => {}
                Err(SignalingError::StaleMessage(_)) => {
                    tracing::debug!(student_id = %sender_id, "Candidate for unknown session");
                }
                Err(e) => tracing::warn!(student_id = %sender_id, error = %e, "Candidate not applied"),
            }
        }
        ServerMessage::Error { message } => {
            tracing::warn!(error = %message, "Server reported an error");
            notify(events, ClassroomEvent::ServerError(message));
        }
        other => tracing::debug!(message = ?other, "Ignoring message"),
    }
}

/// Joins `room_code` as a student and watches whatever the teacher streams
/// until `shutdown` resolves.
pub async fn run_student<F, S>(
    mut client: SignalingClient,
    factory: F,
    room_code: &str,
    events: mpsc::UnboundedSender<ClassroomEvent>,
    shutdown: S,
) -> Result<()>
where
    F: TransportFactory,
    S: Future<Output = ()>,
{
    let joined = client.join(PeerRole::Student, room_code).await?;
    let (mut writer, mut reader) = client.split();

    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
    let supervisor = StudentSupervisor::new(factory, signal_tx, transport_tx);

    tracing::info!(room_code = %room_code, "Joined as student");
    notify(&events, ClassroomEvent::Joined(joined));

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,
            Some(signal) = signal_rx.recv() => writer.send(&signal).await?,
            Some(event) = transport_rx.recv() => {
                if let Some(status) = supervisor.handle_transport_event(event).await {
                    notify(&events, ClassroomEvent::Connection(status));
                }
            }
            message = reader.recv() => {
                let message = message?.ok_or_else(server_gone)?;
                handle_student_message(&supervisor, &events, message).await;
            }
        }
    }

    supervisor.close().await;
    flush(&mut writer, &mut signal_rx).await?;
    writer.close().await
}

async fn handle_student_message<F: TransportFactory>(
    supervisor: &StudentSupervisor<F>,
    events: &mpsc::UnboundedSender<ClassroomEvent>,
    message: ServerMessage,
) {
    match message {
        ServerMessage::Offer { offer, sender_id } => {
            match supervisor.handle_offer(&sender_id, offer).await {
                Ok(Some(status)) => notify(events, ClassroomEvent::Connection(status)),
                Ok(None) => {}
                Err(e) => tracing::warn!(teacher_id = %sender_id, error = %e, "Offer not applied"),
            }
        }
        ServerMessage::IceCandidate { candidate, sender_id } => {
            match supervisor.handle_remote_candidate(&sender_id, candidate).await {
                Ok(()) => {}
                Err(SignalingError::StaleMessage(_)) => {
                    tracing::debug!(teacher_id = %sender_id, "Candidate from a peer we are not negotiating with");
                }
                Err(e) => tracing::warn!(teacher_id = %sender_id, error = %e, "Candidate not applied"),
            }
        }
        ServerMessage::StreamStarted => {
            tracing::info!("Teacher started streaming");
            notify(events, ClassroomEvent::StreamStarted);
        }
        ServerMessage::StreamStopped => {
            supervisor.close().await;
            notify(events, ClassroomEvent::StreamStopped);
        }
        ServerMessage::TeacherDisconnected => {
            tracing::warn!("Teacher disconnected");
            supervisor.close().await;
            notify(events, ClassroomEvent::TeacherDisconnected);
        }
        ServerMessage::Error { message } => {
            tracing::warn!(error = %message, "Server reported an error");
            notify(events, ClassroomEvent::ServerError(message));
        }
        other => tracing::debug!(message = ?other, "Ignoring message"),
    }
}
