mod classroom;

pub use classroom::{run_student, run_teacher, ClassroomEvent};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, SignalingError};
use crate::signaling::{ClientMessage, PeerRole, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub room_code: String,
    pub role: PeerRole,
    pub student_ids: Vec<String>,
}

/// Outgoing half of a signaling connection
pub struct SignalingWriter {
    sink: SplitSink<WsStream, Message>,
}

impl SignalingWriter {
    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        tracing::debug!(kind = message.kind(), "Sending signaling message");
        self.sink.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.sink.send(Message::Close(None)).await?;
        Ok(())
    }
}

/// Incoming half of a signaling connection
pub struct SignalingReader {
    stream: SplitStream<WsStream>,
}

impl SignalingReader {
    /// Next server message, or `None` once the server hangs up. Frames that
    /// do not parse are logged and skipped.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(frame) = self.stream.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };

            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    tracing::warn!(error = %e, raw_message = %text, "Skipping unreadable server message");
                }
            }
        }
        Ok(None)
    }
}

/// WebSocket client for the relay's `/signaling` endpoint.
pub struct SignalingClient {
    writer: SignalingWriter,
    reader: SignalingReader,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await?;
        tracing::info!(url = %url, "Connected to signaling server");

        let (sink, stream) = socket.split();
        Ok(Self {
            writer: SignalingWriter { sink },
            reader: SignalingReader { stream },
        })
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.writer.send(message).await
    }

    pub async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        self.reader.recv().await
    }

    /// Joins a room and waits for the server's verdict.
    pub async fn join(&mut self, role: PeerRole, room_code: &str) -> Result<Joined> {
        let room_code = room_code.to_string();
        let request = match role {
            PeerRole::Teacher => ClientMessage::TeacherJoin { room_code },
            PeerRole::Student => ClientMessage::StudentJoin { room_code },
            PeerRole::Unassigned => {
                return Err(SignalingError::internal("cannot join without a role"));
            }
        };
        self.send(&request).await?;

        loop {
            match self.recv().await? {
                Some(ServerMessage::JoinedRoom {
                    room_code,
                    user_type,
                    student_ids,
                }) => {
                    return Ok(Joined {
                        room_code,
                        role: user_type,
                        student_ids,
                    });
                }
                Some(ServerMessage::Error { message }) => {
                    return Err(SignalingError::Connection(format!("join rejected: {}", message)));
                }
                Some(other) => {
                    tracing::debug!(message = ?other, "Ignoring message received before join");
                }
                None => {
                    return Err(SignalingError::Connection("server closed the connection".to_string()));
                }
            }
        }
    }

    pub fn split(self) -> (SignalingWriter, SignalingReader) {
        (self.writer, self.reader)
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await
    }
}
