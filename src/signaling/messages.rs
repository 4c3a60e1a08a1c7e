use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::peer::PeerRole;
use crate::error::{Result, SignalingError};

/// Messages a client sends to the relay.
///
/// Negotiation payloads (`offer`, `answer`, `candidate`) are kept as raw JSON:
/// the relay forwards them without looking inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    TeacherJoin { room_code: String },

    #[serde(rename_all = "camelCase")]
    StudentJoin { room_code: String },

    #[serde(rename_all = "camelCase")]
    StartStream { room_code: String },

    #[serde(rename_all = "camelCase")]
    StopStream { room_code: String },

    #[serde(rename_all = "camelCase")]
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_code: Option<String>,
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Answer { answer: Value, target_id: String },

    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::TeacherJoin { .. } => "teacher-join",
            ClientMessage::StudentJoin { .. } => "student-join",
            ClientMessage::StartStream { .. } => "start-stream",
            ClientMessage::StopStream { .. } => "stop-stream",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SignalingError::MalformedMessage(e.to_string()))
    }
}

/// Messages the relay delivers to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    JoinedRoom {
        room_code: String,
        user_type: PeerRole,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        student_ids: Vec<String>,
    },

    Error { message: String },

    StreamStarted,

    StreamStopped,

    #[serde(rename_all = "camelCase")]
    Offer { offer: Value, sender_id: String },

    #[serde(rename_all = "camelCase")]
    Answer { answer: Value, sender_id: String },

    #[serde(rename_all = "camelCase")]
    IceCandidate { candidate: Value, sender_id: String },

    #[serde(rename_all = "camelCase")]
    StudentJoined {
        student_id: String,
        student_count: usize,
    },

    #[serde(rename_all = "camelCase")]
    StudentLeft {
        student_id: String,
        student_count: usize,
    },

    TeacherDisconnected,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// `{ "sdp": ..., "type": "offer" | "answer" }` as browsers produce it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// `{ "candidate", "sdpMid", "sdpMLineIndex" }` as browsers produce it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Reads a typed negotiation payload out of a relayed blob.
pub fn decode_payload<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SignalingError::MalformedMessage(e.to_string()))
}

pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Value> {
    Ok(serde_json::to_value(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let msg = ClientMessage::parse(r#"{"type":"student-join","roomCode":"482913"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::StudentJoin {
                room_code: "482913".to_string()
            }
        );
        assert_eq!(msg.kind(), "student-join");
    }

    #[test]
    fn test_parse_offer_with_and_without_target() {
        let targeted = ClientMessage::parse(
            r#"{"type":"offer","roomCode":"482913","offer":{"sdp":"v=0","type":"offer"},"targetId":"s1"}"#,
        )
        .unwrap();
        match targeted {
            ClientMessage::Offer { target_id, offer, .. } => {
                assert_eq!(target_id.as_deref(), Some("s1"));
                assert_eq!(offer["sdp"], "v=0");
            }
            other => panic!("unexpected message {:?}", other),
        }

        let broadcast =
            ClientMessage::parse(r#"{"type":"offer","offer":{"sdp":"v=0","type":"offer"}}"#).unwrap();
        assert!(matches!(broadcast, ClientMessage::Offer { target_id: None, room_code: None, .. }));
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        for text in [
            "not json",
            r#"{"type":"teacher-join"}"#,
            r#"{"type":"answer","answer":{"sdp":"v=0","type":"answer"}}"#,
            r#"{"type":"ice-candidate"}"#,
            r#"{"type":"unknown-kind"}"#,
        ] {
            let result = ClientMessage::parse(text);
            assert!(
                matches!(result, Err(SignalingError::MalformedMessage(_))),
                "{} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_server_message_shapes() {
        let joined = ServerMessage::JoinedRoom {
            room_code: "482913".to_string(),
            user_type: PeerRole::Student,
            student_ids: vec![],
        };
        assert_eq!(
            serde_json::to_value(&joined).unwrap(),
            json!({"type": "joined-room", "roomCode": "482913", "userType": "student"})
        );

        let joined_students = serde_json::to_value(&ServerMessage::StudentJoined {
            student_id: "s1".to_string(),
            student_count: 2,
        })
        .unwrap();
        assert_eq!(
            joined_students,
            json!({"type": "student-joined", "studentId": "s1", "studentCount": 2})
        );

        assert_eq!(
            ServerMessage::TeacherDisconnected.to_json().unwrap(),
            r#"{"type":"teacher-disconnected"}"#
        );
        assert_eq!(
            ServerMessage::StreamStarted.to_json().unwrap(),
            r#"{"type":"stream-started"}"#
        );
    }

    #[test]
    fn test_typed_payloads() {
        let desc: SessionDescription =
            decode_payload(json!({"sdp": "v=0\r\n", "type": "answer"})).unwrap();
        assert_eq!(desc, SessionDescription::answer("v=0\r\n"));

        let candidate: IceCandidate = decode_payload(json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));

        let encoded = encode_payload(&candidate).unwrap();
        assert_eq!(encoded["sdpMLineIndex"], 0);

        let bad = decode_payload::<SessionDescription>(json!({"sdp": "v=0"}));
        assert!(matches!(bad, Err(SignalingError::MalformedMessage(_))));
    }
}
