use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignalingError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Unassigned,
    Teacher,
    Student,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerRole::Unassigned => "unassigned",
            PeerRole::Teacher => "teacher",
            PeerRole::Student => "student",
        };
        f.write_str(name)
    }
}

/// Relay-side bookkeeping for one live signaling connection.
///
/// The connection id is the address other peers use in `targetId`. Role and
/// room are fixed by the first successful join.
#[derive(Debug, Clone)]
pub struct PeerSession {
    id: String,
    role: PeerRole,
    room_code: Option<String>,
}

impl PeerSession {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: PeerRole::Unassigned,
            room_code: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn room_code(&self) -> Option<&str> {
        self.room_code.as_deref()
    }

    pub fn is_joined(&self) -> bool {
        self.room_code.is_some()
    }

    /// Whether joining `room_code` as `role` is allowed. Repeating the same
    /// join is allowed; switching role or room is not.
    pub fn check_join(&self, role: PeerRole, room_code: &str) -> Result<()> {
        match self.room_code.as_deref() {
            None => Ok(()),
            Some(current) if current == room_code && self.role == role => Ok(()),
            Some(current) => Err(SignalingError::AlreadyJoined {
                peer_id: self.id.clone(),
                room_code: current.to_string(),
                role: self.role.to_string(),
            }),
        }
    }

    /// Records a successful join. Returns `true` the first time.
    pub fn assign(&mut self, role: PeerRole, room_code: &str) -> Result<bool> {
        self.check_join(role, room_code)?;
        if self.room_code.is_some() {
            return Ok(false);
        }

        self.role = role;
        self.room_code = Some(room_code.to_string());
        Ok(true)
    }
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}
