use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::peer::PeerRole;
use crate::error::{Result, SignalingError};

const MAX_CODE_ATTEMPTS: usize = 64;

#[derive(Debug)]
struct Room {
    id: String,
    code: String,
    teacher: Option<String>,
    students: BTreeSet<String>,
    is_active: bool,
    created_at: SystemTime,
    last_activity: Instant,
    /// Set once the room has been taken out of the table; late holders of
    /// the record must treat it as gone.
    closed: bool,
}

impl Room {
    fn new(code: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code,
            teacher: None,
            students: BTreeSet::new(),
            is_active: false,
            created_at: SystemTime::now(),
            last_activity: Instant::now(),
            closed: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.teacher.is_none() && self.students.is_empty()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRoom {
    pub room_code: String,
    pub room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub exists: bool,
    pub is_active: bool,
    pub student_count: usize,
}

impl RoomStatus {
    fn missing() -> Self {
        Self {
            exists: false,
            is_active: false,
            student_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub code: String,
    pub is_active: bool,
    pub student_count: usize,
    /// Unix seconds
    pub created_at: u64,
}

/// Result of a student joining: who to notify and the new head count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentJoin {
    pub teacher: Option<String>,
    pub student_count: usize,
    /// `false` when the student was already in the room
    pub added: bool,
}

/// What changed when a peer left its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub role: PeerRole,
    pub teacher: Option<String>,
    pub student_count: usize,
    pub teacher_cleared: bool,
    pub room_removed: bool,
}

/// Process-wide table of rooms keyed by their 6-digit code.
///
/// Each room sits behind its own lock so unrelated rooms never contend; the
/// table lock is only held long enough to look up, insert or remove a record.
/// Lock order is always room record first, then table, never the reverse.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
        })
    }

    fn generate_room_code() -> String {
        let mut rng = rand::thread_rng();
        format!("{:06}", rng.gen_range(100000..=999999))
    }

    async fn entry(&self, code: &str) -> Option<Arc<Mutex<Room>>> {
        let rooms = self.rooms.read().await;
        rooms.get(code).cloned()
    }

    pub async fn create_room(&self) -> Result<CreatedRoom> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = Self::generate_room_code();
            let mut rooms = self.rooms.write().await;

            if rooms.contains_key(&code) {
                tracing::debug!(room_code = %code, "Room code collision, retrying");
                continue;
            }

            let room = Room::new(code.clone());
            let created = CreatedRoom {
                room_code: code.clone(),
                room_id: room.id.clone(),
            };
            rooms.insert(code.clone(), Arc::new(Mutex::new(room)));

            tracing::info!(room_code = %code, room_id = %created.room_id, "Room created");
            return Ok(created);
        }

        Err(SignalingError::RoomCodesExhausted(MAX_CODE_ATTEMPTS))
    }

    pub async fn exists(&self, code: &str) -> RoomStatus {
        let Some(entry) = self.entry(code).await else {
            return RoomStatus::missing();
        };

        let room = entry.lock().await;
        if room.closed {
            return RoomStatus::missing();
        }

        RoomStatus {
            exists: true,
            is_active: room.is_active,
            student_count: room.students.len(),
        }
    }

    /// Claims the teacher slot. A later claim overwrites an earlier one.
    /// Returns the students already in the room.
    pub async fn join_as_teacher(&self, code: &str, peer_id: &str) -> Result<Vec<String>> {
        let entry = self
            .entry(code)
            .await
            .ok_or_else(|| SignalingError::RoomNotFound(code.to_string()))?;

        let mut room = entry.lock().await;
        if room.closed {
            return Err(SignalingError::RoomNotFound(code.to_string()));
        }

        if let Some(previous) = room.teacher.as_deref() {
            if previous != peer_id {
                tracing::warn!(
                    room_code = %code,
                    previous_teacher = %previous,
                    teacher_id = %peer_id,
                    "Teacher slot overwritten by a new teacher"
                );
            }
        }

        room.teacher = Some(peer_id.to_string());
        room.touch();

        tracing::info!(room_code = %code, teacher_id = %peer_id, "Teacher joined room");
        Ok(room.students.iter().cloned().collect())
    }

    pub async fn join_as_student(&self, code: &str, peer_id: &str) -> Result<StudentJoin> {
        let entry = self
            .entry(code)
            .await
            .ok_or_else(|| SignalingError::RoomNotFound(code.to_string()))?;

        let mut room = entry.lock().await;
        if room.closed {
            return Err(SignalingError::RoomNotFound(code.to_string()));
        }

        let added = room.students.insert(peer_id.to_string());
        if added {
            tracing::info!(room_code = %code, student_id = %peer_id, "Student joined room");
        }
        room.touch();

        Ok(StudentJoin {
            teacher: room.teacher.clone(),
            student_count: room.students.len(),
            added,
        })
    }

    /// Removes a peer from its slot and deletes the room once nobody is left.
    /// Returns `None` when the room no longer exists.
    pub async fn leave(&self, peer_id: &str, role: PeerRole, code: &str) -> Option<Departure> {
        let entry = self.entry(code).await?;
        let mut room = entry.lock().await;
        if room.closed {
            return None;
        }

        let mut teacher_cleared = false;
        match role {
            PeerRole::Teacher => {
                if room.teacher.as_deref() == Some(peer_id) {
                    room.teacher = None;
                    room.is_active = false;
                    teacher_cleared = true;
                    tracing::info!(room_code = %code, teacher_id = %peer_id, "Teacher left room");
                } else {
                    tracing::debug!(
                        room_code = %code,
                        peer_id = %peer_id,
                        "Departing teacher no longer holds the teacher slot"
                    );
                }
            }
            PeerRole::Student => {
                if room.students.remove(peer_id) {
                    tracing::info!(room_code = %code, student_id = %peer_id, "Student left room");
                }
            }
            PeerRole::Unassigned => {}
        }
        room.touch();

        let room_removed = room.is_empty();
        if room_removed {
            room.closed = true;
            self.remove_entry(code, &entry).await;
            tracing::info!(room_code = %code, "Room removed (empty)");
        }

        Some(Departure {
            role,
            teacher: room.teacher.clone(),
            student_count: room.students.len(),
            teacher_cleared,
            room_removed,
        })
    }

    /// Toggles streaming. Only the room's current teacher may do this.
    pub async fn set_active(&self, code: &str, active: bool, requestor_id: &str) -> Result<()> {
        let entry = self
            .entry(code)
            .await
            .ok_or_else(|| SignalingError::RoomNotFound(code.to_string()))?;

        let mut room = entry.lock().await;
        if room.closed {
            return Err(SignalingError::RoomNotFound(code.to_string()));
        }

        if room.teacher.as_deref() != Some(requestor_id) {
            return Err(SignalingError::UnauthorizedActivation {
                peer_id: requestor_id.to_string(),
                room_code: code.to_string(),
            });
        }

        room.is_active = active;
        room.touch();

        tracing::info!(room_code = %code, active = active, "Room streaming state changed");
        Ok(())
    }

    /// Removes rooms that are empty, inactive and untouched for `max_idle`.
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let candidates: Vec<Arc<Mutex<Room>>> = {
            let rooms = self.rooms.read().await;
            rooms.values().cloned().collect()
        };

        let mut removed = Vec::new();
        for entry in candidates {
            let mut room = entry.lock().await;
            if room.closed || !room.is_empty() || room.is_active {
                continue;
            }
            if room.last_activity.elapsed() < max_idle {
                continue;
            }

            room.closed = true;
            let code = room.code.clone();
            self.remove_entry(&code, &entry).await;
            tracing::info!(room_code = %code, "Room removed (idle)");
            removed.push(code);
        }

        removed
    }

    async fn remove_entry(&self, code: &str, entry: &Arc<Mutex<Room>>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(code).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            rooms.remove(code);
        }
    }

    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let entries: Vec<Arc<Mutex<Room>>> = {
            let rooms = self.rooms.read().await;
            rooms.values().cloned().collect()
        };

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let room = entry.lock().await;
            if room.closed {
                continue;
            }
            summaries.push(RoomSummary {
                code: room.code.clone(),
                is_active: room.is_active,
                student_count: room.students.len(),
                created_at: room
                    .created_at
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            });
        }

        summaries.sort_by(|a, b| a.code.cmp(&b.code));
        summaries
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn teacher_of(&self, code: &str) -> Option<String> {
        let entry = self.entry(code).await?;
        let room = entry.lock().await;
        if room.closed {
            return None;
        }
        room.teacher.clone()
    }
}
