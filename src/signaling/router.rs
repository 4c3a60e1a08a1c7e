use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use super::messages::ServerMessage;

pub type PeerSender = mpsc::UnboundedSender<Message>;

/// Delivers relay messages to live connections.
///
/// Keeps the outbound channel of every connection plus one broadcast group
/// per room. Delivery is best effort: a message for a connection that is gone
/// is dropped.
pub struct SignalingRouter {
    connections: RwLock<HashMap<String, PeerSender>>,
    groups: RwLock<HashMap<String, HashSet<String>>>,
}

impl SignalingRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register(&self, peer_id: &str, sender: PeerSender) {
        let mut connections = self.connections.write().await;
        connections.insert(peer_id.to_string(), sender);
        tracing::debug!(peer_id = %peer_id, "Connection registered with router");
    }

    /// Forgets the connection. Group membership is dropped separately with
    /// `leave_group`, by whoever knows the room.
    pub async fn unregister(&self, peer_id: &str) {
        self.connections.write().await.remove(peer_id);
        tracing::debug!(peer_id = %peer_id, "Connection unregistered from router");
    }

    pub async fn join_group(&self, room_code: &str, peer_id: &str) {
        let mut groups = self.groups.write().await;
        groups
            .entry(room_code.to_string())
            .or_default()
            .insert(peer_id.to_string());
    }

    pub async fn leave_group(&self, room_code: &str, peer_id: &str) {
        let mut groups = self.groups.write().await;
        if let Some(members) = groups.get_mut(room_code) {
            members.remove(peer_id);
            if members.is_empty() {
                groups.remove(room_code);
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn group_size(&self, room_code: &str) -> usize {
        let groups = self.groups.read().await;
        groups.get(room_code).map(|members| members.len()).unwrap_or(0)
    }

    /// Sends to exactly one connection. Returns whether it was handed over.
    pub async fn send_to(&self, peer_id: &str, message: &ServerMessage) -> bool {
        let Some(text) = encode(message) else {
            return false;
        };

        let sender = {
            let connections = self.connections.read().await;
            connections.get(peer_id).cloned()
        };

        match sender {
            Some(sender) => deliver(peer_id, &sender, text),
            None => {
                tracing::debug!(peer_id = %peer_id, "Target connection gone, dropping message");
                false
            }
        }
    }

    /// Sends to every member of the room's group except `except`.
    /// Returns how many connections the message was handed to.
    pub async fn broadcast(&self, room_code: &str, except: Option<&str>, message: &ServerMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };

        let members: Vec<String> = {
            let groups = self.groups.read().await;
            match groups.get(room_code) {
                Some(members) => members
                    .iter()
                    .filter(|id| Some(id.as_str()) != except)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let recipients: Vec<(String, PeerSender)> = {
            let connections = self.connections.read().await;
            members
                .into_iter()
                .filter_map(|id| connections.get(&id).cloned().map(|sender| (id, sender)))
                .collect()
        };

        recipients
            .iter()
            .filter(|(id, sender)| deliver(id, sender, text.clone()))
            .count()
    }

    /// Explicit target wins; without one the message goes to the rest of the
    /// sender's room.
    pub async fn relay(
        &self,
        sender_id: &str,
        room_code: Option<&str>,
        target_id: Option<&str>,
        message: &ServerMessage,
    ) -> usize {
        match (target_id, room_code) {
            (Some(target), _) => usize::from(self.send_to(target, message).await),
            (None, Some(room)) => self.broadcast(room, Some(sender_id), message).await,
            (None, None) => {
                tracing::debug!(peer_id = %sender_id, "No target and no room, dropping message");
                0
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match message.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode relay message");
            None
        }
    }
}

fn deliver(peer_id: &str, sender: &PeerSender, text: String) -> bool {
    match sender.send(Message::text(text)) {
        Ok(()) => true,
        Err(_) => {
            tracing::debug!(peer_id = %peer_id, "Connection closed before delivery");
            false
        }
    }
}
