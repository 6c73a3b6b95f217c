//! RealtimeHub - Push Channel Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection registry
//! - Camera rooms (watchers of one camera's stream and risk events)
//! - Global broadcast (notifications, combined mean, reachability)
//! - Direct delivery to one connection (on-demand detection replies)
//!
//! Every message goes out as `{"event": <name>, "data": <payload>}`.

use crate::camera_session::SessionSnapshot;
use crate::models::{DetectedEntity, Modality, ViolatorEntity};
use crate::risk_engine::{CountData, MeanCountData, NotificationEvent, Report};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum HubMessage {
    #[serde(rename = "stream:frame")]
    StreamFrame(FrameMessage),
    /// Terminal notice for a camera's watchers
    #[serde(rename = "stream:notif")]
    StreamNotice(StreamNoticeMessage),
    #[serde(rename = "violators:sdd")]
    SddViolators(ViolatorsMessage),
    #[serde(rename = "violators:fmd")]
    FmdViolators(ViolatorsMessage),
    #[serde(rename = "data:count")]
    Count(CountData),
    #[serde(rename = "data:mean")]
    Mean(MeanCountData),
    #[serde(rename = "data:report")]
    Report(Report),
    #[serde(rename = "notif")]
    Notification(NotificationEvent),
    #[serde(rename = "camera:status")]
    CameraStatus(CameraStatusMessage),
    /// Reply to stream:connect / stream:disconnect
    #[serde(rename = "stream:session")]
    Session(SessionSnapshot),
    /// Rejected inbound command
    #[serde(rename = "error")]
    CommandError(CommandErrorMessage),
}

impl HubMessage {
    pub fn violators(modality: Modality, message: ViolatorsMessage) -> Self {
        match modality {
            Modality::SocialDistance => HubMessage::SddViolators(message),
            Modality::FaceMask => HubMessage::FmdViolators(message),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            HubMessage::StreamFrame(_) => "stream:frame",
            HubMessage::StreamNotice(_) => "stream:notif",
            HubMessage::SddViolators(_) => "violators:sdd",
            HubMessage::FmdViolators(_) => "violators:fmd",
            HubMessage::Count(_) => "data:count",
            HubMessage::Mean(_) => "data:mean",
            HubMessage::Report(_) => "data:report",
            HubMessage::Notification(_) => "notif",
            HubMessage::CameraStatus(_) => "camera:status",
            HubMessage::Session(_) => "stream:session",
            HubMessage::CommandError(_) => "error",
        }
    }
}

/// Live frame (base64 JPEG)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    pub camera_id: String,
    pub frame: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamNoticeMessage {
    pub camera_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Detection output for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolatorsMessage {
    pub camera_id: String,
    /// True when produced by an on-demand detection request
    pub request: bool,
    pub violators: BTreeMap<String, ViolatorEntity>,
    pub entities: BTreeMap<String, DetectedEntity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_distance: Option<f64>,
}

/// Camera reachability transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatusMessage {
    pub camera_id: String,
    pub online: bool,
    /// "lost" or "recovered"
    pub event: String,
    pub timestamp: String,
}

/// Inbound command that could not be served
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandErrorMessage {
    pub command: String,
    pub message: String,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    /// room -> connection ids
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
    connection_count: AtomicU64,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections
            .write()
            .await
            .insert(id, ClientConnection { id, tx });
        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");
        (id, rx)
    }

    /// Unregister a client and drop it from every room
    pub async fn unregister(&self, id: &Uuid) {
        if self.connections.write().await.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }

        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    pub async fn join(&self, room: &str, id: Uuid) {
        self.rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(id);
        tracing::debug!(room = %room, connection_id = %id, "Joined room");
    }

    pub async fn leave(&self, room: &str, id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        tracing::debug!(room = %room, connection_id = %id, "Left room");
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, |m| m.len())
    }

    /// Send message to every member of a room
    pub async fn emit_to_room(&self, room: &str, message: HubMessage) {
        let Some(json) = encode(&message) else {
            return;
        };

        let members: Vec<Uuid> = match self.rooms.read().await.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return,
        };

        let connections = self.connections.read().await;
        for id in members {
            if let Some(conn) = connections.get(&id) {
                if let Err(e) = conn.tx.send(json.clone()) {
                    tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
                }
            }
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        tracing::debug!(event = %message.event_name(), "Broadcasting message to clients");
        let Some(json) = encode(&message) else {
            return;
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Send message to one connection
    pub async fn send_to(&self, id: &Uuid, message: HubMessage) {
        let Some(json) = encode(&message) else {
            return;
        };

        if let Some(conn) = self.connections.read().await.get(id) {
            if let Err(e) = conn.tx.send(json) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(message: &HubMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(event = %message.event_name(), error = %e, "Failed to serialize message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn notice(camera_id: &str) -> HubMessage {
        HubMessage::StreamNotice(StreamNoticeMessage {
            camera_id: camera_id.to_string(),
            message: "gone".to_string(),
            kind: "error".to_string(),
        })
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(notice("c1")).unwrap();
        assert_eq!(json["event"], "stream:notif");
        assert_eq!(json["data"]["camera_id"], "c1");
        assert_eq!(json["data"]["type"], "error");

        let violators = HubMessage::violators(
            Modality::FaceMask,
            ViolatorsMessage {
                camera_id: "c1".to_string(),
                request: true,
                violators: BTreeMap::new(),
                entities: BTreeMap::new(),
                mean_distance: None,
            },
        );
        let json = serde_json::to_value(&violators).unwrap();
        assert_eq!(json["event"], "violators:fmd");
        assert!(json["data"].get("mean_distance").is_none());
    }

    #[tokio::test]
    async fn test_room_delivery() {
        let hub = RealtimeHub::new();
        let (a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        hub.join("c1", a).await;

        hub.emit_to_room("c1", notice("c1")).await;
        let received: Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        assert_eq!(received["event"], "stream:notif");
        assert!(rx_b.try_recv().is_err());

        hub.broadcast(notice("c1")).await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unregister_clears_rooms() {
        let hub = RealtimeHub::new();
        let (a, _rx) = hub.register().await;
        hub.join("c1", a).await;
        hub.join("c2", a).await;
        assert_eq!(hub.connection_count(), 1);

        hub.unregister(&a).await;
        assert_eq!(hub.room_size("c1").await, 0);
        assert_eq!(hub.room_size("c2").await, 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
