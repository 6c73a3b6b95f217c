//! CameraSessionManager - Device Handles and Live Broadcast
//!
//! ## Responsibilities
//!
//! - Discovery pass: register, connect, first frame, risk seeding
//! - Watcher sets per camera, one broadcast loop per watched camera
//! - Camera removal with watcher cascade and terminal notice
//! - Calibration / credential updates that may (re)create a device handle
//!
//! ## Invariants
//!
//! - A broadcast loop exists for a camera iff its watcher set is non-empty
//! - A watcher belongs to at most one camera
//! - A device handle exists only for a camera that connected at least once

mod types;

pub use types::*;

use crate::camera_registry::{AuthRequest, CalibrateRequest, Camera, CameraRegistry};
use crate::camera_status_tracker::CameraStatusTracker;
use crate::error::{Error, Result};
use crate::models::Calibration;
use crate::onvif::{CameraDevice, DiscoveryProtocol};
use crate::realtime_hub::{CameraStatusMessage, FrameMessage, HubMessage, RealtimeHub, StreamNoticeMessage};
use crate::risk_engine::RiskEngine;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Live device handle for one camera
struct DeviceSession {
    device: Arc<dyn CameraDevice>,
    stream_url: String,
    last_frame: Option<Vec<u8>>,
    reachable: bool,
}

/// Watchers of one camera and its broadcast loop
struct WatchEntry {
    watchers: HashSet<Uuid>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct WatchState {
    entries: HashMap<String, WatchEntry>,
    /// watcher -> camera it is attached to
    watcher_camera: HashMap<Uuid, String>,
}

/// CameraSessionManager instance
pub struct CameraSessionManager {
    registry: Arc<CameraRegistry>,
    discovery: Arc<dyn DiscoveryProtocol>,
    risk: Arc<RiskEngine>,
    hub: Arc<RealtimeHub>,
    status: Arc<CameraStatusTracker>,
    devices: RwLock<HashMap<String, DeviceSession>>,
    watch: Mutex<WatchState>,
    config: SessionConfig,
}

impl CameraSessionManager {
    pub fn new(
        registry: Arc<CameraRegistry>,
        discovery: Arc<dyn DiscoveryProtocol>,
        risk: Arc<RiskEngine>,
        hub: Arc<RealtimeHub>,
        status: Arc<CameraStatusTracker>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            discovery,
            risk,
            hub,
            status,
            devices: RwLock::new(HashMap::new()),
            watch: Mutex::new(WatchState::default()),
            config,
        }
    }

    /// Probe the network and bring up every camera not yet tracked
    pub async fn discover(&self) -> Vec<SessionSnapshot> {
        let matches = match self.discovery.probe().await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(error = %e, "Camera discovery probe failed");
                Vec::new()
            }
        };

        for found in matches {
            let camera = match self
                .registry
                .register_discovered(&found.urn, &found.name, &found.address)
                .await
            {
                Ok(camera) => camera,
                Err(e) => {
                    tracing::error!(urn = %found.urn, error = %e, "Failed to register camera");
                    continue;
                }
            };

            if self.has_session(&camera.camera_id).await {
                continue;
            }
            if let Err(e) = self.initialize(&camera).await {
                tracing::warn!(camera_id = %camera.camera_id, error = %e, "Camera initialization failed");
            }
        }

        self.snapshots().await
    }

    /// Connect a device handle, take a first frame and seed risk state
    async fn initialize(&self, camera: &Camera) -> Result<()> {
        let address = camera.address.clone().ok_or_else(|| {
            Error::Validation(format!("camera {} has no device address", camera.camera_id))
        })?;

        let device = match self.discovery.connect(&address, camera.credentials()).await {
            Ok(device) => device,
            Err(Error::Unauthorized(msg)) => {
                self.registry.mark_needs_auth(&camera.camera_id).await?;
                return Err(Error::Unauthorized(msg));
            }
            Err(e) => return Err(e),
        };

        let first = tokio::time::timeout(self.config.snapshot_timeout, device.fetch_frame()).await;
        let last_frame = match first {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(e)) => {
                tracing::warn!(camera_id = %camera.camera_id, error = %e, "Initial frame failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %camera.camera_id,
                    timeout_ms = self.config.snapshot_timeout.as_millis() as u64,
                    "Initial frame timed out"
                );
                None
            }
        };
        let reachable = last_frame.is_some();

        {
            let mut devices = self.devices.write().await;
            if devices.contains_key(&camera.camera_id) {
                return Ok(());
            }
            devices.insert(
                camera.camera_id.clone(),
                DeviceSession {
                    stream_url: device.stream_url(),
                    device,
                    last_frame,
                    reachable,
                },
            );
        }

        self.report_reachability(&camera.camera_id, reachable).await;
        self.risk
            .init_camera(&camera.camera_id, &camera.name, camera.threshold_or_default())
            .await;

        tracing::info!(
            camera_id = %camera.camera_id,
            name = %camera.name,
            reachable = reachable,
            "Camera session established"
        );
        Ok(())
    }

    /// Attach a watcher; the first watcher starts the broadcast loop
    pub async fn connect(self: &Arc<Self>, camera_id: &str, watcher: Uuid) -> Result<SessionSnapshot> {
        let mut stopped = None;
        let previous;
        {
            let mut watch = self.watch.lock().await;
            // `remove` drops the device before it takes this lock, so a device seen
            // here is either still live or its entry will be torn down after us
            if !self.has_session(camera_id).await {
                return Err(Error::NotFound(format!("camera {}", camera_id)));
            }

            previous = watch
                .watcher_camera
                .get(&watcher)
                .filter(|prev| prev.as_str() != camera_id)
                .cloned();
            if let Some(prev) = &previous {
                stopped = detach(&mut watch, prev, &watcher);
            }

            match watch.entries.get_mut(camera_id) {
                Some(entry) => {
                    entry.watchers.insert(watcher);
                }
                None => {
                    let handle = tokio::spawn(self.clone().broadcast_loop(camera_id.to_string()));
                    watch.entries.insert(
                        camera_id.to_string(),
                        WatchEntry {
                            watchers: HashSet::from([watcher]),
                            handle,
                        },
                    );
                    tracing::info!(camera_id = %camera_id, "Broadcast started");
                }
            }
            watch.watcher_camera.insert(watcher, camera_id.to_string());
            // Joined under the lock so a concurrent `remove` leaves the room after us
            self.hub.join(camera_id, watcher).await;
        }

        if let Some(prev) = &previous {
            self.hub.leave(prev, &watcher).await;
            tracing::info!(watcher = %watcher, from = %prev, to = %camera_id, "Watcher moved");
        }
        if let Some(handle) = stopped {
            handle.abort();
            tracing::info!(camera_id = ?previous, "Broadcast stopped");
        }
        tracing::info!(camera_id = %camera_id, watcher = %watcher, "Watcher connected");

        self.snapshot(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    /// Detach a watcher; the last watcher stops the broadcast loop
    pub async fn disconnect(&self, camera_id: &str, watcher: Uuid) -> Result<Option<SessionSnapshot>> {
        let stopped = {
            let mut watch = self.watch.lock().await;
            let attached = watch
                .entries
                .get(camera_id)
                .map_or(false, |entry| entry.watchers.contains(&watcher));
            if !attached {
                return Err(Error::NotFound(format!(
                    "watcher {} on camera {}",
                    watcher, camera_id
                )));
            }
            detach(&mut watch, camera_id, &watcher)
        };

        self.hub.leave(camera_id, &watcher).await;
        if let Some(handle) = stopped {
            handle.abort();
            tracing::info!(camera_id = %camera_id, "Broadcast stopped");
        }
        tracing::info!(camera_id = %camera_id, watcher = %watcher, "Watcher disconnected");

        Ok(self.snapshot(camera_id).await)
    }

    /// Detach a watcher from whatever camera it watches (channel closed)
    pub async fn disconnect_watcher(&self, watcher: Uuid) {
        let camera = self.watch.lock().await.watcher_camera.get(&watcher).cloned();
        if let Some(camera_id) = camera {
            if let Err(e) = self.disconnect(&camera_id, watcher).await {
                tracing::debug!(watcher = %watcher, error = %e, "Watcher already detached");
            }
        }
    }

    /// Tear down a camera's device handle, watchers and broadcast loop
    pub async fn remove(&self, camera_id: &str) {
        let had_device = self.devices.write().await.remove(camera_id).is_some();

        let entry = {
            let mut watch = self.watch.lock().await;
            let entry = watch.entries.remove(camera_id);
            if let Some(entry) = &entry {
                for watcher in &entry.watchers {
                    watch.watcher_camera.remove(watcher);
                }
            }
            entry
        };

        if let Some(entry) = &entry {
            self.hub
                .emit_to_room(
                    camera_id,
                    HubMessage::StreamNotice(StreamNoticeMessage {
                        camera_id: camera_id.to_string(),
                        message: DISCONNECT_NOTICE.to_string(),
                        kind: "error".to_string(),
                    }),
                )
                .await;
            for watcher in &entry.watchers {
                self.hub.leave(camera_id, watcher).await;
            }
        }

        if had_device {
            self.report_reachability(camera_id, false).await;
            tracing::warn!(
                camera_id = %camera_id,
                watchers = entry.as_ref().map_or(0, |e| e.watchers.len()),
                "Camera removed"
            );
        }

        // May be the calling loop itself; nothing runs after this
        if let Some(entry) = entry {
            entry.handle.abort();
        }
    }

    /// Probe every live device, drop the dead ones, then rediscover
    pub async fn refresh(&self) -> Vec<SessionSnapshot> {
        let live: Vec<(String, Arc<dyn CameraDevice>)> = self
            .devices
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.device.clone()))
            .collect();

        let probes = live.into_iter().map(|(camera_id, device)| async move {
            let result =
                tokio::time::timeout(self.config.snapshot_timeout, device.fetch_frame()).await;
            (camera_id, device, result)
        });

        for (camera_id, device, result) in futures::future::join_all(probes).await {
            match result {
                Ok(Ok(frame)) => {
                    self.store_frame(&camera_id, &device, frame).await;
                }
                _ => {
                    if self.is_current(&camera_id, &device).await {
                        tracing::warn!(camera_id = %camera_id, "Camera failed refresh probe");
                        self.remove(&camera_id).await;
                    }
                }
            }
        }

        self.discover().await
    }

    /// Fresh frame from the device; the camera is removed when the fetch fails
    pub async fn fetch(&self, camera_id: &str) -> Result<Vec<u8>> {
        let device = self
            .device(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))?;

        match tokio::time::timeout(self.config.snapshot_timeout, device.fetch_frame()).await {
            Ok(Ok(frame)) => {
                self.store_frame(camera_id, &device, frame.clone()).await;
                Ok(frame)
            }
            Ok(Err(e)) => {
                if self.is_current(camera_id, &device).await {
                    self.remove(camera_id).await;
                }
                Err(e)
            }
            Err(_) => {
                if self.is_current(camera_id, &device).await {
                    self.remove(camera_id).await;
                }
                Err(Error::Timeout(format!("snapshot from camera {}", camera_id)))
            }
        }
    }

    pub async fn stream_url(&self, camera_id: &str) -> Result<String> {
        self.devices
            .read()
            .await
            .get(camera_id)
            .map(|s| s.stream_url.clone())
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    /// Last successfully fetched frame
    pub async fn last_frame(&self, camera_id: &str) -> Result<Option<Vec<u8>>> {
        self.devices
            .read()
            .await
            .get(camera_id)
            .map(|s| s.last_frame.clone())
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    pub async fn calibrate(&self, camera_id: &str, request: CalibrateRequest) -> Result<SessionSnapshot> {
        let camera = self.registry.update_calibration(camera_id, request).await?;
        self.ensure_device(&camera).await;
        self.snapshot(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    pub async fn auth(&self, camera_id: &str, request: AuthRequest) -> Result<SessionSnapshot> {
        let camera = self.registry.update_credentials(camera_id, request).await?;
        self.ensure_device(&camera).await;
        self.snapshot(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))
    }

    async fn ensure_device(&self, camera: &Camera) {
        if self.has_session(&camera.camera_id).await {
            return;
        }
        if let Err(e) = self.initialize(camera).await {
            tracing::warn!(camera_id = %camera.camera_id, error = %e, "Camera initialization failed");
        }
    }

    pub async fn has_session(&self, camera_id: &str) -> bool {
        self.devices.read().await.contains_key(camera_id)
    }

    /// Cameras with a device handle whose last probe succeeded
    pub async fn reachable_cameras(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .devices
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.reachable)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn calibration(&self, camera_id: &str) -> Option<Calibration> {
        self.registry.get(camera_id).await?.calibration()
    }

    pub async fn watchers(&self, camera_id: &str) -> Vec<Uuid> {
        self.watch
            .lock()
            .await
            .entries
            .get(camera_id)
            .map(|entry| entry.watchers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn watcher_count(&self, camera_id: &str) -> usize {
        self.watch
            .lock()
            .await
            .entries
            .get(camera_id)
            .map_or(0, |entry| entry.watchers.len())
    }

    /// Camera a watcher is attached to
    pub async fn watching(&self, watcher: &Uuid) -> Option<String> {
        self.watch.lock().await.watcher_camera.get(watcher).cloned()
    }

    /// Broadcast loop is registered and still running
    pub async fn is_broadcasting(&self, camera_id: &str) -> bool {
        self.watch
            .lock()
            .await
            .entries
            .get(camera_id)
            .map_or(false, |entry| !entry.handle.is_finished())
    }

    pub async fn snapshot(&self, camera_id: &str) -> Option<SessionSnapshot> {
        let camera = self.registry.get(camera_id).await?;
        let watchers = self.watcher_count(camera_id).await;
        let devices = self.devices.read().await;
        let session = devices.get(camera_id);
        Some(SessionSnapshot {
            camera_id: camera.camera_id.clone(),
            name: camera.name.clone(),
            connected: session.is_some(),
            reachable: session.map_or(false, |s| s.reachable),
            need_auth: camera.need_auth,
            stream_url: session.map(|s| s.stream_url.clone()),
            watchers,
            calibration: camera.calibration(),
        })
    }

    /// Every registered camera
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for camera in self.registry.list().await {
            if let Some(snapshot) = self.snapshot(&camera.camera_id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Abort every broadcast loop
    pub async fn stop(&self) {
        let mut watch = self.watch.lock().await;
        for (camera_id, entry) in watch.entries.drain() {
            entry.handle.abort();
            for watcher in &entry.watchers {
                self.hub.leave(&camera_id, watcher).await;
            }
        }
        watch.watcher_camera.clear();
        tracing::info!("Camera broadcasts stopped");
    }

    async fn broadcast_loop(self: Arc<Self>, camera_id: String) {
        let mut interval = tokio::time::interval(self.config.broadcast_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let Some(device) = self.device(&camera_id).await else {
                break;
            };

            match tokio::time::timeout(self.config.snapshot_timeout, device.fetch_frame()).await {
                Ok(Ok(frame)) => {
                    let encoded = STANDARD.encode(&frame);
                    if !self.store_frame(&camera_id, &device, frame).await {
                        // Device replaced or removed mid-call
                        continue;
                    }
                    self.hub
                        .emit_to_room(
                            &camera_id,
                            HubMessage::StreamFrame(FrameMessage {
                                camera_id: camera_id.clone(),
                                frame: encoded,
                            }),
                        )
                        .await;
                }
                Ok(Err(e)) => {
                    if !self.is_current(&camera_id, &device).await {
                        continue;
                    }
                    tracing::warn!(camera_id = %camera_id, error = %e, "Broadcast fetch failed");
                    self.remove(&camera_id).await;
                    break;
                }
                Err(_) => {
                    if !self.is_current(&camera_id, &device).await {
                        continue;
                    }
                    tracing::warn!(camera_id = %camera_id, "Broadcast fetch timed out");
                    self.remove(&camera_id).await;
                    break;
                }
            }
        }
    }

    async fn device(&self, camera_id: &str) -> Option<Arc<dyn CameraDevice>> {
        self.devices
            .read()
            .await
            .get(camera_id)
            .map(|s| s.device.clone())
    }

    async fn is_current(&self, camera_id: &str, device: &Arc<dyn CameraDevice>) -> bool {
        self.devices
            .read()
            .await
            .get(camera_id)
            .map_or(false, |s| Arc::ptr_eq(&s.device, device))
    }

    /// Keep a frame from `device`; false when that device is no longer current
    async fn store_frame(&self, camera_id: &str, device: &Arc<dyn CameraDevice>, frame: Vec<u8>) -> bool {
        let became_reachable = {
            let mut devices = self.devices.write().await;
            let Some(session) = devices.get_mut(camera_id) else {
                return false;
            };
            if !Arc::ptr_eq(&session.device, device) {
                return false;
            }
            session.last_frame = Some(frame);
            let changed = !session.reachable;
            session.reachable = true;
            changed
        };
        if became_reachable {
            self.report_reachability(camera_id, true).await;
        }
        true
    }

    async fn report_reachability(&self, camera_id: &str, online: bool) {
        if let Some(event) = self.status.update_status(camera_id, online).await {
            self.hub
                .broadcast(HubMessage::CameraStatus(CameraStatusMessage {
                    camera_id: camera_id.to_string(),
                    online,
                    event: event.as_str().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                }))
                .await;
        }
    }
}

/// Remove `watcher` from `camera_id`; returns the loop handle when the set emptied
fn detach(watch: &mut WatchState, camera_id: &str, watcher: &Uuid) -> Option<JoinHandle<()>> {
    watch.watcher_camera.remove(watcher);
    let emptied = match watch.entries.get_mut(camera_id) {
        Some(entry) => {
            entry.watchers.remove(watcher);
            entry.watchers.is_empty()
        }
        None => false,
    };
    if emptied {
        watch.entries.remove(camera_id).map(|entry| entry.handle)
    } else {
        None
    }
}
