//! Discovery -> tick -> reconcile -> risk update -> push events, with
//! in-process cameras and detection workers.

use async_trait::async_trait;
use safewatch::camera_registry::{CameraRegistry, Credentials};
use safewatch::camera_session::{CameraSessionManager, SessionConfig};
use safewatch::camera_status_tracker::CameraStatusTracker;
use safewatch::detection_orchestrator::{DetectionOrchestrator, DetectionState, OrchestratorConfig};
use safewatch::detection_worker::DetectionWorker;
use safewatch::error::{Error, Result};
use safewatch::models::{
    Calibration, DetectedEntity, DetectionResult, Modality, ViolationType, ViolatorEntity,
};
use safewatch::onvif::{CameraDevice, DiscoveryProtocol, ProbeMatch};
use safewatch::realtime_hub::RealtimeHub;
use safewatch::record_store::MemoryRecordStore;
use safewatch::risk_engine::{RiskEngine, RiskLabel};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct StillCamera {
    online: AtomicBool,
}

#[async_trait]
impl CameraDevice for StillCamera {
    async fn fetch_frame(&self) -> Result<Vec<u8>> {
        if self.online.load(Ordering::SeqCst) {
            Ok(vec![0xff, 0xd8, 0xff, 0xd9])
        } else {
            Err(Error::device("lobby", "connection reset"))
        }
    }

    fn stream_url(&self) -> String {
        "rtsp://10.0.0.5/stream1".to_string()
    }
}

struct OneCameraNetwork {
    camera: Arc<StillCamera>,
}

#[async_trait]
impl DiscoveryProtocol for OneCameraNetwork {
    async fn probe(&self) -> Result<Vec<ProbeMatch>> {
        Ok(vec![ProbeMatch {
            address: "http://10.0.0.5/onvif/device_service".to_string(),
            urn: "urn:uuid:lobby".to_string(),
            name: "Lobby".to_string(),
        }])
    }

    async fn connect(
        &self,
        _address: &str,
        _credentials: Option<Credentials>,
    ) -> Result<Arc<dyn CameraDevice>> {
        Ok(self.camera.clone())
    }
}

/// Three people, all too close together
struct CrowdedWorker;

#[async_trait]
impl DetectionWorker for CrowdedWorker {
    fn modality(&self) -> Modality {
        Modality::SocialDistance
    }

    async fn ready(&self) -> bool {
        true
    }

    async fn detect(
        &self,
        _image: Vec<u8>,
        calibration: Option<Calibration>,
    ) -> Result<DetectionResult> {
        assert_eq!(calibration.map(|c| c.threshold), Some(1.2));
        let mut result = DetectionResult {
            mean_distance: Some(0.9),
            ..DetectionResult::default()
        };
        for i in 0..4 {
            let id = format!("person-{}", i);
            result.entities.insert(
                id.clone(),
                DetectedEntity {
                    id: id.clone(),
                    bbox: vec![0.1 * i as f64, 0.2, 0.1, 0.3],
                    label: Some("person".to_string()),
                    contact: Vec::new(),
                },
            );
            if i < 3 {
                result.violators.insert(
                    id.clone(),
                    ViolatorEntity {
                        id,
                        violation: ViolationType::NoSocialDistance,
                        image: String::new(),
                        score: 0.8,
                        contact: Some(vec!["person-3".to_string()]),
                    },
                );
            }
        }
        Ok(result)
    }
}

struct MaskedWorker;

#[async_trait]
impl DetectionWorker for MaskedWorker {
    fn modality(&self) -> Modality {
        Modality::FaceMask
    }

    async fn ready(&self) -> bool {
        true
    }

    async fn detect(&self, _: Vec<u8>, _: Option<Calibration>) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}

fn events(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        out.push(serde_json::from_str(&raw).unwrap());
    }
    out
}

#[tokio::test]
async fn test_detection_flows_into_risk_state_and_push_events() {
    let store = Arc::new(MemoryRecordStore::new());
    let hub = Arc::new(RealtimeHub::new());
    let registry = Arc::new(CameraRegistry::new(store.clone()));
    let risk = Arc::new(RiskEngine::new(store.clone(), None, hub.clone()));
    let camera = Arc::new(StillCamera {
        online: AtomicBool::new(true),
    });
    let sessions = Arc::new(CameraSessionManager::new(
        registry.clone(),
        Arc::new(OneCameraNetwork {
            camera: camera.clone(),
        }),
        risk.clone(),
        hub.clone(),
        Arc::new(CameraStatusTracker::new()),
        SessionConfig {
            broadcast_interval: Duration::from_millis(10),
            snapshot_timeout: Duration::from_millis(100),
        },
    ));
    let orchestrator = DetectionOrchestrator::new(
        Arc::new(CrowdedWorker),
        Arc::new(MaskedWorker),
        sessions.clone(),
        risk.clone(),
        hub.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();

    // Discovery registers the camera and seeds its risk state
    let found = sessions.discover().await;
    assert_eq!(found.len(), 1);
    let camera_id = found[0].camera_id.clone();
    assert_eq!(risk.count(&camera_id).await.unwrap().label, RiskLabel::Unknown);

    // Calibrate before the camera is watched; the risk state is not reseeded
    sessions
        .calibrate(
            &camera_id,
            safewatch::camera_registry::CalibrateRequest {
                focal_length: 615.0,
                shoulder_length: 0.45,
                threshold: 1.2,
            },
        )
        .await
        .unwrap();

    let (watcher, mut rx) = hub.register().await;
    let snapshot = sessions.connect(&camera_id, watcher).await.unwrap();
    assert_eq!(snapshot.watchers, 1);
    assert_eq!(snapshot.stream_url.as_deref(), Some("rtsp://10.0.0.5/stream1"));

    assert_eq!(orchestrator.initialize().await, DetectionState::Ready);
    assert_eq!(orchestrator.tick(Modality::SocialDistance).await, 1);

    let mut completed = 0;
    for _ in 0..200 {
        completed += orchestrator.reconcile(Modality::SocialDistance).await.completed;
        if completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(completed, 1);

    // Risk state: 3 of 4 too close, mean distance 0.9 against the seeded 1.0 threshold
    let count = risk.count(&camera_id).await.unwrap();
    assert_eq!(count.factors.sdv, [3.0, 4.0, 0.75]);
    assert_eq!(count.label, RiskLabel::High);

    assert_eq!(store.violators().await.len(), 3);
    assert_eq!(store.reports().await.len(), 1);
    let notifications = risk.notifications(Some(&camera_id), 10).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].notif_message.as_deref(),
        Some("Lobby location is at HIGH RISK")
    );

    let pushed = events(&mut rx);
    let names: Vec<&str> = pushed.iter().filter_map(|e| e["event"].as_str()).collect();
    for expected in ["stream:frame", "notif", "data:mean", "data:count", "data:report", "violators:sdd"] {
        assert!(names.contains(&expected), "missing {} in {:?}", expected, names);
    }

    // Camera drops: one terminal notice, then nothing more for this camera
    camera.online.store(false, Ordering::SeqCst);
    let mut notice = None;
    for _ in 0..200 {
        if let Some(event) = events(&mut rx)
            .into_iter()
            .find(|e| e["event"] == "stream:notif")
        {
            notice = Some(event);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let notice = notice.expect("disconnect notice");
    assert_eq!(notice["data"]["camera_id"], camera_id.as_str());
    assert!(!sessions.has_session(&camera_id).await);
    assert_eq!(sessions.watching(&watcher).await, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events(&mut rx)
        .iter()
        .all(|e| e["event"] != "stream:frame" && e["event"] != "stream:notif"));
}
