//! Safewatch - Camera Safety Monitor
//!
//! ## Architecture
//!
//! 1. CameraRegistry - durable camera records (address, credentials, calibration)
//! 2. CameraSessionManager - device handles, watchers, live frame broadcast
//! 3. DetectionOrchestrator - per-modality tick / reconcile over job queues
//! 4. JobQueue - detection jobs against one worker per modality
//! 5. RiskEngine - violation counts to score, label, rolling mean
//! 6. RealtimeHub - WebSocket push (camera rooms + global)
//! 7. RecordStore - persistence (MySQL or in-memory, optional JSON archive)
//! 8. WebAPI - push channel and query routes
//!
//! Cameras come from ONVIF WS-Discovery; detection runs on external HTTP workers.

pub mod camera_registry;
pub mod camera_session;
pub mod camera_status_tracker;
pub mod detection_orchestrator;
pub mod detection_worker;
pub mod error;
pub mod job_queue;
pub mod models;
pub mod onvif;
pub mod realtime_hub;
pub mod record_store;
pub mod risk_engine;
pub mod state;
pub mod web_api;
