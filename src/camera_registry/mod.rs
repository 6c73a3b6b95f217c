//! CameraRegistry - Durable Camera Records
//!
//! ## Responsibilities
//!
//! - Known cameras keyed by id, looked up by WS-Discovery URN
//! - Calibration and credential updates
//! - Write-through to the record store, in-memory cache for reads

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::record_store::RecordStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// CameraRegistry instance
pub struct CameraRegistry {
    store: Arc<dyn RecordStore>,
    cameras: RwLock<HashMap<String, Camera>>,
}

impl CameraRegistry {
    /// Create new CameraRegistry (empty cache; call `load` to warm it)
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            cameras: RwLock::new(HashMap::new()),
        }
    }

    /// Load every stored camera into the cache
    pub async fn load(&self) -> Result<usize> {
        let stored = self.store.load_cameras().await?;
        let mut cameras = self.cameras.write().await;
        for camera in stored {
            cameras.insert(camera.camera_id.clone(), camera);
        }
        tracing::info!(count = cameras.len(), "Camera registry loaded");
        Ok(cameras.len())
    }

    pub async fn get(&self, camera_id: &str) -> Option<Camera> {
        self.cameras.read().await.get(camera_id).cloned()
    }

    pub async fn list(&self) -> Vec<Camera> {
        let mut cameras: Vec<Camera> = self.cameras.read().await.values().cloned().collect();
        cameras.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        cameras
    }

    pub async fn find_by_urn(&self, urn: &str) -> Option<Camera> {
        self.cameras
            .read()
            .await
            .values()
            .find(|c| c.urn == urn)
            .cloned()
    }

    /// Return the camera with this URN, registering it if unknown.
    /// A known camera gets its address refreshed when the device moved.
    pub async fn register_discovered(
        &self,
        urn: &str,
        name: &str,
        address: &str,
    ) -> Result<Camera> {
        if let Some(mut existing) = self.find_by_urn(urn).await {
            if existing.address.as_deref() != Some(address) {
                existing.address = Some(address.to_string());
                existing.updated_at = Utc::now();
                self.save(existing.clone()).await?;
                tracing::info!(camera_id = %existing.camera_id, address = %address, "Camera address updated");
            }
            return Ok(existing);
        }

        let camera = Camera::discovered(
            Uuid::new_v4().to_string(),
            urn.to_string(),
            name.to_string(),
            Some(address.to_string()),
        );
        self.save(camera.clone()).await?;
        tracing::info!(camera_id = %camera.camera_id, urn = %urn, name = %name, "Camera registered");
        Ok(camera)
    }

    /// Update calibration fields
    pub async fn update_calibration(
        &self,
        camera_id: &str,
        request: CalibrateRequest,
    ) -> Result<Camera> {
        if request.focal_length <= 0.0 || request.shoulder_length <= 0.0 || request.threshold <= 0.0 {
            return Err(Error::Validation(
                "calibration values must be positive".to_string(),
            ));
        }

        let mut camera = self
            .get(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))?;
        camera.focal_length = Some(request.focal_length);
        camera.shoulder_length = Some(request.shoulder_length);
        camera.threshold = Some(request.threshold);
        camera.updated_at = Utc::now();
        self.save(camera.clone()).await?;

        tracing::info!(
            camera_id = %camera_id,
            focal_length = request.focal_length,
            shoulder_length = request.shoulder_length,
            threshold = request.threshold,
            "Camera calibrated"
        );
        Ok(camera)
    }

    /// Update credentials; marks the camera as needing auth
    pub async fn update_credentials(&self, camera_id: &str, request: AuthRequest) -> Result<Camera> {
        let mut camera = self
            .get(camera_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", camera_id)))?;
        camera.login = Some(request.login);
        camera.password = Some(request.password);
        camera.need_auth = true;
        camera.updated_at = Utc::now();
        self.save(camera.clone()).await?;

        tracing::info!(camera_id = %camera_id, "Camera credentials updated");
        Ok(camera)
    }

    /// Flag a camera that rejected anonymous access
    pub async fn mark_needs_auth(&self, camera_id: &str) -> Result<()> {
        let Some(mut camera) = self.get(camera_id).await else {
            return Err(Error::NotFound(format!("camera {}", camera_id)));
        };
        if camera.need_auth {
            return Ok(());
        }
        camera.need_auth = true;
        camera.updated_at = Utc::now();
        self.save(camera).await
    }

    async fn save(&self, camera: Camera) -> Result<()> {
        self.store.save_camera(&camera).await?;
        self.cameras
            .write()
            .await
            .insert(camera.camera_id.clone(), camera);
        Ok(())
    }
}
