//! HTTP detection worker client

use super::DetectionWorker;
use crate::error::{Error, Result};
use crate::models::{Calibration, DetectionResult, Modality};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

/// Detection worker reached over HTTP
pub struct HttpDetectionWorker {
    client: reqwest::Client,
    base_url: String,
    modality: Modality,
}

impl HttpDetectionWorker {
    /// Create a worker client with a per-request timeout
    pub fn new(base_url: String, modality: Modality, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            modality,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl DetectionWorker for HttpDetectionWorker {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn ready(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(modality = %self.modality, error = %e, "Worker health check failed");
                false
            }
        }
    }

    async fn detect(
        &self,
        image: Vec<u8>,
        calibration: Option<Calibration>,
    ) -> Result<DetectionResult> {
        let url = format!("{}/v1/detect", self.base_url);

        let mut form = Form::new().part(
            "image",
            Part::bytes(image)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );
        if let Some(calibration) = calibration {
            form = form
                .text("focal_length", calibration.focal_length.to_string())
                .text("shoulder_length", calibration.shoulder_length.to_string())
                .text("threshold", calibration.threshold.to_string());
        }

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Worker(format!(
                "{} detection failed: {} - {}",
                self.modality, status, body
            )));
        }

        parse_detection(&resp.text().await?)
    }
}

/// Parse a worker response; an empty or null body means nothing detected
fn parse_detection(body: &str) -> Result<DetectionResult> {
    let body = body.trim();
    if body.is_empty() || body == "null" {
        return Ok(DetectionResult::default());
    }
    Ok(serde_json::from_str(body)?)
}
