//! ONVIF device handle: media profile lookup, snapshot fetch, stream URI

use super::auth::ws_security_header;
use super::xml::{extract_capability_xaddr, extract_xml_attribute, extract_xml_value};
use super::CameraDevice;
use crate::camera_registry::Credentials;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";

/// Initialized ONVIF device
pub struct OnvifDevice {
    client: reqwest::Client,
    device_url: String,
    credentials: Option<Credentials>,
    snapshot_uri: String,
    stream_uri: String,
}

impl OnvifDevice {
    /// Resolve the first media profile's snapshot and stream URIs
    pub async fn connect(
        device_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut device = Self {
            client,
            device_url: device_url.to_string(),
            credentials,
            snapshot_uri: String::new(),
            stream_uri: String::new(),
        };

        let capabilities = device
            .soap(
                device_url,
                &format!(
                    r#"<GetCapabilities xmlns="{}"><Category>All</Category></GetCapabilities>"#,
                    DEVICE_NS
                ),
            )
            .await?;
        let media_url = extract_capability_xaddr(&capabilities, "Media")
            .unwrap_or_else(|| device_url.to_string());

        let profiles = device
            .soap(&media_url, &format!(r#"<GetProfiles xmlns="{}"/>"#, MEDIA_NS))
            .await?;
        let token = extract_xml_attribute(&profiles, "Profiles", "token")
            .ok_or_else(|| Error::device(device_url, "device reported no media profiles"))?;

        let snapshot = device
            .soap(
                &media_url,
                &format!(
                    r#"<GetSnapshotUri xmlns="{}"><ProfileToken>{}</ProfileToken></GetSnapshotUri>"#,
                    MEDIA_NS, token
                ),
            )
            .await?;
        device.snapshot_uri = extract_xml_value(&snapshot, "Uri")
            .ok_or_else(|| Error::device(device_url, "device reported no snapshot URI"))?;

        let stream = device
            .soap(
                &media_url,
                &format!(
                    r#"<GetStreamUri xmlns="{}"><StreamSetup><Stream xmlns="http://www.onvif.org/ver10/schema">RTP-Unicast</Stream><Transport xmlns="http://www.onvif.org/ver10/schema"><Protocol>RTSP</Protocol></Transport></StreamSetup><ProfileToken>{}</ProfileToken></GetStreamUri>"#,
                    MEDIA_NS, token
                ),
            )
            .await?;
        device.stream_uri = extract_xml_value(&stream, "Uri").unwrap_or_default();

        tracing::info!(
            device_url = %device_url,
            profile = %token,
            snapshot_uri = %device.snapshot_uri,
            "ONVIF device initialized"
        );
        Ok(device)
    }

    async fn soap(&self, url: &str, body: &str) -> Result<String> {
        let header = self
            .credentials
            .as_ref()
            .map(|c| ws_security_header(&c.login, &c.password))
            .unwrap_or_default();
        let envelope = envelope(&header, body);

        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(|e| Error::device(&self.device_url, e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::device(&self.device_url, e.to_string()))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || text.contains("NotAuthorized") {
            return Err(Error::Unauthorized(self.device_url.clone()));
        }
        if !status.is_success() {
            return Err(Error::device(
                &self.device_url,
                format!("SOAP call failed: {}", status),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl CameraDevice for OnvifDevice {
    async fn fetch_frame(&self) -> Result<Vec<u8>> {
        let mut request = self.client.get(&self.snapshot_uri);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.login, Some(&credentials.password));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::device(&self.device_url, e.to_string()))?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized(self.device_url.clone()));
        }
        if !resp.status().is_success() {
            return Err(Error::device(
                &self.device_url,
                format!("snapshot failed: {}", resp.status()),
            ));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::device(&self.device_url, e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::device(&self.device_url, "empty snapshot"));
        }
        Ok(bytes.to_vec())
    }

    fn stream_url(&self) -> String {
        self.stream_uri.clone()
    }
}

fn envelope(header: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>{}</s:Header>
  <s:Body>{}</s:Body>
</s:Envelope>"#,
        header, body
    )
}
