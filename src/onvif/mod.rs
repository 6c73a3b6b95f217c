//! ONVIF - Camera Discovery Boundary
//!
//! ## Responsibilities
//!
//! - WS-Discovery probe for network video transmitters
//! - Device handles that fetch snapshots and report stream URIs
//! - WS-Security UsernameToken for devices that need credentials
//!
//! The session manager only sees the `DiscoveryProtocol` and `CameraDevice`
//! traits, so tests can swap in scripted devices.

mod auth;
mod device;
mod discovery;
mod xml;

pub use device::OnvifDevice;
pub use discovery::parse_probe_matches;

use crate::camera_registry::Credentials;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One device answering a discovery probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeMatch {
    /// Device service URL
    pub address: String,
    /// Stable endpoint reference (urn:uuid:...)
    pub urn: String,
    pub name: String,
}

/// Live handle to one camera
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Current frame as JPEG bytes
    async fn fetch_frame(&self) -> Result<Vec<u8>>;

    fn stream_url(&self) -> String;
}

/// Camera discovery and connection
#[async_trait]
pub trait DiscoveryProtocol: Send + Sync {
    async fn probe(&self) -> Result<Vec<ProbeMatch>>;

    async fn connect(
        &self,
        address: &str,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn CameraDevice>>;
}

/// WS-Discovery + ONVIF SOAP implementation
pub struct OnvifDiscovery {
    probe_window: Duration,
    request_timeout: Duration,
}

impl OnvifDiscovery {
    pub fn new(probe_window: Duration, request_timeout: Duration) -> Self {
        Self {
            probe_window,
            request_timeout,
        }
    }
}

#[async_trait]
impl DiscoveryProtocol for OnvifDiscovery {
    async fn probe(&self) -> Result<Vec<ProbeMatch>> {
        discovery::probe(self.probe_window).await
    }

    async fn connect(
        &self,
        address: &str,
        credentials: Option<Credentials>,
    ) -> Result<Arc<dyn CameraDevice>> {
        let device = OnvifDevice::connect(address, credentials, self.request_timeout).await?;
        Ok(Arc::new(device))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted discovery and devices

    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct FakeDevice {
        pub online: AtomicBool,
        /// Calls to hang forever (timeout path)
        pub hang: AtomicBool,
        pub fetches: AtomicUsize,
        stream_url: String,
    }

    impl FakeDevice {
        pub fn new(stream_url: &str) -> Self {
            Self {
                online: AtomicBool::new(true),
                hang: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
                stream_url: stream_url.to_string(),
            }
        }

        pub fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CameraDevice for FakeDevice {
        async fn fetch_frame(&self) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.online.load(Ordering::SeqCst) {
                Ok(vec![0xff, 0xd8, 0xff, 0xd9])
            } else {
                Err(Error::device(&self.stream_url, "connection refused"))
            }
        }

        fn stream_url(&self) -> String {
            self.stream_url.clone()
        }
    }

    /// Discovery answering with a fixed set of devices keyed by address
    #[derive(Default)]
    pub struct FakeDiscovery {
        pub matches: Mutex<Vec<ProbeMatch>>,
        pub devices: Mutex<HashMap<String, Arc<FakeDevice>>>,
        /// Addresses that reject anonymous access
        pub need_auth: Mutex<Vec<String>>,
    }

    impl FakeDiscovery {
        pub fn add(&self, urn: &str, name: &str, address: &str) -> Arc<FakeDevice> {
            let device = Arc::new(FakeDevice::new(&format!("rtsp://{}/stream", urn)));
            self.matches.lock().unwrap().push(ProbeMatch {
                address: address.to_string(),
                urn: urn.to_string(),
                name: name.to_string(),
            });
            self.devices
                .lock()
                .unwrap()
                .insert(address.to_string(), device.clone());
            device
        }
    }

    #[async_trait]
    impl DiscoveryProtocol for FakeDiscovery {
        async fn probe(&self) -> Result<Vec<ProbeMatch>> {
            Ok(self.matches.lock().unwrap().clone())
        }

        async fn connect(
            &self,
            address: &str,
            credentials: Option<Credentials>,
        ) -> Result<Arc<dyn CameraDevice>> {
            let needs_auth = self.need_auth.lock().unwrap().iter().any(|a| a == address);
            if needs_auth && credentials.is_none() {
                return Err(Error::Unauthorized(address.to_string()));
            }
            let device = self
                .devices
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .ok_or_else(|| Error::device(address, "no route to host"))?;
            Ok(device as Arc<dyn CameraDevice>)
        }
    }
}
