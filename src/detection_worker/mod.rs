//! DetectionWorker - Inference Boundary
//!
//! One worker per modality. Given a frame and optional calibration it returns
//! violators and detected entities; an empty result is valid.

mod http_worker;

pub use http_worker::HttpDetectionWorker;

use crate::error::Result;
use crate::models::{Calibration, DetectionResult, Modality};
use async_trait::async_trait;

#[async_trait]
pub trait DetectionWorker: Send + Sync {
    fn modality(&self) -> Modality;

    /// Worker is up with its models loaded
    async fn ready(&self) -> bool;

    async fn detect(
        &self,
        image: Vec<u8>,
        calibration: Option<Calibration>,
    ) -> Result<DetectionResult>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// One scripted worker reply
    pub enum Script {
        Detect(DetectionResult),
        Fail(&'static str),
        Panic,
        Hang,
    }

    /// Worker that replays scripted replies, then returns empty results
    pub struct ScriptedWorker {
        modality: Modality,
        ready: AtomicBool,
        script: Mutex<VecDeque<Script>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedWorker {
        pub fn new(modality: Modality) -> Self {
            Self {
                modality,
                ready: AtomicBool::new(true),
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_script(modality: Modality, script: Vec<Script>) -> Self {
            let worker = Self::new(modality);
            *worker.script.lock().unwrap() = script.into();
            worker
        }

        pub fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DetectionWorker for ScriptedWorker {
        fn modality(&self) -> Modality {
            self.modality
        }

        async fn ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn detect(
            &self,
            _image: Vec<u8>,
            _calibration: Option<Calibration>,
        ) -> Result<DetectionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Script::Detect(result)) => Ok(result),
                Some(Script::Fail(msg)) => Err(Error::Worker(msg.to_string())),
                Some(Script::Panic) => panic!("worker crashed"),
                Some(Script::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(DetectionResult::default())
                }
                None => Ok(DetectionResult::default()),
            }
        }
    }
}
