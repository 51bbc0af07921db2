use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`CaptureSession`](crate::CaptureSession)'s worker.
///
/// Every field has a default, so a partial document deserializes:
///
///     use atomicrefbox::CaptureConfig;
///
///     let config: CaptureConfig = serde_json::from_str(r#"{ "max_frames": 10 }"#).unwrap();
///     assert_eq!(config.max_frames, Some(10));
///     assert_eq!(config.thread_name, "frame-capture");
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// How long the worker sleeps when the source has no frame ready.
    pub idle_backoff_ms: u64,
    /// Stop after publishing this many frames. `None` runs until stopped.
    pub max_frames: Option<u64>,
}

impl CaptureConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> CaptureConfig {
        CaptureConfig {
            thread_name: String::from("frame-capture"),
            idle_backoff_ms: 1,
            max_frames: None,
        }
    }
}
