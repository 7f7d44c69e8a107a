//! JSON trace exporter.
//!
//! Writes a scenario run as a list of frames for offline plotting.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One sampled moment of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Virtual time in seconds
    pub time_sec: f64,

    /// Observer-to-target distance, when a session is involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,

    /// Session state name (`watching`, `alerted`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default)]
    pub path_len: usize,

    #[serde(default)]
    pub stale: bool,

    /// Alerts, verdicts, feed transitions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    pub fn at(time_sec: f64) -> Self {
        Self {
            time_sec,
            distance_m: None,
            state: None,
            path_len: 0,
            stale: false,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, message: impl Into<String>) -> Self {
        self.events.push(SimEvent {
            message: message.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,

    /// Virtual time of the last frame, in seconds
    pub duration_sec: f64,

    pub frames: Vec<SimFrame>,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_tracks_duration_and_skips_empty_fields() {
        let mut export = SimExport::new("truck_approach", 42);
        export.add_frame(SimFrame::at(0.0));
        export.add_frame(SimFrame::at(3.0).with_event("alert"));
        export.finalize(true, None);

        assert_eq!(export.duration_sec, 3.0);
        let json = export.to_json().unwrap();
        assert!(json.contains("\"alert\""));
        assert!(!json.contains("failure_reason"));
        assert!(!json.contains("distance_m"));

        let back: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.frames.len(), 2);
        assert_eq!(back.frames[1].events[0].message, "alert");
    }
}
