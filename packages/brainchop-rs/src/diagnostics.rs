//! Run statistics collected from a job, formatted for bug reports.

use crate::error::{BrainchopError, Result};
use crate::overlay::LabelMismatch;
use serde_json::{Map, Value};

pub const ISSUES_URL: &str = "https://github.com/neuroneural/brainchop/issues";

const STATUS_OK: &str = "Status: OK";

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    report: Option<String>,
    pending_note: Option<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the report from a job's `statData`: a JSON object, or a
    /// string holding one.
    pub fn record_telemetry(&mut self, stat_data: &Value) -> Result<()> {
        let mut stats = match stat_data {
            Value::Object(map) => map.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text)? {
                Value::Object(map) => map,
                other => {
                    return Err(BrainchopError::Validation(format!(
                        "Telemetry must be an object, got {}",
                        other
                    )))
                }
            },
            other => {
                return Err(BrainchopError::Validation(format!(
                    "Telemetry must be an object, got {}",
                    other
                )))
            }
        };
        if stats.is_empty() {
            return Ok(());
        }
        add_system_details(&mut stats);

        let mut report = format!(":: Diagnostics can help resolve issues {} ::\n", ISSUES_URL);
        for (key, value) in &stats {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            report.push_str(&format!("{}: {}\n", key, value));
        }
        log::debug!("Recorded {} telemetry fields", stats.len());
        self.report = Some(report);
        Ok(())
    }

    /// Remember a label mismatch so the next report shows it as its status.
    pub fn set_label_mismatch(&mut self, mismatch: Option<&LabelMismatch>) {
        self.pending_note = mismatch.map(LabelMismatch::note);
    }

    pub fn has_report(&self) -> bool {
        self.report.is_some()
    }

    /// The current report, with a pending mismatch note folded into its
    /// status line. `None` until a job has reported telemetry.
    pub fn take_report(&mut self) -> Option<String> {
        let report = self.report.as_mut()?;
        if let Some(note) = self.pending_note.take() {
            if report.contains(STATUS_OK) {
                *report = report.replacen(STATUS_OK, &format!("Status: {}", note), 1);
            }
        }
        Some(report.clone())
    }
}

fn add_system_details(stats: &mut Map<String, Value>) {
    stats
        .entry("OS")
        .or_insert_with(|| Value::String(std::env::consts::OS.to_string()));
    stats
        .entry("Arch")
        .or_insert_with(|| Value::String(std::env::consts::ARCH.to_string()));
    if let Ok(cores) = std::thread::available_parallelism() {
        stats
            .entry("Logical Cores")
            .or_insert_with(|| Value::from(cores.get()));
    }
}
