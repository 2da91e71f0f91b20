//! Experiment tracking
//!
//! A session reports one record per phase per epoch to an optional
//! [`ExperimentTracker`]. Failures to record are the caller's to log; they
//! never abort a run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::Phase;
use crate::utils::error::{HubError, Result};

/// One tracked phase result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerRecord {
    pub run_id: Uuid,
    pub model: String,
    pub epoch: usize,
    pub phase: Phase,
    pub accuracy: f64,
    pub loss: f64,
    pub learning_rate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Where a tracked run was reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub run_id: Uuid,
    pub project: String,
    pub experiment: String,
    /// Location of the run's records
    pub location: String,
}

/// Sink for per-phase training records
pub trait ExperimentTracker: Send {
    fn log(&mut self, record: &TrackerRecord) -> Result<()>;

    /// Identity of the run being tracked
    fn info(&self) -> TrackingInfo;
}

/// Appends records as JSON lines to `<root>/<project>/<experiment>.jsonl`
pub struct JsonLinesTracker {
    info: TrackingInfo,
    path: PathBuf,
    file: File,
}

impl JsonLinesTracker {
    /// Open (or create) the run file; an empty experiment name gets a generated one
    pub fn create(root: &Path, project: &str, experiment: Option<&str>) -> Result<Self> {
        let project = sanitize(project);
        if project.is_empty() {
            return Err(HubError::InvalidConfig(
                "tracking requires a project name".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let experiment = match experiment.map(sanitize) {
            Some(name) if !name.is_empty() => name,
            _ => format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S")),
        };

        let dir = root.join(&project);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.jsonl", experiment));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::info!("Tracking run {} to {:?}", run_id, path);

        Ok(Self {
            info: TrackingInfo {
                run_id,
                project,
                experiment,
                location: path.to_string_lossy().to_string(),
            },
            path,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.info.run_id
    }
}

impl ExperimentTracker for JsonLinesTracker {
    fn log(&mut self, record: &TrackerRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    fn info(&self) -> TrackingInfo {
        self.info.clone()
    }
}

/// Keep names usable as a single path component
fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Read back every record of a JSON-lines run file
pub fn read_records(path: &Path) -> Result<Vec<TrackerRecord>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(HubError::from))
        .collect()
}
