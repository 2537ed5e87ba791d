//! Core job data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lifecycle::JobState;

/// Coarse pipeline stage a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Download,
    Checksum,
    Tile,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Download, Phase::Checksum, Phase::Tile];

    /// Short name used in the store and in lock file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Download => "download",
            Phase::Checksum => "checksum",
            Phase::Tile => "tile",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Phase::Download),
            "checksum" => Ok(Phase::Checksum),
            "tile" => Ok(Phase::Tile),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Progress within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Natural key of one media measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaContext {
    pub centre_id: i64,
    pub pipeline_id: i64,
    pub genotype_id: i64,
    pub strain_id: i64,
    pub procedure_id: i64,
    pub parameter_id: i64,
    pub measurement_id: i64,
}

impl fmt::Display for MediaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}/{}",
            self.centre_id,
            self.pipeline_id,
            self.genotype_id,
            self.strain_id,
            self.procedure_id,
            self.parameter_id,
            self.measurement_id
        )
    }
}

/// One persisted media job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: i64,
    pub context: MediaContext,
    pub source_url: String,
    pub extension_id: i64,
    /// Lowercase extension without the leading dot.
    pub extension: String,
    pub is_image: bool,
    /// Hex digest, set once the checksum phase succeeds.
    pub checksum: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

impl MediaJob {
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn status(&self) -> JobStatus {
        self.state.status
    }

    /// True once the job has left the download phase successfully.
    pub fn has_downloaded(&self) -> bool {
        self.state.has_downloaded()
    }
}

/// Append-only failure record for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub job_id: i64,
    pub phase: Phase,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Access details for a centre's file server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub centre_id: i64,
    pub protocol: String,
    pub hostname: String,
    pub username: String,
    pub access_key: String,
    pub base_path: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("centre_id", &self.centre_id)
            .field("protocol", &self.protocol)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("access_key", &"<redacted>")
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Number of jobs sitting in one (phase, status) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatusCount {
    pub state: JobState,
    pub count: u64,
}
