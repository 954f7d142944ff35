pub mod manager;
pub mod progress;
pub mod runner;
pub mod store;
pub mod ytdlp;
#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::errors::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Lifecycle of a job: `Queued -> Starting -> Downloading -> Finished | Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Starting,
    Downloading,
    Finished,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }

    /// Staying put is always allowed; terminal states have no way out.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (JobStatus::Queued, JobStatus::Starting) => true,
            (JobStatus::Starting, JobStatus::Downloading) => true,
            (JobStatus::Downloading, JobStatus::Finished) => true,
            (from, JobStatus::Error) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    pub format: String,
    pub title: Option<String>,
    pub filepath: Option<PathBuf>,
    pub status: JobStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobRecord {
    pub fn new(id: String, url: String, format: String) -> Self {
        Self {
            id,
            url,
            format,
            title: None,
            filepath: None,
            status: JobStatus::Queued,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Latest progress view of one job. Always replaced as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub percent: f64,
    pub rate: String,
    pub status: JobStatus,
    pub error: Option<String>,
}

impl ProgressSnapshot {
    pub fn queued() -> Self {
        Self {
            percent: 0.0,
            rate: "Queued".to_string(),
            status: JobStatus::Queued,
            error: None,
        }
    }

    pub fn starting() -> Self {
        Self {
            percent: 0.0,
            rate: "Starting...".to_string(),
            status: JobStatus::Downloading,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            percent: 100.0,
            rate: "Done".to_string(),
            status: JobStatus::Finished,
            error: None,
        }
    }

    pub fn failed(percent: f64, rate: &str, message: impl Into<String>) -> Self {
        Self {
            percent,
            rate: rate.to_string(),
            status: JobStatus::Error,
            error: Some(message.into()),
        }
    }
}

/// Stage reported by the engine in a raw progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStage {
    Downloading,
    Finished,
    Error,
    Other(String),
}

impl EngineStage {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "downloading" => EngineStage::Downloading,
            "finished" => EngineStage::Finished,
            "error" => EngineStage::Error,
            other => EngineStage::Other(other.to_string()),
        }
    }
}

/// One progress callback from the engine. Every field is optional because the
/// engine only fills in what it knows at that moment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProgressEvent {
    pub stage: Option<EngineStage>,
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub percent_str: Option<String>,
    pub speed: Option<f64>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl RawProgressEvent {
    pub fn downloading() -> Self {
        Self {
            stage: Some(EngineStage::Downloading),
            ..Self::default()
        }
    }

    pub fn finished(filename: Option<String>) -> Self {
        Self {
            stage: Some(EngineStage::Finished),
            filename,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            stage: Some(EngineStage::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_bytes(mut self, downloaded: f64, total: Option<f64>) -> Self {
        self.downloaded_bytes = Some(downloaded);
        self.total_bytes = total;
        self
    }

    pub fn with_percent_str(mut self, percent: impl Into<String>) -> Self {
        self.percent_str = Some(percent.into());
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Reads the loosely typed field bag the engine emits. Numbers may arrive as
    /// JSON numbers or strings, and several keys have historical aliases.
    pub fn from_value(value: &Value) -> Self {
        Self {
            stage: field_text(value, &["status"]).map(|s| EngineStage::parse(&s)),
            downloaded_bytes: field_number(value, &["downloaded_bytes", "done_bytes"]),
            total_bytes: field_number(value, &["total_bytes", "total_bytes_estimate"])
                .filter(|t| *t > 0.0),
            percent_str: field_text(value, &["_percent_str", "percent"]),
            speed: field_number(value, &["speed"]),
            filename: field_text(value, &["filename"]),
            error: field_text(value, &["error", "error_message"]),
        }
    }
}

/// First key holding a usable number wins.
fn field_number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn field_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Handle the engine uses to report progress. Events sent through one sink are
/// delivered in order. The engine must drop every clone before `download`
/// returns, which is what signals the end of the event stream.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<RawProgressEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RawProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: RawProgressEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Progress receiver gone, dropping event");
        }
    }
}

/// What the engine needs to run one job's download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub job_id: String,
    pub url: String,
    pub format: String,
    pub work_dir: PathBuf,
}

impl DownloadRequest {
    /// Every file a job produces starts with this prefix.
    pub fn file_prefix(&self) -> String {
        job_file_prefix(&self.job_id)
    }
}

pub fn job_file_prefix(job_id: &str) -> String {
    format!("{}-", job_id)
}

/// Metadata returned by the engine's no-download probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

impl MediaInfo {
    /// Tallest formats first, formats without a height last.
    pub fn sort_formats(&mut self) {
        for format in &mut self.formats {
            if format.filesize.is_none() {
                format.filesize = format.filesize_approx;
            }
        }
        self.formats
            .sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub format_note: Option<String>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_size", skip_serializing)]
    pub filesize_approx: Option<u64>,
}

/// Sizes sometimes come through as floats (estimates), sometimes as null.
fn lenient_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
    }))
}

/// The external extraction/download engine.
#[async_trait::async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe_metadata(&self, url: &str) -> Result<MediaInfo>;
    async fn download(&self, request: &DownloadRequest, progress: ProgressSink) -> Result<()>;
    fn get_name(&self) -> &str;
}
