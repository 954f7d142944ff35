//! Scripted engine for exercising runners and the manager without yt-dlp.

use std::sync::Arc;
use tokio::sync::Semaphore;
use crate::downloader::{DownloadRequest, MediaEngine, MediaInfo, ProgressSink, RawProgressEvent};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub enum Outcome {
    /// Return success without producing a file.
    Succeed,
    /// Write `<job_id>-<name>` into the working directory, then succeed.
    WriteFile(String),
    /// Like `WriteFile` but without the engine's `finished` event.
    WriteFileQuietly(String),
    Fail(String),
}

#[derive(Clone)]
pub struct ScriptedEngine {
    title: String,
    probe_fails: bool,
    events: Vec<RawProgressEvent>,
    outcome: Outcome,
    gate: Option<Arc<Semaphore>>,
    title_from_url: bool,
}

impl ScriptedEngine {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            probe_fails: false,
            events: Vec::new(),
            outcome: Outcome::Succeed,
            gate: None,
            title_from_url: false,
        }
    }

    pub fn with_events(mut self, events: Vec<RawProgressEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Holds every download after its events until a permit is added.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Uses the last URL path segment as the title and output name.
    pub fn titled_by_url(mut self) -> Self {
        self.title_from_url = true;
        self
    }

    fn title_for(&self, url: &str) -> String {
        if self.title_from_url {
            url.rsplit('/').next().unwrap_or(url).to_string()
        } else {
            self.title.clone()
        }
    }
}

#[async_trait::async_trait]
impl MediaEngine for ScriptedEngine {
    async fn probe_metadata(&self, url: &str) -> Result<MediaInfo> {
        if self.probe_fails {
            return Err(AppError::Engine("probe unavailable".to_string()));
        }
        Ok(MediaInfo {
            title: Some(self.title_for(url)),
            ..MediaInfo::default()
        })
    }

    async fn download(&self, request: &DownloadRequest, progress: ProgressSink) -> Result<()> {
        for event in &self.events {
            progress.emit(event.clone());
            tokio::task::yield_now().await;
        }

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| AppError::Download(e.to_string()))?
                .forget();
        }

        match &self.outcome {
            Outcome::Succeed => Ok(()),
            Outcome::WriteFile(name) | Outcome::WriteFileQuietly(name) => {
                let name = if self.title_from_url {
                    format!("{}.mp4", self.title_for(&request.url))
                } else {
                    name.clone()
                };
                let path = request
                    .work_dir
                    .join(format!("{}{}", request.file_prefix(), name));
                tokio::fs::write(&path, request.url.as_bytes()).await?;
                if matches!(self.outcome, Outcome::WriteFile(_)) {
                    progress.emit(RawProgressEvent::finished(Some(
                        path.to_string_lossy().into_owned(),
                    )));
                }
                Ok(())
            }
            Outcome::Fail(message) => Err(AppError::Download(message.clone())),
        }
    }

    fn get_name(&self) -> &str {
        "scripted"
    }
}
