use crate::config::AppConfig;
use crate::downloader::runner::JobRunner;
use crate::downloader::store::{JobEntry, JobStore};
use crate::downloader::{JobRecord, JobStatus, MediaEngine, MediaInfo};
use crate::errors::{AppError, Result};
use crate::security::InputValidator;
use crate::utils::{download_name, generate_job_id};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// What a poller sees for one job.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobProgress {
    pub job_id: String,
    pub percent: f64,
    #[serde(rename = "speed")]
    pub rate: String,
    pub status: JobStatus,
    pub title: Option<String>,
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobEntry> for JobProgress {
    fn from(entry: JobEntry) -> Self {
        let filename = entry
            .record
            .filepath
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned());

        Self {
            job_id: entry.record.id,
            percent: entry.snapshot.percent,
            rate: entry.snapshot.rate,
            status: entry.record.status,
            title: entry.record.title,
            filename,
            error: entry.snapshot.error,
        }
    }
}

/// A finished job's file, ready to hand to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievedFile {
    pub path: PathBuf,
    /// Suggested attachment name derived from the title.
    pub download_name: String,
}

pub struct JobManager {
    store: JobStore,
    engine: Arc<dyn MediaEngine>,
    work_dir: PathBuf,
    default_format: String,
    limiter: Option<Arc<Semaphore>>,
    validator: InputValidator,
}

impl JobManager {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        Self::with_store(JobStore::new(), engine, config)
    }

    pub fn with_store(store: JobStore, engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        log::info!(
            "Job manager using engine '{}' in {:?}",
            engine.get_name(),
            config.work_dir
        );
        Self {
            store,
            engine,
            work_dir: config.work_dir.clone(),
            default_format: config.default_format.clone(),
            limiter: config
                .max_concurrent_jobs
                .map(|max| Arc::new(Semaphore::new(max))),
            validator: InputValidator::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Registers a job and starts its runner in the background. Returns as
    /// soon as the job is queued.
    pub async fn submit(&self, url: &str, format: Option<&str>) -> Result<String> {
        let url = url.trim();
        self.validator.validate_url(url)?;

        let format = match format.map(str::trim).filter(|f| !f.is_empty()) {
            Some(selector) => {
                self.validator.validate_format_selector(selector)?;
                selector.to_string()
            }
            None => self.default_format.clone(),
        };

        let job_id = generate_job_id();
        self.store
            .create(JobRecord::new(job_id.clone(), url.to_string(), format.clone()))
            .await?;
        log::info!("Queued job {} for {}", job_id, url);

        let runner = JobRunner::new(self.store.clone(), self.engine.clone(), self.work_dir.clone());
        let limiter = self.limiter.clone();
        let store = self.store.clone();
        let id = job_id.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => match limiter.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(e) => {
                        log::error!("Job {} could not get a run slot: {}", id, e);
                        store.fail(&id, "Error", &e.to_string()).await;
                        return;
                    }
                },
                None => None,
            };
            runner.run(&id, &url, &format).await;
        });

        Ok(job_id)
    }

    pub async fn poll(&self, job_id: &str) -> Result<JobProgress> {
        self.store
            .get(job_id)
            .await
            .map(JobProgress::from)
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))
    }

    /// Path of a finished job's file, if it is still on disk.
    pub async fn retrieve(&self, job_id: &str) -> Result<RetrievedFile> {
        let entry = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| AppError::NotFound(job_id.to_string()))?;

        if entry.record.status != JobStatus::Finished {
            return Err(AppError::NotFinished(format!(
                "{} is {}",
                job_id, entry.record.status
            )));
        }

        let path = entry
            .record
            .filepath
            .ok_or_else(|| AppError::FileMissing(job_id.to_string()))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AppError::FileMissing(path.to_string_lossy().into_owned()));
        }

        let title = entry.record.title.unwrap_or_else(|| job_id.to_string());
        Ok(RetrievedFile {
            download_name: download_name(&title, job_id, &path),
            path,
        })
    }

    /// Every job, oldest first.
    pub async fn list(&self) -> Vec<JobProgress> {
        self.store
            .list()
            .await
            .into_iter()
            .map(JobProgress::from)
            .collect()
    }

    /// Title, thumbnail and available formats of `url` without downloading.
    pub async fn inspect(&self, url: &str) -> Result<MediaInfo> {
        let url = url.trim();
        self.validator.validate_url(url)?;

        let mut info = self
            .engine
            .probe_metadata(url)
            .await
            .map_err(|e| AppError::Engine(format!("failed to fetch info: {}", e)))?;
        info.sort_formats();
        Ok(info)
    }
}
