use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use crate::downloader::progress::translate;
use crate::downloader::store::JobStore;
use crate::downloader::{
    job_file_prefix, DownloadRequest, JobStatus, MediaEngine, ProgressSink, ProgressSnapshot,
    RawProgressEvent,
};
use crate::utils::ensure_dir_exists;

/// Extensions the engine uses for files that are still being written.
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

/// Drives one job from `queued` to a terminal state. Everything it learns is
/// written to the store; nothing is returned to the caller.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    engine: Arc<dyn MediaEngine>,
    work_dir: PathBuf,
}

impl JobRunner {
    pub fn new(store: JobStore, engine: Arc<dyn MediaEngine>, work_dir: PathBuf) -> Self {
        Self {
            store,
            engine,
            work_dir,
        }
    }

    pub async fn run(&self, job_id: &str, url: &str, format: &str) {
        let start_time = std::time::Instant::now();
        log::info!("Starting job {} for {} (format {})", job_id, url, format);
        self.set_status(job_id, JobStatus::Starting).await;

        let title = self.resolve_title(job_id, url).await;
        self.store
            .update_record(job_id, |record| record.title = Some(title.clone()))
            .await;

        if let Err(e) = ensure_dir_exists(&self.work_dir).await {
            log::error!("Job {} cannot use working directory {:?}: {}", job_id, self.work_dir, e);
            self.store.fail(job_id, "Error", &e.message()).await;
            return;
        }

        self.set_status(job_id, JobStatus::Downloading).await;
        self.store.update_snapshot(job_id, ProgressSnapshot::starting()).await;

        let request = DownloadRequest {
            job_id: job_id.to_string(),
            url: url.to_string(),
            format: format.to_string(),
            work_dir: self.work_dir.clone(),
        };

        let (sink, events) = ProgressSink::channel();
        let (result, forwarded) = tokio::join!(
            self.engine.download(&request, sink),
            forward_progress(&self.store, job_id, events),
        );
        log::debug!("Job {} delivered {} progress events", job_id, forwarded);

        match result {
            Ok(()) => match self.locate_output(job_id).await {
                Some(path) => {
                    self.store.complete(job_id, path.clone()).await;
                    log::info!(
                        "Job {} finished: {:?} (took {:.2} seconds)",
                        job_id,
                        path,
                        start_time.elapsed().as_secs_f64()
                    );
                }
                None => {
                    self.store
                        .fail(job_id, "File missing", "Downloaded file not found")
                        .await;
                    log::error!(
                        "Job {} reported success but no file with prefix {} exists in {:?}",
                        job_id,
                        job_file_prefix(job_id),
                        self.work_dir
                    );
                }
            },
            Err(e) => {
                self.store.fail(job_id, "Error", &e.message()).await;
                log::error!(
                    "Job {} failed: {} (took {:.2} seconds)",
                    job_id,
                    e,
                    start_time.elapsed().as_secs_f64()
                );
            }
        }
    }

    async fn set_status(&self, job_id: &str, status: JobStatus) {
        self.store.update_record(job_id, |record| record.status = status).await;
    }

    /// Title from the metadata probe, or a synthesized one if the probe fails.
    async fn resolve_title(&self, job_id: &str, url: &str) -> String {
        match self.engine.probe_metadata(url).await {
            Ok(info) => match info.title.filter(|t| !t.trim().is_empty()) {
                Some(title) => title,
                None => fallback_title(job_id),
            },
            Err(e) => {
                log::warn!("Metadata probe failed for job {}: {}", job_id, e);
                fallback_title(job_id)
            }
        }
    }

    /// Checks the working directory for the job's output instead of relying on
    /// the engine's `finished` event, which some engine paths never send.
    async fn locate_output(&self, job_id: &str) -> Option<PathBuf> {
        let prefix = job_file_prefix(job_id);

        let reported = self
            .store
            .get(job_id)
            .await
            .and_then(|entry| entry.record.filepath);
        if let Some(path) = reported {
            if is_job_output(&path, &prefix) && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }

        match find_job_file(&self.work_dir, &prefix).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Could not scan {:?} for job {}: {}", self.work_dir, job_id, e);
                None
            }
        }
    }
}

/// Feeds engine events through the translator into the store until the engine
/// drops its sink. Returns how many events were applied.
async fn forward_progress(
    store: &JobStore,
    job_id: &str,
    mut events: mpsc::UnboundedReceiver<RawProgressEvent>,
) -> usize {
    let mut applied = 0;
    while let Some(event) = events.recv().await {
        let previous = store.snapshot(job_id).await;
        let Some(translation) = translate(&event, previous.as_ref()) else {
            continue;
        };

        if let Some(path) = translation.filepath {
            store
                .update_record(job_id, |record| record.filepath = Some(path))
                .await;
        }
        log::debug!(
            "Job {}: {:.2}% at {} ({})",
            job_id,
            translation.snapshot.percent,
            translation.snapshot.rate,
            translation.snapshot.status
        );
        if store.update_snapshot(job_id, translation.snapshot).await {
            applied += 1;
        }
    }
    applied
}

pub fn fallback_title(job_id: &str) -> String {
    format!("media_{}", job_id)
}

fn is_job_output(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(prefix) && !is_partial(name))
        .unwrap_or(false)
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// First completed file (by name) in `dir` whose name starts with `prefix`.
pub async fn find_job_file(dir: &Path, prefix: &str) -> std::io::Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if is_job_output(&path, prefix) {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::{Outcome, ScriptedEngine};
    use crate::downloader::JobRecord;

    async fn run_job(engine: ScriptedEngine, work_dir: &Path) -> (JobStore, String) {
        let store = JobStore::new();
        let id = crate::utils::generate_job_id();
        store
            .create(JobRecord::new(id.clone(), "https://example.com/v".into(), "best".into()))
            .await
            .unwrap();
        let runner = JobRunner::new(store.clone(), Arc::new(engine), work_dir.to_path_buf());
        runner.run(&id, "https://example.com/v", "best").await;
        (store, id)
    }

    #[tokio::test]
    async fn successful_download_finishes_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new("Clip")
            .with_events(vec![
                RawProgressEvent::downloading().with_bytes(50.0, Some(100.0)).with_speed(2048.0),
                RawProgressEvent::downloading().with_bytes(100.0, Some(100.0)),
            ])
            .with_outcome(Outcome::WriteFile("Clip.mp4".into()));

        let (store, id) = run_job(engine, dir.path()).await;
        let entry = store.get(&id).await.unwrap();

        assert_eq!(entry.record.status, JobStatus::Finished);
        assert_eq!(entry.record.title.as_deref(), Some("Clip"));
        assert_eq!(entry.snapshot, ProgressSnapshot::done());
        let path = entry.record.filepath.unwrap();
        assert_eq!(path, dir.path().join(format!("{}-Clip.mp4", id)));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn missing_finished_event_is_covered_by_scan() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new("Quiet").with_outcome(Outcome::WriteFileQuietly("Quiet.webm".into()));

        let (store, id) = run_job(engine, dir.path()).await;
        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.record.status, JobStatus::Finished);
        assert!(entry.record.filepath.unwrap().ends_with(format!("{}-Quiet.webm", id)));
    }

    #[tokio::test]
    async fn probe_failure_synthesizes_title() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new("unused")
            .failing_probe()
            .with_outcome(Outcome::WriteFile("x.mp4".into()));

        let (store, id) = run_job(engine, dir.path()).await;
        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.record.title, Some(fallback_title(&id)));
        assert_eq!(entry.record.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn success_without_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new("Ghost")
            .with_events(vec![RawProgressEvent::downloading().with_bytes(30.0, Some(40.0))])
            .with_outcome(Outcome::Succeed);

        let (store, id) = run_job(engine, dir.path()).await;
        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.record.status, JobStatus::Error);
        assert_eq!(entry.snapshot.rate, "File missing");
        assert_eq!(entry.snapshot.percent, 75.0);
        assert_eq!(entry.snapshot.error.as_deref(), Some("Downloaded file not found"));
    }

    #[tokio::test]
    async fn engine_failure_keeps_last_percent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new("Broken")
            .with_events(vec![
                RawProgressEvent::downloading().with_percent_str("12.0%"),
                RawProgressEvent::downloading().with_bytes(41.0, Some(100.0)),
            ])
            .with_outcome(Outcome::Fail("HTTP Error 403: Forbidden".into()));

        let (store, id) = run_job(engine, dir.path()).await;
        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.record.status, JobStatus::Error);
        assert_eq!(entry.snapshot.rate, "Error");
        assert_eq!(entry.snapshot.percent, 41.0);
        assert_eq!(entry.snapshot.error.as_deref(), Some("HTTP Error 403: Forbidden"));
    }

    #[tokio::test]
    async fn partial_files_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc-clip.mp4.part"), b"partial").unwrap();
        std::fs::write(dir.path().join("other-clip.mp4"), b"other job").unwrap();
        assert_eq!(find_job_file(dir.path(), "abc-").await.unwrap(), None);

        std::fs::write(dir.path().join("abc-clip.mp4"), b"done").unwrap();
        assert_eq!(
            find_job_file(dir.path(), "abc-").await.unwrap(),
            Some(dir.path().join("abc-clip.mp4"))
        );
    }
}
