use std::process::Stdio;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use crate::config::AppConfig;
use crate::downloader::{DownloadRequest, MediaEngine, MediaInfo, ProgressSink, RawProgressEvent};
use crate::errors::{AppError, Result};

/// Prefix put in front of every progress line so it can be told apart from
/// whatever else yt-dlp prints on stdout.
const PROGRESS_MARKER: &str = "[mediagrab-progress]";

/// [`MediaEngine`] backed by the `yt-dlp` executable.
pub struct YtDlpEngine {
    name: String,
    ytdlp_path: String,
    merge_output_format: Option<String>,
}

impl YtDlpEngine {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            name: "yt-dlp".to_string(),
            ytdlp_path: ytdlp_path.into(),
            merge_output_format: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut engine = Self::new(config.ytdlp_path.clone());
        engine.merge_output_format = config.merge_output_format.clone();
        engine
    }

    fn probe_args(url: &str) -> Vec<String> {
        vec![
            "--dump-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            url.to_string(),
        ]
    }

    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let template = request
            .work_dir
            .join(format!("{}%(title)s.%(ext)s", request.file_prefix()));

        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-colors".to_string(),
            "--format".to_string(),
            request.format.clone(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--progress-template".to_string(),
            format!("download:{}%(progress)j", PROGRESS_MARKER),
        ];
        if let Some(merge) = &self.merge_output_format {
            args.push("--merge-output-format".to_string());
            args.push(merge.clone());
        }
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn probe_metadata(&self, url: &str) -> Result<MediaInfo> {
        log::info!("Probing metadata for {}", url);
        let output = Command::new(&self.ytdlp_path)
            .args(Self::probe_args(url))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AppError::Engine(format!("Failed to start {}: {}", self.ytdlp_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Engine(last_error_line(&stderr).unwrap_or_else(|| {
                format!("{} exited with {}", self.ytdlp_path, output.status)
            })));
        }

        // With playlists disabled yt-dlp prints a single JSON document.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let info: MediaInfo = serde_json::from_str(first_line)?;
        log::debug!(
            "Probe found '{}' with {} formats",
            info.title.as_deref().unwrap_or("<untitled>"),
            info.formats.len()
        );
        Ok(info)
    }

    async fn download(&self, request: &DownloadRequest, progress: ProgressSink) -> Result<()> {
        let args = self.download_args(request);
        log::info!("Running {} {:?}", self.ytdlp_path, args);

        let mut child = Command::new(&self.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Engine(format!("Failed to start {}: {}", self.ytdlp_path, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Engine("yt-dlp stdout was not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Engine("yt-dlp stderr was not captured".to_string()))?;

        // Drain stderr alongside stdout so a chatty engine cannot fill the pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                log::debug!("Stopped reading yt-dlp stderr: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        // Titles and paths are echoed in the platform encoding, so lines are
        // read as bytes and decoded lossily.
        let mut reader = BufReader::new(stdout);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            match parse_progress_line(line) {
                Some(event) => progress.emit(event),
                None => log::debug!("yt-dlp: {}", line),
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let message = last_error_line(&stderr)
                .unwrap_or_else(|| format!("{} exited with {}", self.ytdlp_path, status));
            progress.emit(RawProgressEvent::error(message.clone()));
            return Err(AppError::Engine(message));
        }

        Ok(())
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

/// Decodes one stdout line produced by the progress template.
pub fn parse_progress_line(line: &str) -> Option<RawProgressEvent> {
    let payload = line.trim().strip_prefix(PROGRESS_MARKER)?;
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) if value.is_object() => Some(RawProgressEvent::from_value(&value)),
        Ok(_) => None,
        Err(e) => {
            log::debug!("Unreadable progress line ({}): {}", e, payload);
            None
        }
    }
}

/// The most useful line of yt-dlp's stderr, preferring `ERROR:` lines.
fn last_error_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
}
