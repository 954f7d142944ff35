use std::sync::Arc;
use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use mediagrab::{AppConfig, JobManager, JobStatus, YtDlpEngine};

#[derive(Parser, Debug)]
#[command(name = "mediagrab", version, about = "Fetch media through yt-dlp with live progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a URL and print the path of the finished file
    Fetch {
        url: String,
        /// yt-dlp format selector (defaults to the configured one)
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Show the title and available formats of a URL
    Info { url: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("mediagrab error: {:#}", e);
        let code = match e.downcast_ref::<mediagrab::AppError>() {
            Some(app_error) if app_error.is_client_error() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    };
    config
        .ensure_work_dir()
        .with_context(|| format!("cannot create working directory {:?}", config.work_dir))?;

    let engine = Arc::new(YtDlpEngine::from_config(&config));
    let manager = JobManager::new(engine, &config);

    match cli.command {
        Commands::Fetch { url, format } => fetch(&manager, &config, &url, format.as_deref()).await,
        Commands::Info { url } => show_info(&manager, &url).await,
    }
}

async fn fetch(manager: &JobManager, config: &AppConfig, url: &str, format: Option<&str>) -> anyhow::Result<()> {
    let job_id = manager.submit(url, format).await?;
    info!("Submitted job {}", job_id);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );

    let progress = loop {
        let progress = manager.poll(&job_id).await?;
        bar.set_position(progress.percent.round() as u64);
        bar.set_message(format!(
            "{} {}",
            progress.status,
            progress.rate
        ));
        if progress.status.is_terminal() {
            break progress;
        }
        tokio::time::sleep(config.poll_interval()).await;
    };

    if progress.status == JobStatus::Error {
        bar.abandon_with_message("failed");
        anyhow::bail!(
            "job {} failed: {}",
            job_id,
            progress.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    bar.finish_with_message("done");
    let file = manager.retrieve(&job_id).await?;
    println!("{}", file.path.display());
    info!("Suggested name: {}", file.download_name);
    Ok(())
}

async fn show_info(manager: &JobManager, url: &str) -> anyhow::Result<()> {
    let info = manager.inspect(url).await?;
    println!("{}", info.title.as_deref().unwrap_or("<untitled>"));
    if let Some(thumbnail) = &info.thumbnail {
        println!("thumbnail: {}", thumbnail);
    }

    println!("{:<12} {:<6} {:>11} {:>6} {:>12}  note", "format", "ext", "resolution", "fps", "size");
    for format in &info.formats {
        let resolution = match (format.width, format.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            (None, Some(h)) => format!("{}p", h),
            _ => "audio".to_string(),
        };
        println!(
            "{:<12} {:<6} {:>11} {:>6} {:>12}  {}",
            format.format_id.as_deref().unwrap_or("?"),
            format.ext.as_deref().unwrap_or("?"),
            resolution,
            format.fps.map(|f| format!("{:.0}", f)).unwrap_or_default(),
            format.filesize.map(|s| s.to_string()).unwrap_or_default(),
            format.format_note.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
