//! Asynchronous media retrieval jobs.
//!
//! A [`JobManager`] accepts a URL, runs the download on its own task through a
//! [`MediaEngine`] and keeps a pollable progress snapshot per job in a shared
//! [`JobStore`] until the finished file can be retrieved.

pub mod config;
pub mod downloader;
pub mod errors;
pub mod security;
pub mod utils;

pub use config::AppConfig;
pub use downloader::manager::{JobManager, JobProgress, RetrievedFile};
pub use downloader::store::JobStore;
pub use downloader::ytdlp::YtDlpEngine;
pub use downloader::{JobStatus, MediaEngine, MediaInfo};
pub use errors::{AppError, Result};
