// Work distributor: enumerates the input videos, feeds them to one pipeline per
// device and reports aggregated progress until every pipeline has drained.

use crate::pipeline::orchestrator::{Backends, DevicePipeline, PipelineConfig};
use crate::pipeline::types::{CancelToken, Device, DeviceState, JobPhase, JobTracker};
use crate::run_context::{collect_videos, is_processed};
use anyhow::{bail, Result};
use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PROGRESS_REFRESH: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub device: Device,
    pub files_taken: usize,
    pub files_skipped: usize,
    pub frames_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_files: usize,
    pub devices: Vec<DeviceSummary>,
    pub failed_devices: Vec<(Device, String)>,
    pub jobs: BTreeMap<PathBuf, JobPhase>,
}

/// `[taken / total] GPU0 : n, CPU : m`
pub fn progress_message(states: &[Arc<DeviceState>], total: usize) -> String {
    let taken: usize = states
        .iter()
        .map(|s| s.files_taken.load(Ordering::Relaxed))
        .sum();
    let per_device: Vec<String> = states
        .iter()
        .map(|s| {
            format!(
                "{} : {}",
                s.device.label(),
                s.files_taken.load(Ordering::Relaxed)
            )
        })
        .collect();
    format!("[{} / {}] {}", taken, total, per_device.join(", "))
}

/// Processes every video under `video_dirs` on `devices`. Blocks until done.
pub fn run(
    video_dirs: &[PathBuf],
    devices: &[Device],
    config: &PipelineConfig,
    backends: &Backends,
    cancel: CancelToken,
) -> Result<RunSummary> {
    let videos = collect_videos(video_dirs, &config.extension, config.recursive);
    let total = videos.len();
    let processed = videos.iter().filter(|v| is_processed(v)).count();
    tracing::info!(
        "Found {} videos in {} directories ({} already processed)",
        total,
        video_dirs.len(),
        processed
    );

    let (path_tx, path_rx) = channel::unbounded::<PathBuf>();
    let feed_cancel = cancel.clone();
    let feeder = thread::spawn(move || {
        for video in videos {
            if feed_cancel.is_cancelled() {
                break;
            }
            if path_tx.send(video).is_err() {
                break;
            }
        }
    });

    let tracker = Arc::new(JobTracker::new());
    let mut pipelines = Vec::new();
    let mut failed_devices = Vec::new();
    for &device in devices {
        match DevicePipeline::start(
            device,
            config,
            backends,
            path_rx.clone(),
            tracker.clone(),
            cancel.clone(),
        ) {
            Ok(pipeline) => {
                tracing::info!("{}: pipeline started", device);
                pipelines.push(pipeline);
            }
            Err(e) => {
                tracing::error!("{}: pipeline not started: {:#}", device, e);
                failed_devices.push((device, format!("{:#}", e)));
            }
        }
    }
    drop(path_rx);

    if pipelines.is_empty() {
        cancel.cancel();
        let _ = feeder.join();
        bail!("No device could be started ({} failed)", failed_devices.len());
    }

    let states: Vec<Arc<DeviceState>> = pipelines.iter().map(|p| p.state.clone()).collect();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")?
            .progress_chars("#>-"),
    );
    while !pipelines.iter().all(|p| p.is_finished()) {
        let taken: usize = states
            .iter()
            .map(|s| s.files_taken.load(Ordering::Relaxed))
            .sum();
        pb.set_position(taken as u64);
        pb.set_message(progress_message(&states, total));
        thread::sleep(PROGRESS_REFRESH);
    }
    pb.finish_with_message(progress_message(&states, total));

    if feeder.join().is_err() {
        tracing::error!("Path feeder panicked");
    }

    let mut summaries = Vec::new();
    for pipeline in pipelines {
        let state = pipeline.join();
        tracing::info!("{}", state.to_progress_json());
        summaries.push(DeviceSummary {
            device: state.device,
            files_taken: state.files_taken.load(Ordering::Relaxed),
            files_skipped: state.files_skipped.load(Ordering::Relaxed),
            frames_written: state.stage_count("finalize"),
        });
    }

    Ok(RunSummary {
        total_files: total,
        devices: summaries,
        failed_devices,
        jobs: tracker.snapshot(),
    })
}
