// Reader worker: pulls video paths from the shared queue and sends frame batches
// through the pipeline

use crate::pipeline::types::{
    CancelToken, DeviceState, FrameBatch, FrameUnit, JobPhase, JobTracker, VideoJob,
};
use crate::run_context::{has_extension, output_dir_for, report_path, video_stem};
use crate::video::{FrameSource, SourceFactory};
use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long the reader waits on the path queue before re-checking cancellation.
pub const PATH_POLL: Duration = Duration::from_millis(100);

/// Consecutive frame read errors after which a file is abandoned.
pub const MAX_CONSECUTIVE_READ_ERRORS: usize = 16;

pub struct ReaderControl {
    pub paths: Receiver<std::path::PathBuf>,
    pub sources: Arc<dyn SourceFactory>,
    pub tracker: Arc<JobTracker>,
    pub cancel: CancelToken,
    pub extension: String,
    pub batch_size: usize,
}

/// Reads every video taken from the queue. Returns the number of batches sent.
pub fn read_worker(
    tx: Sender<FrameBatch>,
    state: Arc<DeviceState>,
    control: ReaderControl,
) -> Result<u64> {
    let mut seq = 0u64;

    loop {
        if control.cancel.is_cancelled() {
            tracing::info!("{} reader: cancelled", state.device);
            break;
        }

        let path = match control.paths.recv_timeout(PATH_POLL) {
            Ok(path) => path,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break, // No more work
        };
        state.files_taken.fetch_add(1, Ordering::Relaxed);

        let job = match open_job(&path, &control, &state) {
            Ok(Some(job)) => job,
            Ok(None) => {
                state.files_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                tracing::warn!("{} reader: skipping {:?}: {:#}", state.device, path, e);
                state.files_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let (job, mut source) = job;
        match read_video(&tx, &state, &control, job, source.as_mut(), &mut seq) {
            Ok(true) => {}
            Ok(false) => return Ok(seq), // Receiver closed
            Err(e) => tracing::warn!("{} reader: {:?} failed: {:#}", state.device, path, e),
        }
    }

    Ok(seq)
}

/// Resolves and opens one video. `Ok(None)` means the file is skipped on purpose.
fn open_job(
    path: &Path,
    control: &ReaderControl,
    state: &DeviceState,
) -> Result<Option<(Arc<VideoJob>, Box<dyn FrameSource>)>> {
    if !path.is_file() {
        tracing::warn!("{} reader: {:?} no longer exists", state.device, path);
        return Ok(None);
    }
    if !has_extension(path, &control.extension) {
        tracing::warn!("{} reader: {:?} is not a .{} file", state.device, path, control.extension);
        return Ok(None);
    }

    let output_dir = output_dir_for(path)?;
    if report_path(&output_dir).exists() {
        tracing::info!("{} reader: {:?} already processed", state.device, path);
        control.tracker.advance(&output_dir, JobPhase::Skipped);
        return Ok(None);
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", output_dir))?;
    let source = control
        .sources
        .open(path)
        .with_context(|| format!("Failed to open video {:?}", path))?;

    tracing::info!(
        "{} reader: {:?} ({} frames @ {:.2} fps)",
        state.device,
        path,
        source.frame_count(),
        source.fps()
    );

    let job = VideoJob::new(
        path.to_path_buf(),
        output_dir,
        video_stem(path)?,
        source.fps(),
        control.tracker.clone(),
    );
    Ok(Some((Arc::new(job), source)))
}

/// Streams one video into batches. Returns false when downstream has gone away.
fn read_video(
    tx: &Sender<FrameBatch>,
    state: &DeviceState,
    control: &ReaderControl,
    job: Arc<VideoJob>,
    source: &mut dyn FrameSource,
    seq: &mut u64,
) -> Result<bool> {
    let batch_size = control.batch_size.max(1);
    let mut units = Vec::with_capacity(batch_size);
    let mut index = 0usize;
    let mut consecutive_errors = 0usize;
    let mut batch_start = Instant::now();

    let mut flush = |units: &mut Vec<FrameUnit>, batch_start: &mut Instant| -> bool {
        if units.is_empty() {
            return true;
        }
        let frames = units.len();
        let duration_ms = batch_start.elapsed().as_secs_f64() * 1000.0;
        state.update_stage("reader", frames, duration_ms / frames as f64);

        let batch = FrameBatch {
            seq: *seq,
            units: std::mem::replace(units, Vec::with_capacity(batch_size)),
        };
        *seq += 1;
        *batch_start = Instant::now();
        tx.send(batch).is_ok()
    };

    loop {
        match source.next_frame() {
            Ok(Some(image)) => {
                consecutive_errors = 0;
                units.push(FrameUnit::new(index, job.clone(), image));
                index += 1;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(
                    "{} reader: frame {} of {} unreadable: {:#}",
                    state.device,
                    index,
                    job.name,
                    e
                );
                index += 1;
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    tracing::warn!(
                        "{} reader: giving up on {} after {} consecutive errors",
                        state.device,
                        job.name,
                        consecutive_errors
                    );
                    break;
                }
                continue;
            }
        }

        if units.len() >= batch_size {
            if !flush(&mut units, &mut batch_start) {
                return Ok(false);
            }
            if control.cancel.is_cancelled() {
                tracing::info!("{} reader: cancelled during {}", state.device, job.name);
                break;
            }
        }
    }

    let sent = flush(&mut units, &mut batch_start);
    job.finish_reading();
    tracing::info!("{} reader: finished {} ({} frames)", state.device, job.name, index);
    Ok(sent)
}
