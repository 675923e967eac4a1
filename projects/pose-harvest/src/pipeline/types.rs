use crate::pipeline::pose::PoseCandidate;
use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Stage names, in pipeline order.
pub const STAGES: [&str; 5] = ["reader", "encode", "detect", "feature", "finalize"];

/// Execution device for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl Device {
    pub fn label(&self) -> String {
        match self {
            Device::Cpu => "CPU".to_string(),
            Device::Gpu(id) => format!("GPU{}", id),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`, `-1`, `gpu<N>` or a bare device id `<N>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" || s == "-1" {
            return Ok(Device::Cpu);
        }
        let id = s.strip_prefix("gpu").unwrap_or(&s);
        id.parse::<u32>()
            .map(Device::Gpu)
            .map_err(|_| anyhow!("Invalid device '{}': expected cpu, gpu<N> or <N>", s))
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct StageProgress {
    pub current: usize,
    pub ms_per_frame: f64,
}

/// Per-device processing state shared between stage threads and the distributor.
#[derive(Debug)]
pub struct DeviceState {
    pub device: Device,
    pub is_active: AtomicBool,
    pub files_taken: AtomicUsize,
    pub files_skipped: AtomicUsize,
    pub error: RwLock<Option<String>>,
    /// Progress per stage (see `STAGES`)
    pub stages: RwLock<BTreeMap<String, StageProgress>>,
    pub start_time: Instant,
}

impl DeviceState {
    pub fn new(device: Device) -> Self {
        let stages = STAGES
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    StageProgress {
                        current: 0,
                        ms_per_frame: 0.0,
                    },
                )
            })
            .collect();

        Self {
            device,
            is_active: AtomicBool::new(true),
            files_taken: AtomicUsize::new(0),
            files_skipped: AtomicUsize::new(0),
            error: RwLock::new(None),
            stages: RwLock::new(stages),
            start_time: Instant::now(),
        }
    }

    /// Adds `frames` to a stage counter and folds the per-frame duration into its average.
    pub fn update_stage(&self, stage: &str, frames: usize, ms_per_frame: f64) {
        if let Ok(mut stages) = self.stages.write() {
            if let Some(progress) = stages.get_mut(stage) {
                progress.current += frames;
                // Simple exponential moving average for smoothing durations
                if progress.ms_per_frame == 0.0 {
                    progress.ms_per_frame = ms_per_frame;
                } else {
                    progress.ms_per_frame = progress.ms_per_frame * 0.9 + ms_per_frame * 0.1;
                }
            }
        }
    }

    pub fn stage_count(&self, stage: &str) -> usize {
        self.stages
            .read()
            .ok()
            .and_then(|stages| stages.get(stage).map(|p| p.current))
            .unwrap_or(0)
    }

    pub fn fail(&self, message: String) {
        if let Ok(mut error) = self.error.write() {
            *error = Some(message);
        }
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let stages: BTreeMap<String, serde_json::Value> = self
            .stages
            .read()
            .map(|stages| {
                stages
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            serde_json::json!({
                                "current": v.current,
                                "ms_per_frame": v.ms_per_frame,
                                "fps": if v.ms_per_frame > 0.0 { 1000.0 / v.ms_per_frame } else { 0.0 }
                            }),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finalized = stages
            .get("finalize")
            .and_then(|s| s["current"].as_u64())
            .unwrap_or(0);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let effective_fps = if elapsed > 0.0 {
            finalized as f64 / elapsed
        } else {
            0.0
        };

        serde_json::json!({
            "device": self.device.label(),
            "is_active": self.is_active.load(Ordering::Relaxed),
            "files_taken": self.files_taken.load(Ordering::Relaxed),
            "files_skipped": self.files_skipped.load(Ordering::Relaxed),
            "error": self.error.read().ok().and_then(|e| e.clone()),
            "stages": stages,
            "effective_fps": effective_fps,
        })
    }
}

/// Lifecycle of one video file. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum JobPhase {
    Idle,
    Reading,
    Draining,
    Done,
    Skipped,
}

/// Phase of every job seen during a run, keyed by output directory.
#[derive(Debug, Default)]
pub struct JobTracker {
    phases: RwLock<BTreeMap<PathBuf, JobPhase>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves a job forward. Backward moves and moves out of a terminal phase are ignored.
    pub fn advance(&self, output_dir: &Path, phase: JobPhase) {
        let Ok(mut phases) = self.phases.write() else {
            return;
        };
        let current = phases
            .entry(output_dir.to_path_buf())
            .or_insert(JobPhase::Idle);
        let terminal = matches!(*current, JobPhase::Done | JobPhase::Skipped);
        if !terminal && phase > *current {
            *current = phase;
        }
    }

    pub fn phase(&self, output_dir: &Path) -> Option<JobPhase> {
        self.phases.read().ok()?.get(output_dir).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<PathBuf, JobPhase> {
        self.phases
            .read()
            .map(|phases| phases.clone())
            .unwrap_or_default()
    }
}

/// An opened video file travelling with its frames.
///
/// The job reaches `Done` when the last reference is dropped: the reader lets
/// go after its final batch and each sink lets go when it releases the output
/// directory.
#[derive(Debug)]
pub struct VideoJob {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    /// Video stem, also the `filename` column of the report.
    pub name: String,
    pub fps: f64,
    tracker: Arc<JobTracker>,
}

impl VideoJob {
    pub fn new(
        source: PathBuf,
        output_dir: PathBuf,
        name: String,
        fps: f64,
        tracker: Arc<JobTracker>,
    ) -> Self {
        tracker.advance(&output_dir, JobPhase::Reading);
        Self {
            source,
            output_dir,
            name,
            fps,
            tracker,
        }
    }

    pub fn finish_reading(&self) {
        self.tracker.advance(&self.output_dir, JobPhase::Draining);
    }
}

impl Drop for VideoJob {
    fn drop(&mut self) {
        self.tracker.advance(&self.output_dir, JobPhase::Done);
    }
}

/// One frame moving through the pipeline. Each stage fills the next slot and
/// clears the ones it no longer needs.
pub struct FrameUnit {
    pub index: usize,
    pub job: Arc<VideoJob>,
    pub image: Option<RgbImage>,
    pub input: Option<Vec<f32>>,
    pub output: Option<Vec<f32>>,
    pub poses: Option<Vec<PoseCandidate>>,
}

impl FrameUnit {
    pub fn new(index: usize, job: Arc<VideoJob>, image: RgbImage) -> Self {
        Self {
            index,
            job,
            image: Some(image),
            input: None,
            output: None,
            poses: None,
        }
    }

    /// Splits into a report unit (poses only) and a video unit (image only).
    pub fn split(self) -> (FrameUnit, FrameUnit) {
        let report = FrameUnit {
            index: self.index,
            job: self.job.clone(),
            image: None,
            input: None,
            output: None,
            poses: self.poses,
        };
        let video = FrameUnit {
            index: self.index,
            job: self.job,
            image: self.image,
            input: None,
            output: None,
            poses: None,
        };
        (report, video)
    }
}

/// Frames of one read batch, stamped with a per-device sequence number.
pub struct FrameBatch {
    pub seq: u64,
    pub units: Vec<FrameUnit>,
}

/// Cooperative cancellation shared by the distributor and every reader.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("-1".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("GPU1".parse::<Device>().unwrap(), Device::Gpu(1));
        assert_eq!("0".parse::<Device>().unwrap(), Device::Gpu(0));
        assert!("tpu".parse::<Device>().is_err());
        assert_eq!(Device::Gpu(0).label(), "GPU0");
        assert_eq!(Device::Cpu.to_string(), "CPU");
    }

    #[test]
    fn test_update_stage_accumulates() {
        let state = DeviceState::new(Device::Cpu);
        state.update_stage("encode", 10, 2.0);
        state.update_stage("encode", 5, 12.0);
        state.update_stage("unknown", 5, 1.0);
        assert_eq!(state.stage_count("encode"), 15);
        let stages = state.stages.read().unwrap();
        assert!((stages["encode"].ms_per_frame - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_json_snapshot() {
        let state = DeviceState::new(Device::Gpu(2));
        state.files_taken.fetch_add(3, Ordering::Relaxed);
        state.fail("engine missing".to_string());
        let json = state.to_progress_json();
        assert_eq!(json["device"], "GPU2");
        assert_eq!(json["files_taken"], 3);
        assert_eq!(json["is_active"], false);
        assert_eq!(json["error"], "engine missing");
        assert!(json["stages"]["reader"].is_object());
    }

    #[test]
    fn test_job_phase_never_moves_backwards() {
        let tracker = Arc::new(JobTracker::new());
        let dir = PathBuf::from("/videos/clip");

        let job = Arc::new(VideoJob::new(
            PathBuf::from("/videos/clip.mp4"),
            dir.clone(),
            "clip".to_string(),
            30.0,
            tracker.clone(),
        ));
        assert_eq!(tracker.phase(&dir), Some(JobPhase::Reading));

        job.finish_reading();
        tracker.advance(&dir, JobPhase::Reading);
        assert_eq!(tracker.phase(&dir), Some(JobPhase::Draining));

        let held_by_sink = job.clone();
        drop(job);
        assert_eq!(tracker.phase(&dir), Some(JobPhase::Draining));
        drop(held_by_sink);
        assert_eq!(tracker.phase(&dir), Some(JobPhase::Done));
    }

    #[test]
    fn test_skipped_is_terminal() {
        let tracker = JobTracker::new();
        let dir = Path::new("/videos/done");
        tracker.advance(dir, JobPhase::Skipped);
        tracker.advance(dir, JobPhase::Done);
        assert_eq!(tracker.phase(dir), Some(JobPhase::Skipped));
    }

    #[test]
    fn test_split_moves_payloads() {
        let tracker = Arc::new(JobTracker::new());
        let job = Arc::new(VideoJob::new(
            PathBuf::from("a.mp4"),
            PathBuf::from("a"),
            "a".to_string(),
            25.0,
            tracker,
        ));
        let mut unit = FrameUnit::new(7, job, RgbImage::new(2, 2));
        unit.poses = Some(Vec::new());
        let (report, video) = unit.split();
        assert_eq!(report.index, 7);
        assert!(report.poses.is_some() && report.image.is_none());
        assert!(video.image.is_some() && video.poses.is_none());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
