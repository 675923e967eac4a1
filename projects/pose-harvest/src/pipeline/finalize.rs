// Finalize workers: the report writer appends `Pose.csv` rows and the video
// writer encodes the (annotated) frames. Both switch files whenever the
// output directory of the incoming frames changes.

use crate::config::ConfidenceLevels;
use crate::pipeline::types::{DeviceState, FrameBatch, VideoJob};
use crate::run_artifacts::{PoseRecord, REPORT_HEADER};
use crate::run_context::{overlay_video_path, report_path};
use crate::video::{FrameSink, SinkFactory};
use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use std::fs::{File, OpenOptions};
use std::sync::Arc;
use std::time::Instant;

/// Open report of one job. Holding the job keeps it out of `Done`.
struct OpenReport {
    job: Arc<VideoJob>,
    writer: csv::Writer<File>,
}

impl OpenReport {
    fn open(job: Arc<VideoJob>) -> Result<Self> {
        let path = report_path(&job.output_dir);
        let existed = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open report {:?}", path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        // New reports get the header even if no pose row ever follows.
        if !existed {
            writer
                .write_record(REPORT_HEADER)
                .with_context(|| format!("Failed to write report header {:?}", path))?;
            writer.flush()?;
        }
        Ok(Self { job, writer })
    }

    fn close(mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!("Report writer: flushing {:?} failed: {}", self.job.output_dir, e);
        }
        tracing::info!("Report writer: closed {:?}", report_path(&self.job.output_dir));
    }
}

pub fn report_worker(
    rx: Receiver<FrameBatch>,
    levels: ConfidenceLevels,
    state: Arc<DeviceState>,
) -> Result<()> {
    let mut current: Option<OpenReport> = None;

    for batch in rx {
        let start_inst = Instant::now();
        let frames = batch.units.len();

        for unit in batch.units {
            let same_dir = current
                .as_ref()
                .is_some_and(|r| r.job.output_dir == unit.job.output_dir);
            if !same_dir {
                if let Some(report) = current.take() {
                    report.close();
                }
                match OpenReport::open(unit.job.clone()) {
                    Ok(report) => current = Some(report),
                    Err(e) => {
                        tracing::warn!("Report writer: {:#}", e);
                        continue;
                    }
                }
            }
            let Some(report) = current.as_mut() else {
                continue;
            };

            for pose in unit.poses.iter().flatten() {
                let record = PoseRecord::new(&unit.job.name, unit.index, pose, &levels);
                if let Err(e) = report.writer.serialize(&record) {
                    tracing::warn!(
                        "Report writer: frame {} of {} not written: {}",
                        unit.index,
                        unit.job.name,
                        e
                    );
                }
            }
        }

        if let Some(report) = current.as_mut() {
            if let Err(e) = report.writer.flush() {
                tracing::warn!("Report writer: flush failed: {}", e);
            }
        }

        let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        state.update_stage("finalize", frames, duration_ms / frames.max(1) as f64);
    }

    if let Some(report) = current.take() {
        report.close();
    }
    Ok(())
}

/// Open overlay video of one job.
struct OpenVideo {
    job: Arc<VideoJob>,
    sink: Box<dyn FrameSink>,
}

impl OpenVideo {
    fn close(mut self) {
        if let Err(e) = self.sink.release() {
            tracing::warn!("Video writer: releasing {} failed: {:#}", self.job.name, e);
        }
    }
}

pub fn video_worker(rx: Receiver<FrameBatch>, sinks: Arc<dyn SinkFactory>) -> Result<()> {
    let mut current: Option<OpenVideo> = None;

    for batch in rx {
        let start_inst = Instant::now();
        let mut written = 0usize;

        for unit in batch.units {
            let Some(image) = unit.image.as_ref() else {
                continue;
            };

            let same_dir = current
                .as_ref()
                .is_some_and(|v| v.job.output_dir == unit.job.output_dir);
            if !same_dir {
                if let Some(video) = current.take() {
                    video.close();
                }
                let path = overlay_video_path(&unit.job.output_dir, &unit.job.name);
                match sinks.create(&path, unit.job.fps, image.width(), image.height()) {
                    Ok(sink) => {
                        tracing::info!("Video writer: opened {:?}", path);
                        current = Some(OpenVideo {
                            job: unit.job.clone(),
                            sink,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Video writer: cannot create {:?}: {:#}", path, e);
                        continue;
                    }
                }
            }
            let Some(video) = current.as_mut() else {
                continue;
            };

            match video.sink.write(image) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(
                    "Video writer: frame {} of {} not written: {:#}",
                    unit.index,
                    unit.job.name,
                    e
                ),
            }
        }

        if written > 0 {
            let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
            tracing::trace!(
                "Video writer: {} frames at {:.2} ms/frame",
                written,
                duration_ms / written as f64
            );
        }
    }

    if let Some(video) = current.take() {
        video.close();
    }
    Ok(())
}
