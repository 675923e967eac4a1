// Feature worker: turns raw model output into deduplicated poses, optionally
// draws them, and splits each frame between the report and video sinks

use crate::pipeline::dedup::DedupEngine;
use crate::pipeline::overlay::draw_poses;
use crate::pipeline::types::{DeviceState, FrameBatch};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

pub struct FeatureConfig {
    pub dedup: DedupEngine,
    pub draw_overlay: bool,
}

pub fn feature_worker(
    rx: Receiver<FrameBatch>,
    report_tx: Sender<FrameBatch>,
    video_tx: Option<Sender<FrameBatch>>,
    config: FeatureConfig,
    state: Arc<DeviceState>,
) -> Result<()> {
    for batch in rx {
        let start_inst = Instant::now();
        let mut reports = Vec::with_capacity(batch.units.len());
        let mut videos = Vec::with_capacity(batch.units.len());

        for mut unit in batch.units {
            let Some(output) = unit.output.take() else {
                continue;
            };
            let poses = match config.dedup.process(&output) {
                Ok(poses) => poses,
                Err(e) => {
                    tracing::warn!(
                        "Feature worker: frame {} of {} dropped: {:#}",
                        unit.index,
                        unit.job.name,
                        e
                    );
                    continue;
                }
            };

            if video_tx.is_some() && config.draw_overlay {
                if let Some(image) = unit.image.as_mut() {
                    draw_poses(image, &poses, config.dedup.levels());
                }
            }
            unit.poses = Some(poses);

            let (report, video) = unit.split();
            reports.push(report);
            if video_tx.is_some() {
                videos.push(video);
            }
        }

        let frames = reports.len();
        if frames == 0 {
            continue;
        }
        let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        state.update_stage("feature", frames, duration_ms / frames as f64);

        let report_batch = FrameBatch {
            seq: batch.seq,
            units: reports,
        };
        if report_tx.send(report_batch).is_err() {
            break;
        }
        if let Some(tx) = video_tx.as_ref() {
            let video_batch = FrameBatch {
                seq: batch.seq,
                units: videos,
            };
            if tx.send(video_batch).is_err() {
                break;
            }
        }
    }

    Ok(())
}
