use crate::pipeline::detection::InferenceEngine;
use crate::pipeline::types::{DeviceState, FrameBatch};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

/// Worker that runs the device's pose model once per frame.
///
/// Units whose inference fails are dropped; the rest of the batch continues.
pub fn detection_worker(
    rx: Receiver<FrameBatch>,
    tx: Sender<FrameBatch>,
    mut engine: Box<dyn InferenceEngine>,
    state: Arc<DeviceState>,
) -> Result<()> {
    for mut batch in rx {
        let start_inst = Instant::now();

        batch.units.retain_mut(|unit| {
            let Some(input) = unit.input.take() else {
                tracing::warn!(
                    "Detection worker: frame {} of {} was not encoded, dropping",
                    unit.index,
                    unit.job.name
                );
                return false;
            };
            match engine.infer(&input) {
                Ok(output) => {
                    unit.output = Some(output);
                    true
                }
                Err(e) => {
                    tracing::warn!(
                        "Detection worker: inference failed on frame {} of {}: {:#}",
                        unit.index,
                        unit.job.name,
                        e
                    );
                    false
                }
            }
        });

        let frames = batch.units.len();
        if frames == 0 {
            continue;
        }
        let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        state.update_stage("detect", frames, duration_ms / frames as f64);

        if tx.send(batch).is_err() {
            break;
        }
    }

    Ok(())
}
