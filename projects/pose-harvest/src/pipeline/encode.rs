// Encode worker: converts frames into model input tensors
//
// Several workers share one input channel. The sequence gate makes them hand
// batches downstream in the order the reader stamped them.

use crate::pipeline::types::{DeviceState, FrameBatch};
use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};
use image::RgbImage;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Planar RGB tensor (`3 x height x width`, values in 0..1) of the top-left
/// region of `image`. Pixels outside the image stay zero.
pub fn encode_frame(image: &RgbImage, width: usize, height: usize) -> Vec<f32> {
    let plane = width * height;
    let mut tensor = vec![0.0f32; 3 * plane];
    let copy_w = (image.width() as usize).min(width);
    let copy_h = (image.height() as usize).min(height);

    for y in 0..copy_h {
        for x in 0..copy_w {
            let pixel = image.get_pixel(x as u32, y as u32);
            let offset = y * width + x;
            tensor[offset] = pixel[0] as f32 / 255.0;
            tensor[plane + offset] = pixel[1] as f32 / 255.0;
            tensor[2 * plane + offset] = pixel[2] as f32 / 255.0;
        }
    }
    tensor
}

#[derive(Debug)]
struct GateState {
    next: u64,
    /// Sequence numbers released ahead of their turn.
    finished: BTreeSet<u64>,
}

/// Hands out turns in ascending sequence order.
#[derive(Debug)]
pub struct SequenceGate {
    state: Mutex<GateState>,
    turn: Condvar,
}

impl SequenceGate {
    pub fn new(first: u64) -> Self {
        Self {
            state: Mutex::new(GateState {
                next: first,
                finished: BTreeSet::new(),
            }),
            turn: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims sequence `seq`. The gate moves past it once the ticket drops,
    /// whether or not the holder ever waited for its turn.
    pub fn ticket(&self, seq: u64) -> SequenceTicket<'_> {
        SequenceTicket { gate: self, seq }
    }

    pub fn next(&self) -> u64 {
        self.lock().next
    }
}

pub struct SequenceTicket<'a> {
    gate: &'a SequenceGate,
    seq: u64,
}

impl SequenceTicket<'_> {
    /// Blocks until every earlier sequence number has been released.
    pub fn wait_turn(&self) {
        let mut state = self.gate.lock();
        while state.next < self.seq {
            state = self
                .gate
                .turn
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

impl Drop for SequenceTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.finished.insert(self.seq);
        loop {
            let next = state.next;
            if !state.finished.remove(&next) {
                break;
            }
            state.next = next + 1;
        }
        drop(state);
        self.gate.turn.notify_all();
    }
}

/// Encodes every unit of each batch, then forwards the batch in sequence order.
pub fn encode_worker(
    rx: Receiver<FrameBatch>,
    tx: Sender<FrameBatch>,
    gate: Arc<SequenceGate>,
    width: usize,
    height: usize,
    state: Arc<DeviceState>,
) -> Result<()> {
    for mut batch in rx {
        let ticket = gate.ticket(batch.seq);
        let start_inst = Instant::now();

        batch.units.retain_mut(|unit| match unit.image.as_ref() {
            Some(image) => {
                unit.input = Some(encode_frame(image, width, height));
                true
            }
            None => {
                tracing::warn!(
                    "Encode worker: frame {} of {} has no image, dropping",
                    unit.index,
                    unit.job.name
                );
                false
            }
        });

        let frames = batch.units.len();
        if frames > 0 {
            let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
            state.update_stage("encode", frames, duration_ms / frames as f64);
        }

        ticket.wait_turn();
        if tx.send(batch).is_err() {
            break; // Receiver closed
        }
    }

    Ok(())
}
