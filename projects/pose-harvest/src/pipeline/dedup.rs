// Pose deduplication: decode every anchor, keep confident ones, fold overlapping
// candidates into a single pose per person.

use crate::config::{ConfidenceLevels, OverlapThresholds, PoseParams};
use crate::pipeline::pose::{PoseCandidate, CHANNELS};
use anyhow::{anyhow, bail, Result};
use std::sync::Arc;

pub struct DedupEngine {
    params: Arc<PoseParams>,
    anchors: usize,
    decode_chunks: usize,
}

impl DedupEngine {
    pub fn new(params: Arc<PoseParams>, anchors: usize, decode_chunks: usize) -> Self {
        Self {
            params,
            anchors,
            decode_chunks: decode_chunks.clamp(1, anchors.max(1)),
        }
    }

    pub fn levels(&self) -> &ConfidenceLevels {
        &self.params.levels
    }

    fn overlaps(&self) -> &OverlapThresholds {
        &self.params.overlaps
    }

    /// Decodes and deduplicates one frame of model output.
    pub fn process(&self, output: &[f32]) -> Result<Vec<PoseCandidate>> {
        let candidates = self.decode_all(output)?;
        Ok(self.fold(candidates))
    }

    /// Decodes every anchor and keeps candidates whose box confidence reaches the
    /// configured level. Order follows anchor index.
    pub fn decode_all(&self, output: &[f32]) -> Result<Vec<PoseCandidate>> {
        if output.len() < self.anchors * CHANNELS {
            bail!(
                "Model output too short: {} values for {} anchors",
                output.len(),
                self.anchors
            );
        }

        let chunk = self.anchors.div_ceil(self.decode_chunks).max(1);
        if self.decode_chunks <= 1 {
            return self.decode_range(output, 0, self.anchors);
        }

        let parts = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..self.anchors)
                .step_by(chunk)
                .map(|start| {
                    let end = (start + chunk).min(self.anchors);
                    s.spawn(move |_| self.decode_range(output, start, end))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| anyhow!("Decode thread panicked"))
                        .and_then(|r| r)
                })
                .collect::<Result<Vec<_>>>()
        })
        .map_err(|_| anyhow!("Decode scope panicked"))??;

        Ok(parts.into_iter().flatten().collect())
    }

    fn decode_range(
        &self,
        output: &[f32],
        start: usize,
        end: usize,
    ) -> Result<Vec<PoseCandidate>> {
        let min_confidence = self.levels().bbox;
        let mut kept = Vec::new();
        for index in start..end {
            let pose = PoseCandidate::decode(output, self.anchors, index)?;
            if pose.bbox.confidence >= min_confidence {
                kept.push(pose);
            }
        }
        Ok(kept)
    }

    fn is_duplicate(&self, existing: &PoseCandidate, candidate: &PoseCandidate) -> bool {
        let overlaps = self.overlaps();

        (overlaps.bbox >= 0.0 && existing.overlap_bbox(candidate) >= overlaps.bbox)
            || (overlaps.torso >= 0.0 && existing.overlap_torso(candidate) >= overlaps.torso)
            || (overlaps.upper_body >= 0.0
                && existing.overlap_upper_body(candidate, self.levels()) >= overlaps.upper_body)
    }

    /// Greedy merge. Each candidate is merged into every retained pose it
    /// overlaps; when it overlaps none it becomes a new pose.
    pub fn fold(&self, candidates: Vec<PoseCandidate>) -> Vec<PoseCandidate> {
        let mut poses: Vec<PoseCandidate> = Vec::new();
        for candidate in candidates {
            let mut matched = false;
            for pose in poses.iter_mut() {
                if self.is_duplicate(pose, &candidate) {
                    pose.merge(&candidate);
                    matched = true;
                }
            }
            if !matched {
                poses.push(candidate);
            }
        }
        poses
    }
}
