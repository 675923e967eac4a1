// In-memory video sources, sinks and a fake pose model for pipeline tests.
//
// Synthetic frames carry their index in pixel (0, 0) as `[lo, hi, 0]`. The fake
// engine reads it back from the encoded tensor and reports one person whose box
// center x equals the frame index.

use crate::pipeline::detection::{EngineFactory, InferenceEngine};
use crate::pipeline::pose::CHANNELS;
use crate::pipeline::types::{Device, JobTracker, VideoJob};
use crate::video::{FrameSink, FrameSource, SinkFactory, SourceFactory};
use anyhow::{anyhow, bail, Result};
use image::{Rgb, RgbImage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    failing: BTreeSet<usize>,
    failing_from: Option<usize>,
}

impl SyntheticVideo {
    pub fn frames(frames: usize) -> Self {
        Self {
            frames,
            width: 8,
            height: 8,
            fps: 30.0,
            failing: BTreeSet::new(),
            failing_from: None,
        }
    }

    pub fn failing_at(mut self, frames: &[usize]) -> Self {
        self.failing.extend(frames.iter().copied());
        self
    }

    pub fn failing_from(mut self, frame: usize) -> Self {
        self.failing_from = Some(frame);
        self
    }

    fn fails(&self, index: usize) -> bool {
        self.failing.contains(&index) || self.failing_from.is_some_and(|from| index >= from)
    }
}

struct SyntheticSource {
    video: SyntheticVideo,
    next: usize,
}

impl FrameSource for SyntheticSource {
    fn frame_count(&self) -> usize {
        self.video.frames
    }

    fn fps(&self) -> f64 {
        self.video.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let index = self.next;
        if index >= self.video.frames {
            return Ok(None);
        }
        self.next += 1;
        if self.video.fails(index) {
            bail!("synthetic decode error at frame {}", index);
        }
        let mut image = RgbImage::new(self.video.width, self.video.height);
        image.put_pixel(
            0,
            0,
            Rgb([(index & 0xff) as u8, ((index >> 8) & 0xff) as u8, 0]),
        );
        Ok(Some(image))
    }
}

pub fn frame_index(image: &RgbImage) -> usize {
    let pixel = image.get_pixel(0, 0);
    pixel[0] as usize + 256 * pixel[1] as usize
}

/// Source factory serving `video` for every path, with a count of opened files.
pub fn synthetic_sources(video: SyntheticVideo) -> (Arc<dyn SourceFactory>, Arc<AtomicUsize>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let factory = move |_path: &Path| -> Result<Box<dyn FrameSource>> {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SyntheticSource {
            video: video.clone(),
            next: 0,
        }))
    };
    (Arc::new(factory), opens)
}

/// Pose model stand-in producing one confident person per frame.
pub struct FakeEngine {
    width: usize,
    height: usize,
    anchors: usize,
}

impl FakeEngine {
    pub fn new(width: usize, height: usize, anchors: usize) -> Self {
        Self {
            width,
            height,
            anchors,
        }
    }
}

impl InferenceEngine for FakeEngine {
    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let plane = self.width * self.height;
        if input.len() != 3 * plane {
            bail!("expected {} input values, got {}", 3 * plane, input.len());
        }
        let lo = (input[0] * 255.0).round() as usize;
        let hi = (input[plane] * 255.0).round() as usize;
        let index = lo + 256 * hi;

        let mut output = vec![0.0f32; CHANNELS * self.anchors];
        let mut set = |channel: usize, value: f32| output[self.anchors * channel] = value;
        set(0, index as f32);
        set(1, 10.0);
        set(2, 20.0);
        set(3, 20.0);
        set(4, 0.9);
        Ok(output)
    }
}

/// Engine factory that fails for the devices in `broken`.
pub fn fake_engines(
    width: usize,
    height: usize,
    anchors: usize,
    broken: &[Device],
) -> Arc<dyn EngineFactory> {
    let broken = broken.to_vec();
    let factory = move |device: &Device| -> Result<Box<dyn InferenceEngine>> {
        if broken.contains(device) {
            return Err(anyhow!("no model runtime on {}", device));
        }
        Ok(Box::new(FakeEngine::new(width, height, anchors)))
    };
    Arc::new(factory)
}

#[derive(Debug, Clone)]
pub struct RecordedVideo {
    pub path: PathBuf,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Frame indices in write order.
    pub frames: Vec<usize>,
    pub released: bool,
}

pub type Recordings = Arc<Mutex<Vec<RecordedVideo>>>;

struct RecordingSink {
    recordings: Recordings,
    slot: usize,
}

impl FrameSink for RecordingSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let mut recordings = self.recordings.lock().map_err(|_| anyhow!("poisoned"))?;
        recordings[self.slot].frames.push(frame_index(frame));
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut recordings = self.recordings.lock().map_err(|_| anyhow!("poisoned"))?;
        recordings[self.slot].released = true;
        Ok(())
    }
}

/// Sink factory recording every written frame index.
pub fn recording_sinks() -> (Arc<dyn SinkFactory>, Recordings) {
    let recordings: Recordings = Arc::new(Mutex::new(Vec::new()));
    let shared = recordings.clone();
    let factory =
        move |path: &Path, fps: f64, width: u32, height: u32| -> Result<Box<dyn FrameSink>> {
            let mut videos = shared.lock().map_err(|_| anyhow!("poisoned"))?;
            videos.push(RecordedVideo {
                path: path.to_path_buf(),
                fps,
                width,
                height,
                frames: Vec::new(),
                released: false,
            });
            Ok(Box::new(RecordingSink {
                recordings: shared.clone(),
                slot: videos.len() - 1,
            }))
        };
    (Arc::new(factory), recordings)
}

pub fn test_job(name: &str) -> Arc<VideoJob> {
    test_job_in(Path::new("/videos"), name, Arc::new(JobTracker::new()))
}

pub fn test_job_in(root: &Path, name: &str, tracker: Arc<JobTracker>) -> Arc<VideoJob> {
    Arc::new(VideoJob::new(
        root.join(format!("{}.mp4", name)),
        root.join(name),
        name.to_string(),
        25.0,
        tracker,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_frame;

    #[test]
    fn test_fake_engine_reads_frame_index() {
        let (sources, opens) = synthetic_sources(SyntheticVideo::frames(300));
        let mut source = sources.open(Path::new("a.mp4")).unwrap();
        let mut engine = FakeEngine::new(8, 8, 4);

        let mut last = None;
        while let Some(image) = source.next_frame().unwrap() {
            last = Some(image);
        }
        let image = last.unwrap();
        assert_eq!(frame_index(&image), 299);

        let output = engine.infer(&encode_frame(&image, 8, 8)).unwrap();
        assert_eq!(output.len(), CHANNELS * 4);
        assert_eq!(output[0], 299.0);
        assert_eq!(output[4 * 4], 0.9);
        assert_eq!(opens.load(Ordering::Relaxed), 1);
    }
}
