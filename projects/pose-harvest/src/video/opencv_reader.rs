use super::FrameSource;
use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, RgbImage};
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT},
};
use std::path::Path;

pub struct OpencvSource {
    capture: VideoCapture,
    fps: f64,
    total_frames: usize,
}

impl OpencvSource {
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Non UTF-8 video path: {:?}", path))?;
        let capture = VideoCapture::from_file(path_str, CAP_ANY)
            .with_context(|| format!("Failed to open video at: '{}'", path_str))?;
        if !capture.is_opened()? {
            return Err(anyhow!("Failed to open video file: {}", path_str));
        }

        let mut fps = capture.get(CAP_PROP_FPS)?;
        if fps <= 0.0 {
            tracing::warn!("OpencvSource: Failed to get FPS from metadata, falling back to 30.0");
            fps = 30.0;
        }
        let total_frames = capture.get(CAP_PROP_FRAME_COUNT)?.max(0.0) as usize;

        tracing::info!(
            "OpencvSource: opened {}, fps={:.2}, stream_frames={}",
            path_str,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            fps,
            total_frames,
        })
    }
}

impl FrameSource for OpencvSource {
    fn frame_count(&self) -> usize {
        self.total_frames
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        mat_to_rgb_image(&frame).map(Some)
    }
}

/// Convert an OpenCV Mat (BGR) to an RGB image buffer
fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage> {
    let mut rgb_mat = Mat::default();
    imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();
    ImageBuffer::from_vec(size.width as u32, size.height as u32, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))
}
