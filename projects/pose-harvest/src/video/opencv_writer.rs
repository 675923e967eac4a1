use super::FrameSink;
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use opencv::{
    core::{Mat, Scalar, Size, CV_8UC3},
    imgproc,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::Path;

/// mp4v writer fed with RGB frames; converts to BGR for OpenCV.
pub struct OpencvSink {
    writer: VideoWriter,
    width: u32,
    height: u32,
}

impl OpencvSink {
    pub fn create(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("Non UTF-8 output path: {:?}", path))?;
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            path_str,
            fourcc,
            fps,
            Size::new(width as i32, height as i32),
            true,
        )
        .with_context(|| format!("Failed to create video writer at: '{}'", path_str))?;
        if !writer.is_opened()? {
            return Err(anyhow!("Failed to open video writer: {}", path_str));
        }

        tracing::info!(
            "OpencvSink: writing {} ({}x{} @ {:.2} fps)",
            path_str,
            width,
            height,
            fps
        );
        Ok(Self {
            writer,
            width,
            height,
        })
    }
}

impl FrameSink for OpencvSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(anyhow!(
                "Frame size {}x{} does not match writer size {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let mut rgb = Mat::new_rows_cols_with_default(
            self.height as i32,
            self.width as i32,
            CV_8UC3,
            Scalar::all(0.0),
        )?;
        rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());

        let mut bgr = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
        self.writer.write(&bgr)?;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}
