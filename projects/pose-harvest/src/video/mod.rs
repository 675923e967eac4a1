#[cfg(feature = "opencv")]
pub mod opencv_reader;
#[cfg(feature = "opencv")]
pub mod opencv_writer;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;

/// A decoded video stream yielding RGB frames.
pub trait FrameSource: Send {
    /// Frame count reported by the container; may be approximate.
    fn frame_count(&self) -> usize;
    fn fps(&self) -> f64;
    /// `Ok(None)` at end of stream. An `Err` only affects the current frame.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// An encoded video output accepting RGB frames.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;
    fn release(&mut self) -> Result<()>;
}

pub trait SourceFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

impl<F> SourceFactory for F
where
    F: Fn(&Path) -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        self(path)
    }
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path, fps: f64, width: u32, height: u32)
        -> Result<Box<dyn FrameSink>>;
}

impl<F> SinkFactory for F
where
    F: Fn(&Path, f64, u32, u32) -> Result<Box<dyn FrameSink>> + Send + Sync,
{
    fn create(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn FrameSink>> {
        self(path, fps, width, height)
    }
}
