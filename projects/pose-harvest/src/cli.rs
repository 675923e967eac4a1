use crate::config::PoseParams;
use crate::pipeline::orchestrator::PipelineConfig;
use crate::pipeline::types::Device;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directories holding the input videos
    #[arg(
        long = "video-dir",
        env = "POSE_HARVEST_VIDEO_DIRS",
        value_delimiter = ',',
        required_unless_present = "print_params"
    )]
    pub video_dirs: Vec<PathBuf>,

    /// YOLO pose model (ONNX)
    #[arg(long, env = "POSE_HARVEST_MODEL", required_unless_present = "print_params")]
    pub model: Option<PathBuf>,

    /// Parameter file (`Key<TAB>Value` lines)
    #[arg(long, env = "POSE_HARVEST_PARAMS")]
    pub params: Option<PathBuf>,

    /// Devices to run on: cpu, gpu<N> or <N>. Repeat for several devices.
    #[arg(
        long = "device",
        env = "POSE_HARVEST_DEVICES",
        value_delimiter = ',',
        default_value = "cpu"
    )]
    pub devices: Vec<Device>,

    /// Frames per batch
    #[arg(long, env = "POSE_HARVEST_BATCH_SIZE", default_value_t = 256)]
    pub batch_size: usize,

    /// Batches buffered between stages
    #[arg(long, env = "POSE_HARVEST_QUEUE_BATCHES", default_value_t = 3)]
    pub queue_batches: usize,

    /// Encode workers per device (default: available cores - 1)
    #[arg(long, env = "POSE_HARVEST_ENCODE_WORKERS")]
    pub encode_workers: Option<usize>,

    /// Threads used to decode one frame's anchors (default: available cores)
    #[arg(long, env = "POSE_HARVEST_DECODE_CHUNKS")]
    pub decode_chunks: Option<usize>,

    /// Anchors in the model output
    #[arg(long, env = "POSE_HARVEST_ANCHORS", default_value_t = 8400)]
    pub anchors: usize,

    #[arg(long, env = "POSE_HARVEST_INPUT_WIDTH", default_value_t = 640)]
    pub input_width: usize,

    #[arg(long, env = "POSE_HARVEST_INPUT_HEIGHT", default_value_t = 640)]
    pub input_height: usize,

    /// Video file extension to pick up
    #[arg(long, env = "POSE_HARVEST_EXTENSION", default_value = "mp4")]
    pub extension: String,

    /// Descend into subdirectories
    #[arg(long)]
    pub recursive: bool,

    /// Skip writing the overlay video
    #[arg(long)]
    pub no_video: bool,

    /// Write the video without drawing poses
    #[arg(long)]
    pub no_overlay: bool,

    /// Print the effective parameters and exit
    #[arg(long)]
    pub print_params: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pipeline_config(&self, params: PoseParams) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            batch_size: self.batch_size,
            queue_batches: self.queue_batches,
            encode_workers: self.encode_workers.unwrap_or(defaults.encode_workers),
            decode_chunks: self.decode_chunks.unwrap_or(defaults.decode_chunks),
            anchors: self.anchors,
            input_width: self.input_width,
            input_height: self.input_height,
            extension: self.extension.clone(),
            recursive: self.recursive,
            write_video: !self.no_video,
            draw_overlay: !self.no_overlay,
            params: Arc::new(params),
        }
    }
}
