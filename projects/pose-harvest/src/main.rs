mod cli;
mod config;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;

use anyhow::Result;
use cli::Args;
use config::PoseParams;
use pipeline::distributor;
use pipeline::orchestrator::Backends;
use pipeline::types::CancelToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    let params = match &args.params {
        Some(path) => PoseParams::load(path)?,
        None => PoseParams::default(),
    };
    if args.print_params {
        println!("{}", params.to_text());
        return Ok(());
    }

    let backends = backends(&args)?;
    let config = args.pipeline_config(params);

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, draining in-flight batches");
            on_signal.cancel();
        }
    });

    let video_dirs = args.video_dirs.clone();
    let devices = args.devices.clone();
    let summary = tokio::task::spawn_blocking(move || {
        distributor::run(&video_dirs, &devices, &config, &backends, cancel)
    })
    .await??;

    for (device, error) in &summary.failed_devices {
        tracing::error!("{} did not run: {}", device, error);
    }
    tracing::info!("Run summary: {}", serde_json::to_string(&summary)?);

    Ok(())
}

#[cfg(all(feature = "opencv", feature = "onnx"))]
fn backends(args: &Args) -> Result<Backends> {
    use anyhow::anyhow;
    use pipeline::detection::{InferenceEngine, OnnxEngine};
    use pipeline::types::Device;
    use std::path::Path;
    use std::sync::Arc;
    use video::opencv_reader::OpencvSource;
    use video::opencv_writer::OpencvSink;
    use video::{FrameSink, FrameSource};

    let model = args
        .model
        .clone()
        .ok_or_else(|| anyhow!("--model is required"))?;
    let (width, height) = (args.input_width, args.input_height);

    let sources = |path: &Path| -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(OpencvSource::open(path)?))
    };
    let sinks = |path: &Path, fps: f64, w: u32, h: u32| -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(OpencvSink::create(path, fps, w, h)?))
    };
    let engines = move |device: &Device| -> Result<Box<dyn InferenceEngine>> {
        Ok(Box::new(OnnxEngine::new(&model, device, width, height)?))
    };

    Ok(Backends {
        sources: Arc::new(sources),
        sinks: Arc::new(sinks),
        engines: Arc::new(engines),
    })
}

#[cfg(not(all(feature = "opencv", feature = "onnx")))]
fn backends(_args: &Args) -> Result<Backends> {
    anyhow::bail!("Built without video or model backends; rebuild with `--features opencv,onnx`")
}
