// Pipeline orchestrator: wires the stage workers of one device together
//
// reader -> encode (N workers) -> detect -> feature -> report writer
//                                                    \-> video writer

use crate::config::PoseParams;
use crate::pipeline::dedup::DedupEngine;
use crate::pipeline::detection::EngineFactory;
use crate::pipeline::encode::SequenceGate;
use crate::pipeline::feature::FeatureConfig;
use crate::pipeline::reader::ReaderControl;
use crate::pipeline::types::{CancelToken, Device, DeviceState, FrameBatch, JobTracker};
use crate::video::{SinkFactory, SourceFactory};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Pipeline settings shared by every device.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// Capacity, in batches, of each inter-stage channel.
    pub queue_batches: usize,
    pub encode_workers: usize,
    pub decode_chunks: usize,
    pub anchors: usize,
    pub input_width: usize,
    pub input_height: usize,
    pub extension: String,
    pub recursive: bool,
    pub write_video: bool,
    pub draw_overlay: bool,
    pub params: Arc<PoseParams>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            batch_size: 256,
            queue_batches: 3,
            encode_workers: cores.saturating_sub(1).max(1),
            decode_chunks: cores.max(1),
            anchors: 8400,
            input_width: 640,
            input_height: 640,
            extension: "mp4".to_string(),
            recursive: false,
            write_video: true,
            draw_overlay: true,
            params: Arc::new(PoseParams::default()),
        }
    }
}

/// Pluggable video and model backends.
#[derive(Clone)]
pub struct Backends {
    pub sources: Arc<dyn SourceFactory>,
    pub sinks: Arc<dyn SinkFactory>,
    pub engines: Arc<dyn EngineFactory>,
}

/// Stage threads of one device, long-lived across files.
pub struct DevicePipeline {
    pub state: Arc<DeviceState>,
    handles: Vec<JoinHandle<()>>,
}

impl DevicePipeline {
    /// Creates the device's engine and spawns every stage. Fails, leaving the
    /// state marked inactive, when the engine cannot be created.
    pub fn start(
        device: Device,
        config: &PipelineConfig,
        backends: &Backends,
        paths: Receiver<PathBuf>,
        tracker: Arc<JobTracker>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let state = Arc::new(DeviceState::new(device));
        let engine = match backends
            .engines
            .create(&device)
            .with_context(|| format!("Failed to create inference engine on {}", device))
        {
            Ok(engine) => engine,
            Err(e) => {
                state.fail(format!("{:#}", e));
                return Err(e);
            }
        };

        let queue = config.queue_batches.max(1);
        let (tx_read, rx_read) = channel::bounded::<FrameBatch>(queue);
        let (tx_enc, rx_enc) = channel::bounded::<FrameBatch>(queue);
        let (tx_det, rx_det) = channel::bounded::<FrameBatch>(queue);
        let (tx_report, rx_report) = channel::bounded::<FrameBatch>(queue);
        let (tx_video, rx_video) = if config.write_video {
            let (tx, rx) = channel::bounded::<FrameBatch>(queue);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut handles = Vec::new();

        // Spawn 1: Reader
        let control = ReaderControl {
            paths,
            sources: backends.sources.clone(),
            tracker,
            cancel,
            extension: config.extension.clone(),
            batch_size: config.batch_size,
        };
        let state_r = state.clone();
        handles.push(thread::spawn(move || {
            tracing::info!("{}: reader started", state_r.device);
            match crate::pipeline::reader::read_worker(tx_read, state_r.clone(), control) {
                Ok(batches) => {
                    tracing::info!("{}: reader finished after {} batches", state_r.device, batches)
                }
                Err(e) => tracing::error!("Reader worker failed: {}", e),
            }
        }));

        // Spawn 2: Encode workers
        let gate = Arc::new(SequenceGate::new(0));
        for _ in 0..config.encode_workers.max(1) {
            let rx = rx_read.clone();
            let tx = tx_enc.clone();
            let gate = gate.clone();
            let state_e = state.clone();
            let (width, height) = (config.input_width, config.input_height);
            handles.push(thread::spawn(move || {
                if let Err(e) =
                    crate::pipeline::encode::encode_worker(rx, tx, gate, width, height, state_e)
                {
                    tracing::error!("Encode worker failed: {}", e);
                }
            }));
        }
        drop(rx_read);
        drop(tx_enc);

        // Spawn 3: Detection
        let state_d = state.clone();
        handles.push(thread::spawn(move || {
            if let Err(e) =
                crate::pipeline::detection_worker::detection_worker(rx_enc, tx_det, engine, state_d)
            {
                tracing::error!("Detection worker failed: {}", e);
            }
        }));

        // Spawn 4: Feature extraction
        let feature_config = FeatureConfig {
            dedup: DedupEngine::new(config.params.clone(), config.anchors, config.decode_chunks),
            draw_overlay: config.draw_overlay,
        };
        let state_f = state.clone();
        handles.push(thread::spawn(move || {
            if let Err(e) = crate::pipeline::feature::feature_worker(
                rx_det,
                tx_report,
                tx_video,
                feature_config,
                state_f,
            ) {
                tracing::error!("Feature worker failed: {}", e);
            }
        }));

        // Spawn 5: Finalize
        let levels = config.params.levels.clone();
        let state_w = state.clone();
        handles.push(thread::spawn(move || {
            if let Err(e) = crate::pipeline::finalize::report_worker(rx_report, levels, state_w) {
                tracing::error!("Report worker failed: {}", e);
            }
        }));
        if let Some(rx_video) = rx_video {
            let sinks = backends.sinks.clone();
            handles.push(thread::spawn(move || {
                if let Err(e) = crate::pipeline::finalize::video_worker(rx_video, sinks) {
                    tracing::error!("Video worker failed: {}", e);
                }
            }));
        }

        Ok(Self { state, handles })
    }

    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    /// Waits for every stage to drain and marks the device inactive.
    pub fn join(self) -> Arc<DeviceState> {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("{}: a stage thread panicked", self.state.device);
            }
        }
        self.state.is_active.store(false, Ordering::Relaxed);
        self.state
    }
}
