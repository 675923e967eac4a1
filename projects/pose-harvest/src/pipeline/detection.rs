use crate::pipeline::types::Device;
use anyhow::Result;

/// A pose model bound to one device. Input is a planar `1 x 3 x H x W` RGB tensor
/// in 0..1, output is the raw channel-major anchor array.
pub trait InferenceEngine: Send {
    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>>;
}

/// Creates one engine per device pipeline.
pub trait EngineFactory: Send + Sync {
    fn create(&self, device: &Device) -> Result<Box<dyn InferenceEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&Device) -> Result<Box<dyn InferenceEngine>> + Send + Sync,
{
    fn create(&self, device: &Device) -> Result<Box<dyn InferenceEngine>> {
        self(device)
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;

#[cfg(feature = "onnx")]
mod onnx {
    use super::InferenceEngine;
    use crate::pipeline::types::Device;
    use anyhow::{anyhow, Context, Result};
    use ort::execution_providers::CUDAExecutionProvider;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;

    /// ONNX Runtime session for a YOLO pose model.
    pub struct OnnxEngine {
        session: Session,
        input_name: String,
        width: usize,
        height: usize,
    }

    impl OnnxEngine {
        pub fn new(
            model_path: &Path,
            device: &Device,
            width: usize,
            height: usize,
        ) -> Result<Self> {
            let builder =
                Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
            let builder = match device {
                Device::Cpu => builder,
                Device::Gpu(id) => builder.with_execution_providers([
                    CUDAExecutionProvider::default()
                        .with_device_id(*id as i32)
                        .build()
                        .error_on_failure(),
                ])?,
            };
            let session = builder.commit_from_file(model_path).with_context(|| {
                format!("Failed to load ONNX model {:?} on {}", model_path, device)
            })?;

            let input_name = session
                .inputs
                .first()
                .map(|input| input.name.clone())
                .ok_or_else(|| anyhow!("Model {:?} declares no inputs", model_path))?;

            tracing::info!(
                "Loaded {:?} on {} (input '{}')",
                model_path,
                device,
                input_name
            );
            Ok(Self {
                session,
                input_name,
                width,
                height,
            })
        }
    }

    impl InferenceEngine for OnnxEngine {
        fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
            let shape = [1usize, 3, self.height, self.width];
            let tensor = Tensor::from_array((shape, input.to_vec()))?;
            let outputs = self
                .session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .context("Pose inference failed")?;
            let (_, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .context("Failed to extract pose output")?;
            Ok(data.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Doubler;

    impl InferenceEngine for Doubler {
        fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
            Ok(input.iter().map(|v| v * 2.0).collect())
        }
    }

    #[test]
    fn test_closure_factory() {
        let factory = |device: &Device| -> Result<Box<dyn InferenceEngine>> {
            match device {
                Device::Cpu => Ok(Box::new(Doubler)),
                Device::Gpu(id) => Err(anyhow!("no GPU{}", id)),
            }
        };
        let factory: &dyn EngineFactory = &factory;

        let mut engine = factory.create(&Device::Cpu).unwrap();
        assert_eq!(engine.infer(&[1.0, 2.5]).unwrap(), vec![2.0, 5.0]);
        assert!(factory.create(&Device::Gpu(1)).is_err());
    }
}
