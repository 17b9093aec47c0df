use anyhow::{Context, Result};
use ndarray::{s, Array2, Array4};
use ort::session::Session;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{info, warn};

use crate::pipeline::onnx::{load_session, run_nchw};

/// Frozen feature extractor: NCHW batch in, one feature row per image out.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, batch: &Array4<f32>) -> Result<Array2<f32>>;
}

pub struct OnnxBackbone {
    session: Mutex<Session>,
}

impl OnnxBackbone {
    pub fn load(path: &Path) -> Result<Self> {
        let session = load_session(path)?;
        info!("backbone ready: {:?}", path);
        Ok(Self { session: Mutex::new(session) })
    }

    fn run(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        let (n, c, h, w) = batch.dim();
        let shape = [n as i64, c as i64, h as i64, w as i64];
        let data: Vec<f32> = batch.iter().copied().collect();
        let flat = run_nchw(&mut self.session.lock(), shape, data)?;
        if n == 0 || flat.len() % n != 0 {
            anyhow::bail!("backbone returned {} values for a batch of {}", flat.len(), n);
        }
        Array2::from_shape_vec((n, flat.len() / n), flat).context("reshaping backbone output")
    }
}

impl FeatureExtractor for OnnxBackbone {
    fn extract(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        match self.run(batch) {
            Ok(f) => Ok(f),
            // Some exports pin the batch dimension to 1.
            Err(e) if batch.dim().0 > 1 => {
                warn!("batched backbone run failed ({:#}); falling back to one image at a time", e);
                let mut rows = Vec::with_capacity(batch.dim().0);
                for i in 0..batch.dim().0 {
                    let single = batch.slice(s![i..i + 1, .., .., ..]).to_owned();
                    rows.push(self.run(&single)?);
                }
                let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
                ndarray::concatenate(ndarray::Axis(0), &views).context("stacking per-image features")
            }
            Err(e) => Err(e),
        }
    }
}

/// Feature width, found by pushing one zero image through the extractor.
pub fn infer_feature_dim(extractor: &dyn FeatureExtractor, img_size: u32) -> Result<usize> {
    let s = img_size as usize;
    let blank = Array4::<f32>::zeros((1, 3, s, s));
    let out = extractor.extract(&blank)?;
    let dim = out.ncols();
    if dim == 0 {
        anyhow::bail!("backbone produced an empty feature vector");
    }
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MeanPool;

    impl FeatureExtractor for MeanPool {
        fn extract(&self, batch: &Array4<f32>) -> Result<Array2<f32>> {
            let n = batch.dim().0;
            let mut out = Array2::zeros((n, 3));
            for i in 0..n {
                for c in 0..3 {
                    out[[i, c]] = batch.slice(s![i, c, .., ..]).mean().unwrap_or(0.0);
                }
            }
            Ok(out)
        }
    }

    #[test]
    fn infers_width_from_blank_batch() {
        assert_eq!(infer_feature_dim(&MeanPool, 8).unwrap(), 3);
    }

    #[test]
    fn missing_model_fails_to_load() {
        assert!(OnnxBackbone::load(Path::new("/nope/backbone.onnx")).is_err());
    }
}
