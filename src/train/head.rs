use anyhow::{Context, Result};
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMutD, ArrayD, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::loss::{argmax_rows, softmax};

/// Trainable part of the classifier: dense + ReLU, then a linear layer with
/// one output per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierHead {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,
}

/// Activations kept from the forward pass for backprop.
pub struct ForwardCache {
    input: Array2<f32>,
    pre_act: Array2<f32>,
    hidden: Array2<f32>,
}

pub struct HeadGrads {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,
}

impl HeadGrads {
    pub fn into_dyn(self) -> Vec<ArrayD<f32>> {
        vec![self.w1.into_dyn(), self.b1.into_dyn(), self.w2.into_dyn(), self.b2.into_dyn()]
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), bound: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn(shape, || rng.gen_range(-bound..bound))
}

impl ClassifierHead {
    /// He-uniform for the ReLU layer; `1/sqrt(fan_in)` for the output layer and biases.
    pub fn new<R: Rng + ?Sized>(in_dim: usize, hidden: usize, classes: usize, rng: &mut R) -> Self {
        let he = (6.0 / in_dim.max(1) as f32).sqrt();
        let b_in = 1.0 / (in_dim.max(1) as f32).sqrt();
        let b_hidden = 1.0 / (hidden.max(1) as f32).sqrt();
        Self {
            w1: uniform(rng, (in_dim, hidden), he),
            b1: Array1::from_shape_simple_fn(hidden, || rng.gen_range(-b_in..b_in)),
            w2: uniform(rng, (hidden, classes), b_hidden),
            b2: Array1::from_shape_simple_fn(classes, || rng.gen_range(-b_hidden..b_hidden)),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> (Array2<f32>, ForwardCache) {
        let pre_act = x.dot(&self.w1) + &self.b1;
        let hidden = pre_act.mapv(|v| v.max(0.0));
        let logits = hidden.dot(&self.w2) + &self.b2;
        (logits, ForwardCache { input: x.to_owned(), pre_act, hidden })
    }

    pub fn logits(&self, x: ArrayView2<f32>) -> Array2<f32> {
        self.forward(x).0
    }

    pub fn backward(&self, cache: &ForwardCache, dlogits: ArrayView2<f32>) -> HeadGrads {
        let w2 = cache.hidden.t().dot(&dlogits);
        let b2 = dlogits.sum_axis(Axis(0));
        let mut dhidden = dlogits.dot(&self.w2.t());
        ndarray::Zip::from(&mut dhidden)
            .and(&cache.pre_act)
            .for_each(|g, &z| {
                if z <= 0.0 {
                    *g = 0.0;
                }
            });
        let w1 = cache.input.t().dot(&dhidden);
        let b1 = dhidden.sum_axis(Axis(0));
        HeadGrads { w1, b1, w2, b2 }
    }

    /// Parameters in the same order as [`HeadGrads::into_dyn`].
    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.w1.view_mut().into_dyn(),
            self.b1.view_mut().into_dyn(),
            self.w2.view_mut().into_dyn(),
            self.b2.view_mut().into_dyn(),
        ]
    }

    pub fn predict(&self, x: ArrayView2<f32>) -> Vec<usize> {
        argmax_rows(self.logits(x).view())
    }
}

/// What the trainer writes: the head plus enough context to reuse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub classes: Vec<String>,
    pub img_size: u32,
    pub feature_dim: usize,
    pub head: ClassifierHead,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.part");
        std::fs::write(&tmp, serde_json::to_vec(self)?).with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", tmp))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let ckpt: Self = serde_json::from_slice(&bytes).context("Malformed checkpoint")?;
        if ckpt.head.num_classes() != ckpt.classes.len() || ckpt.head.in_dim() != ckpt.feature_dim {
            anyhow::bail!("checkpoint {:?} has inconsistent dimensions", path);
        }
        Ok(ckpt)
    }

    /// Best class name and its probability for each feature row.
    pub fn classify(&self, features: ArrayView2<f32>) -> Vec<(String, f32)> {
        let probs = softmax(self.head.logits(features).view());
        argmax_rows(probs.view())
            .into_iter()
            .enumerate()
            .map(|(i, j)| (self.classes.get(j).cloned().unwrap_or_default(), probs[[i, j]]))
            .collect()
    }
}
