use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// Maps class names to contiguous indices in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut classes: Vec<String> = labels.into_iter().map(Into::into).collect();
        classes.sort();
        classes.dedup();
        Self { classes }
    }

    pub fn transform(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    pub fn inverse(&self, idx: usize) -> Option<&str> {
        self.classes.get(idx).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub struct FaceDataset {
    pub samples: Vec<Sample>,
    pub encoder: LabelEncoder,
    /// Images per class, indexed by encoded label.
    pub class_counts: Vec<usize>,
}

/// One class per subdirectory of `root`; classes with fewer than
/// `min_images_per_class` files are dropped.
pub fn scan_dataset(root: &Path, min_images_per_class: usize) -> Result<FaceDataset> {
    if !root.is_dir() {
        anyhow::bail!("Dataset directory {:?} does not exist", root);
    }
    let mut by_class: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut dropped = 0usize;
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let label = entry.file_name().to_string_lossy().to_string();
        let files: Vec<PathBuf> = WalkDir::new(entry.path())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        if files.len() < min_images_per_class {
            dropped += 1;
            continue;
        }
        by_class.insert(label, files);
    }

    let encoder = LabelEncoder::fit(by_class.keys().cloned());
    let mut samples = Vec::new();
    let mut class_counts = vec![0usize; encoder.len()];
    for (label, files) in by_class {
        let idx = encoder.transform(&label).context("label vanished from encoder")?;
        class_counts[idx] = files.len();
        samples.extend(files.into_iter().map(|path| Sample { path, label: idx }));
    }
    info!(
        "dataset {:?}: {} classes kept, {} dropped (< {} images), {} images",
        root,
        encoder.len(),
        dropped,
        min_images_per_class,
        samples.len()
    );
    Ok(FaceDataset { samples, encoder, class_counts })
}

/// Seeded shuffle-and-split. The held-out part gets `ceil(n * fraction)`
/// items but never all of them.
pub fn train_test_split<T>(mut items: Vec<T>, test_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let n = items.len();
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
    let mut n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test >= n {
        n_test = n.saturating_sub(1);
    }
    let test = items.split_off(n - n_test);
    (items, test)
}

pub struct Splits {
    pub train: Vec<Sample>,
    pub val: Vec<Sample>,
    pub test: Vec<Sample>,
}

/// Test split from everything, then validation from the remainder.
pub fn split_dataset(samples: Vec<Sample>, test_fraction: f64, val_fraction: f64, seed: u64) -> Splits {
    let (trainval, test) = train_test_split(samples, test_fraction, seed);
    let (train, val) = train_test_split(trainval, val_fraction, seed);
    Splits { train, val, test }
}

/// `1 / count` per class.
pub fn class_weights(class_counts: &[usize]) -> Vec<f32> {
    class_counts
        .iter()
        .map(|&c| if c == 0 { 0.0 } else { 1.0 / c as f32 })
        .collect()
}
