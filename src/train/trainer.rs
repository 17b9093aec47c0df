use anyhow::{Context, Result};
use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::augment::{eval_transform, train_transform};
use super::backbone::{infer_feature_dim, FeatureExtractor};
use super::config::TrainConfig;
use super::dataset::{class_weights, scan_dataset, split_dataset, Sample};
use super::head::{Checkpoint, ClassifierHead};
use super::loss::{argmax_rows, weighted_cross_entropy};
use super::optim::{Adam, EarlyStopping, ReduceLrOnPlateau, StopSignal};

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub classes: usize,
    pub train_images: usize,
    pub val_images: usize,
    pub test_images: usize,
    pub epochs_run: usize,
    pub early_stopped: bool,
    pub best_val_loss: f32,
    pub test_accuracy: f32,
    pub checkpoint: PathBuf,
}

/// Backbone features for a set of images, one row per image that decoded.
struct FeatureBatch {
    features: Array2<f32>,
    labels: Vec<usize>,
}

fn load_tensor(path: &Path, size: u32, augment_seed: Option<u64>) -> Option<Vec<f32>> {
    let img = match image::open(path) {
        Ok(i) => i,
        Err(e) => {
            warn!("skipping unreadable image {:?}: {}", path, e);
            return None;
        }
    };
    Some(match augment_seed {
        Some(seed) => train_transform(&img, size, &mut StdRng::seed_from_u64(seed)),
        None => eval_transform(&img, size),
    })
}

/// Per-sample augmentation seed, stable across runs for a given epoch.
fn sample_seed(base: u64, epoch: usize, idx: usize) -> u64 {
    base ^ ((epoch as u64) << 32) ^ idx as u64
}

fn extract_batch(
    extractor: &dyn FeatureExtractor,
    samples: &[Sample],
    indices: &[usize],
    cfg: &TrainConfig,
    augment_epoch: Option<usize>,
) -> Result<Option<FeatureBatch>> {
    let size = cfg.img_size;
    let loaded: Vec<(Vec<f32>, usize)> = indices
        .par_iter()
        .filter_map(|&i| {
            let sample = &samples[i];
            let seed = augment_epoch.map(|e| sample_seed(cfg.seed, e, i));
            load_tensor(&sample.path, size, seed).map(|t| (t, sample.label))
        })
        .collect();
    if loaded.is_empty() {
        return Ok(None);
    }

    let s = size as usize;
    let n = loaded.len();
    let mut data = Vec::with_capacity(n * 3 * s * s);
    let mut labels = Vec::with_capacity(n);
    for (tensor, label) in loaded {
        data.extend_from_slice(&tensor);
        labels.push(label);
    }
    let input = Array4::from_shape_vec((n, 3, s, s), data).context("assembling image batch")?;
    let features = extractor.extract(&input)?;
    if features.nrows() != n {
        anyhow::bail!("extractor returned {} rows for {} images", features.nrows(), n);
    }
    Ok(Some(FeatureBatch { features, labels }))
}

/// Eval-transform features for a whole split, computed once and reused
/// every epoch since the backbone is frozen.
fn cache_features(
    extractor: &dyn FeatureExtractor,
    samples: &[Sample],
    cfg: &TrainConfig,
    split: &str,
) -> Result<Vec<FeatureBatch>> {
    let started = Instant::now();
    let all: Vec<usize> = (0..samples.len()).collect();
    let mut batches = Vec::new();
    for chunk in all.chunks(cfg.batch_size) {
        if let Some(b) = extract_batch(extractor, samples, chunk, cfg, None)? {
            batches.push(b);
        }
    }
    let images: usize = batches.iter().map(|b| b.labels.len()).sum();
    info!("cached {} features for {} images in {:.1?}", split, images, started.elapsed());
    Ok(batches)
}

/// Mean of per-batch losses weighted by batch size, plus accuracy in percent.
fn evaluate(head: &ClassifierHead, batches: &[FeatureBatch], weights: &[f32]) -> (f32, f32) {
    let mut loss_sum = 0f32;
    let mut correct = 0usize;
    let mut total = 0usize;
    for b in batches {
        let logits = head.logits(b.features.view());
        let (loss, _) = weighted_cross_entropy(logits.view(), &b.labels, weights);
        loss_sum += loss * b.labels.len() as f32;
        correct += argmax_rows(logits.view())
            .iter()
            .zip(&b.labels)
            .filter(|(p, y)| p == y)
            .count();
        total += b.labels.len();
    }
    if total == 0 {
        return (f32::INFINITY, 0.0);
    }
    (loss_sum / total as f32, 100.0 * correct as f32 / total as f32)
}

fn accuracy(ckpt: &Checkpoint, batches: &[FeatureBatch]) -> f32 {
    let mut correct = 0usize;
    let mut total = 0usize;
    for b in batches {
        let preds = ckpt.head.predict(b.features.view());
        correct += preds.iter().zip(&b.labels).filter(|(p, y)| p == y).count();
        total += b.labels.len();
    }
    if total == 0 {
        0.0
    } else {
        100.0 * correct as f32 / total as f32
    }
}

pub fn run(cfg: &TrainConfig, extractor: &dyn FeatureExtractor) -> Result<TrainReport> {
    let dataset = scan_dataset(&cfg.data_dir, cfg.min_images_per_class)?;
    if dataset.encoder.len() < 2 {
        anyhow::bail!(
            "need at least 2 classes with >= {} images, found {}",
            cfg.min_images_per_class,
            dataset.encoder.len()
        );
    }
    std::fs::create_dir_all(&cfg.out_dir).with_context(|| format!("Failed to create {:?}", cfg.out_dir))?;
    dataset.encoder.save(&cfg.labels_path())?;
    info!("saved {} labels to {:?}", dataset.encoder.len(), cfg.labels_path());

    let weights = class_weights(&dataset.class_counts);
    let splits = split_dataset(dataset.samples, cfg.test_fraction, cfg.val_fraction, cfg.seed);
    if splits.train.is_empty() || splits.val.is_empty() || splits.test.is_empty() {
        anyhow::bail!(
            "not enough images to split (train {}, val {}, test {})",
            splits.train.len(),
            splits.val.len(),
            splits.test.len()
        );
    }
    info!("split: train {}, val {}, test {}", splits.train.len(), splits.val.len(), splits.test.len());

    let feature_dim = infer_feature_dim(extractor, cfg.img_size)?;
    info!("backbone feature dim {}", feature_dim);

    let val_batches = cache_features(extractor, &splits.val, cfg, "val")?;
    let test_batches = cache_features(extractor, &splits.test, cfg, "test")?;
    // Without augmentation the train features never change either.
    let train_cache = if cfg.augment {
        None
    } else {
        Some(cache_features(extractor, &splits.train, cfg, "train")?)
    };

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut head = ClassifierHead::new(feature_dim, cfg.hidden, dataset.encoder.len(), &mut rng);
    let mut opt = Adam::new(cfg.lr);
    let mut scheduler = ReduceLrOnPlateau::new(cfg.lr_factor, cfg.lr_patience);
    let mut stopper = EarlyStopping::new(cfg.patience);
    let checkpoint_path = cfg.checkpoint_path();

    let mut order: Vec<usize> = (0..splits.train.len()).collect();
    let mut epochs_run = 0;
    let mut early_stopped = false;
    for epoch in 0..cfg.epochs {
        let started = Instant::now();
        let mut loss_sum = 0f32;
        let mut seen = 0usize;

        let mut step = |batch: &FeatureBatch, head: &mut ClassifierHead| {
            let (logits, cache) = head.forward(batch.features.view());
            let (loss, dlogits) = weighted_cross_entropy(logits.view(), &batch.labels, &weights);
            let grads = head.backward(&cache, dlogits.view());
            opt.step(head.params_mut(), &grads.into_dyn());
            loss_sum += loss * batch.labels.len() as f32;
            seen += batch.labels.len();
        };

        match &train_cache {
            Some(batches) => {
                let mut batch_order: Vec<usize> = (0..batches.len()).collect();
                batch_order.shuffle(&mut rng);
                for bi in batch_order {
                    step(&batches[bi], &mut head);
                }
            }
            None => {
                order.shuffle(&mut rng);
                for chunk in order.chunks(cfg.batch_size) {
                    if let Some(batch) = extract_batch(extractor, &splits.train, chunk, cfg, Some(epoch))? {
                        step(&batch, &mut head);
                    }
                }
            }
        }
        epochs_run = epoch + 1;

        let train_loss = if seen > 0 { loss_sum / seen as f32 } else { f32::NAN };
        let (val_loss, val_acc) = evaluate(&head, &val_batches, &weights);
        info!(
            "Epoch {}/{}, Train Loss: {:.4}, Val Loss: {:.4}, Val Acc: {:.2}%",
            epoch + 1,
            cfg.epochs,
            train_loss,
            val_loss,
            val_acc
        );
        debug!("epoch {} took {:.1?}, lr {:e}", epoch + 1, started.elapsed(), opt.lr);

        if let Some(lr) = scheduler.step(val_loss, &mut opt) {
            info!("reducing learning rate to {:e}", lr);
        }
        match stopper.update(val_loss) {
            StopSignal::Improved => {
                let ckpt = Checkpoint {
                    classes: dataset.encoder.classes.clone(),
                    img_size: cfg.img_size,
                    feature_dim,
                    head: head.clone(),
                };
                ckpt.save(&checkpoint_path)?;
                debug!("saved checkpoint to {:?}", checkpoint_path);
            }
            StopSignal::Wait(n) => debug!("no improvement for {} epoch(s)", n),
            StopSignal::Stop => {
                info!("Early stopping triggered.");
                early_stopped = true;
                break;
            }
        }
    }

    let best = Checkpoint::load(&checkpoint_path)
        .with_context(|| format!("no checkpoint written to {:?}", checkpoint_path))?;
    let test_accuracy = accuracy(&best, &test_batches);
    info!("Model test accuracy: {:.2}%", test_accuracy);

    Ok(TrainReport {
        classes: dataset.encoder.len(),
        train_images: splits.train.len(),
        val_images: splits.val.len(),
        test_images: test_batches.iter().map(|b| b.labels.len()).sum(),
        epochs_run,
        early_stopped,
        best_val_loss: stopper.best(),
        test_accuracy,
        checkpoint: checkpoint_path,
    })
}
