use std::path::Path;
use std::sync::Mutex;

use image::{Rgb, RgbImage};
use ndarray::{s, Array2, Array4};
use rollcall_backend::train::augment::eval_transform;
use rollcall_backend::train::backbone::FeatureExtractor;
use rollcall_backend::train::dataset::{scan_dataset, split_dataset, LabelEncoder, Splits};
use rollcall_backend::train::head::Checkpoint;
use rollcall_backend::train::{self, TrainConfig};
use tempfile::TempDir;

/// Per-channel means of the normalised input: enough signal to separate
/// solid-colour classes.
struct ChannelMeans;

impl FeatureExtractor for ChannelMeans {
    fn extract(&self, batch: &Array4<f32>) -> anyhow::Result<Array2<f32>> {
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

/// Wraps [`ChannelMeans`] and keeps every input image tensor it sees.
#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<Vec<f32>>>,
}

impl FeatureExtractor for Recording {
    fn extract(&self, batch: &Array4<f32>) -> anyhow::Result<Array2<f32>> {
        let mut seen = self.seen.lock().unwrap();
        for i in 0..batch.dim().0 {
            seen.push(batch.slice(s![i, .., .., ..]).iter().copied().collect());
        }
        ChannelMeans.extract(batch)
    }
}

fn splits_for(cfg: &TrainConfig) -> Splits {
    let dataset = scan_dataset(&cfg.data_dir, cfg.min_images_per_class).unwrap();
    split_dataset(dataset.samples, cfg.test_fraction, cfg.val_fraction, cfg.seed)
}

fn write_class(root: &Path, name: &str, color: [u8; 3], n: usize) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..n {
        // small per-image shade variation
        let shade = (i as u8).wrapping_mul(3);
        let px = [color[0].saturating_add(shade), color[1], color[2].saturating_sub(shade)];
        RgbImage::from_pixel(24, 24, Rgb(px))
            .save(dir.join(format!("{name}_{i:04}.png")))
            .unwrap();
    }
}

fn config(data: &Path, out: &Path) -> TrainConfig {
    TrainConfig {
        data_dir: data.to_path_buf(),
        out_dir: out.to_path_buf(),
        img_size: 16,
        batch_size: 8,
        epochs: 40,
        lr: 0.01,
        min_images_per_class: 5,
        hidden: 16,
        augment: false,
        ..TrainConfig::default()
    }
}

#[test]
fn test_trains_separable_classes() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("faces");
    let out = tmp.path().join("out");
    write_class(&data, "Red_Person", [220, 20, 20], 20);
    write_class(&data, "Green_Person", [20, 220, 20], 20);
    write_class(&data, "Blue_Person", [20, 20, 220], 20);
    write_class(&data, "Rare_Person", [128, 128, 128], 2);
    std::fs::write(data.join("Red_Person").join("broken.png"), b"not a png").unwrap();

    let cfg = config(&data, &out);
    let report = train::run(&cfg, &ChannelMeans).unwrap();

    assert_eq!(report.classes, 3);
    assert!(report.epochs_run >= 1 && report.epochs_run <= 40);
    assert!(report.test_accuracy > 90.0, "test accuracy {}", report.test_accuracy);
    assert!(report.best_val_loss.is_finite());

    let labels = LabelEncoder::load(&cfg.labels_path()).unwrap();
    assert_eq!(labels.classes, vec!["Blue_Person", "Green_Person", "Red_Person"]);

    let ckpt = Checkpoint::load(&report.checkpoint).unwrap();
    assert_eq!(ckpt.classes, labels.classes);
    assert_eq!(ckpt.feature_dim, 3);
    assert_eq!(ckpt.img_size, 16);
}

#[test]
fn test_augmented_run_writes_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("faces");
    let out = tmp.path().join("out");
    write_class(&data, "A", [220, 20, 20], 10);
    write_class(&data, "B", [20, 20, 220], 10);

    let cfg = TrainConfig { epochs: 3, augment: true, ..config(&data, &out) };
    let report = train::run(&cfg, &ChannelMeans).unwrap();
    assert!(report.epochs_run <= 3);
    assert!(cfg.checkpoint_path().exists());
}

#[test]
fn test_single_class_rejected() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("faces");
    write_class(&data, "Only_One", [220, 20, 20], 10);

    let cfg = config(&data, &tmp.path().join("out"));
    assert!(train::run(&cfg, &ChannelMeans).is_err());
}

#[test]
fn test_held_out_splits_see_eval_transform_only() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("faces");
    write_class(&data, "A", [220, 20, 20], 12);
    write_class(&data, "B", [20, 20, 220], 12);

    let cfg = TrainConfig { epochs: 3, augment: true, ..config(&data, &tmp.path().join("out")) };
    let recorder = Recording::default();
    train::run(&cfg, &recorder).unwrap();

    let splits = splits_for(&cfg);
    let seen = recorder.seen.into_inner().unwrap();
    for sample in splits.val.iter().chain(&splits.test) {
        let expected = eval_transform(&image::open(&sample.path).unwrap(), cfg.img_size);
        assert!(seen.contains(&expected), "{:?} was not evaluated with the eval transform", sample.path);
    }

    // training inputs are augmented, so at least one differs from its eval form
    let augmented = splits.train.iter().any(|sample| {
        let plain = eval_transform(&image::open(&sample.path).unwrap(), cfg.img_size);
        !seen.contains(&plain)
    });
    assert!(augmented);
}

#[test]
fn test_split_does_not_influence_model_selection() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("faces");
    write_class(&data, "A", [220, 20, 20], 15);
    write_class(&data, "B", [20, 20, 220], 15);

    let first_cfg = TrainConfig { epochs: 10, ..config(&data, &tmp.path().join("first")) };
    let first = train::run(&first_cfg, &ChannelMeans).unwrap();

    // repaint every test image so it no longer resembles its class
    let splits = splits_for(&first_cfg);
    assert!(!splits.test.is_empty());
    for sample in &splits.test {
        RgbImage::from_pixel(24, 24, Rgb([20, 220, 20])).save(&sample.path).unwrap();
    }

    let second_cfg = TrainConfig { out_dir: tmp.path().join("second"), ..first_cfg.clone() };
    let second = train::run(&second_cfg, &ChannelMeans).unwrap();

    assert_eq!(first.epochs_run, second.epochs_run);
    assert_eq!(first.best_val_loss, second.best_val_loss);
    assert_eq!(
        std::fs::read(&first.checkpoint).unwrap(),
        std::fs::read(&second.checkpoint).unwrap()
    );
}
