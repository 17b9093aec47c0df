use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct TrainConfig {
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub backbone_path: PathBuf,
    pub img_size: u32,
    pub batch_size: usize,
    pub epochs: usize,
    pub lr: f32,
    pub min_images_per_class: usize,
    /// Epochs without validation improvement before stopping.
    pub patience: usize,
    pub hidden: usize,
    pub seed: u64,
    pub test_fraction: f64,
    pub val_fraction: f64,
    pub lr_factor: f32,
    pub lr_patience: usize,
    pub augment: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("images/lfw-deepfunneled"),
            out_dir: PathBuf::from("."),
            backbone_path: PathBuf::from("models/resnet50_features.onnx"),
            img_size: 224,
            batch_size: 64,
            epochs: 30,
            lr: 0.0002,
            min_images_per_class: 20,
            patience: 6,
            hidden: 512,
            seed: 42,
            test_fraction: 0.2,
            val_fraction: 0.15,
            lr_factor: 0.5,
            lr_patience: 3,
            augment: true,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl TrainConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            data_dir: env::var("ROLLCALL_TRAIN_DATA").map(PathBuf::from).unwrap_or(d.data_dir),
            out_dir: env::var("ROLLCALL_TRAIN_OUT").map(PathBuf::from).unwrap_or(d.out_dir),
            backbone_path: env::var("ROLLCALL_TRAIN_BACKBONE").map(PathBuf::from).unwrap_or(d.backbone_path),
            img_size: parsed::<u32>("ROLLCALL_TRAIN_IMG_SIZE").filter(|&s| s >= 16).unwrap_or(d.img_size),
            batch_size: parsed::<usize>("ROLLCALL_TRAIN_BATCH").filter(|&b| b > 0).unwrap_or(d.batch_size),
            epochs: parsed("ROLLCALL_TRAIN_EPOCHS").unwrap_or(d.epochs),
            lr: parsed::<f32>("ROLLCALL_TRAIN_LR").filter(|&lr| lr > 0.0).unwrap_or(d.lr),
            min_images_per_class: parsed("ROLLCALL_TRAIN_MIN_IMAGES").unwrap_or(d.min_images_per_class),
            patience: parsed::<usize>("ROLLCALL_TRAIN_PATIENCE").filter(|&p| p > 0).unwrap_or(d.patience),
            hidden: parsed::<usize>("ROLLCALL_TRAIN_HIDDEN").filter(|&h| h > 0).unwrap_or(d.hidden),
            seed: parsed("ROLLCALL_TRAIN_SEED").unwrap_or(d.seed),
            augment: env::var("ROLLCALL_TRAIN_AUGMENT")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
                .unwrap_or(d.augment),
            ..d
        }
    }

    pub fn labels_path(&self) -> PathBuf {
        self.out_dir.join("labels.json")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.out_dir.join("face_classifier_head.json")
    }
}
