//! Offline fine-tuning of a face classifier on a folder-per-person dataset.
//!
//! The pretrained backbone stays frozen behind [`backbone::FeatureExtractor`];
//! only the dense head is trained.

pub mod augment;
pub mod backbone;
pub mod config;
pub mod dataset;
pub mod head;
pub mod loss;
pub mod optim;
pub mod trainer;

pub use config::TrainConfig;
pub use trainer::{run, TrainReport};
