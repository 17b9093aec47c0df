//! Face embedding extraction.
//!
//! The recognition model is a black box mapping a whole face image to a
//! fixed-length vector. Production uses a FaceNet (InceptionResnetV1,
//! VGGFace2 weights) export run through ONNX Runtime; tests plug in their own
//! [`FaceEmbedder`].

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::errors::AttendanceError;
use crate::pipeline::onnx;

pub const FACENET_INPUT_SIZE: u32 = 160;

pub trait FaceEmbedder: Send + Sync {
    /// Whether `embed` can currently succeed.
    fn is_ready(&self) -> bool;

    /// Embeds the whole image. The result is L2-normalized.
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>>;
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AttendanceError> {
    if bytes.is_empty() {
        return Err(AttendanceError::InvalidImage("empty upload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| AttendanceError::InvalidImage(e.to_string()))
}

/// Resize to 160x160, channel-first RGB, each value mapped to `(v/255 - 0.5) / 0.5`.
pub fn preprocess_facenet(image: &DynamicImage) -> ([i64; 4], Vec<f32>) {
    let size = FACENET_INPUT_SIZE;
    let resized = image.resize_exact(size, size, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();
    let mut data = Vec::with_capacity(3 * (size * size) as usize);
    for c in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let v = rgb.get_pixel(x, y)[c] as f32 / 255.0;
                data.push((v - 0.5) / 0.5);
            }
        }
    }
    ([1, 3, size as i64, size as i64], data)
}

/// Normalizes `v` in place and returns its original norm.
pub fn l2_normalize(v: &mut [f32]) -> f32 {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

pub struct OnnxEmbedder {
    pub model_path: PathBuf,
    download_url: Option<String>,
    auto_download: bool,
    session: Mutex<Option<Session>>,
}

impl OnnxEmbedder {
    pub fn new(model_path: PathBuf, download_url: Option<String>, auto_download: bool) -> Self {
        Self {
            model_path,
            download_url,
            auto_download,
            session: Mutex::new(None),
        }
    }

    /// Fetches the model if it is missing and allowed to, then loads it.
    /// Failures leave the embedder unloaded; requests then answer 503.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(dir) = self.model_path.parent() {
            std::fs::create_dir_all(dir).context("Failed to create models directory")?;
        }

        if !self.model_path.exists() {
            match (&self.download_url, self.auto_download) {
                (Some(url), true) => {
                    if let Err(e) = onnx::download_model(url, &self.model_path).await {
                        warn!("Embedding model auto-download failed: {}", e);
                    }
                }
                (None, true) => info!("No ROLLCALL_EMBED_MODEL_URL configured; expecting {:?}", self.model_path),
                (_, false) => info!("Embedding model auto-download disabled by user."),
            }
        }

        if let Err(e) = self.load() {
            warn!("Embedding model not loaded: {:#}", e);
        }
        Ok(())
    }

    pub fn load(&self) -> Result<()> {
        let session = onnx::load_session(&self.model_path)?;
        *self.session.lock() = Some(session);
        Ok(())
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn is_ready(&self) -> bool {
        self.session.lock().is_some()
    }

    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(AttendanceError::ModelNotLoaded)?;
        let (shape, data) = preprocess_facenet(image);
        let mut v = onnx::run_nchw(session, shape, data).context("FaceNet inference failed")?;
        let norm = l2_normalize(&mut v);
        if v.is_empty() || norm == 0.0 {
            return Err(AttendanceError::EmptyEmbedding.into());
        }
        debug!("embedding extracted: dim={}, norm={:.4}", v.len(), norm);
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn preprocess_shape_and_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([255, 0, 128])));
        let (shape, data) = preprocess_facenet(&img);
        assert_eq!(shape, [1, 3, 160, 160]);
        assert_eq!(data.len(), 3 * 160 * 160);
        // channel-first: red plane, then green, then blue
        assert!((data[0] - 1.0).abs() < 1e-6);
        assert!((data[160 * 160] + 1.0).abs() < 1e-6);
        assert!((data[2 * 160 * 160] - (128.0 / 255.0 - 0.5) / 0.5).abs() < 1e-6);
    }

    #[test]
    fn normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        let n = l2_normalize(&mut v);
        assert_eq!(n, 5.0);
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        assert_eq!(l2_normalize(&mut zero), 0.0);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_image(b""), Err(AttendanceError::InvalidImage(_))));
        assert!(matches!(decode_image(b"not an image"), Err(AttendanceError::InvalidImage(_))));
    }

    #[test]
    fn unloaded_embedder_reports_model_not_loaded() {
        let embedder = OnnxEmbedder::new(PathBuf::from("/nonexistent/model.onnx"), None, false);
        assert!(!embedder.is_ready());
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let err = embedder.embed(&img).unwrap_err();
        assert!(matches!(err.downcast_ref::<AttendanceError>(), Some(AttendanceError::ModelNotLoaded)));
        assert!(embedder.load().is_err());
    }
}
