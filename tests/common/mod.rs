#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use rollcall_backend::errors::AttendanceError;
use rollcall_backend::pipeline::embed::{l2_normalize, FaceEmbedder};
use rollcall_backend::pipeline::matcher::StudentIndex;
use rollcall_backend::{db, AppPaths, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Embeds an image as its normalised mean colour, so solid-colour test
/// images of the same hue match and different hues do not.
pub struct ColorEmbedder;

impl FaceEmbedder for ColorEmbedder {
    fn is_ready(&self) -> bool {
        true
    }

    fn embed(&self, image: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        let rgb = image.to_rgb8();
        let n = (rgb.width() * rgb.height()).max(1) as f32;
        let mut v = vec![0f32; 3];
        for p in rgb.pixels() {
            for c in 0..3 {
                v[c] += p[c] as f32 / n;
            }
        }
        if l2_normalize(&mut v) == 0.0 {
            return Err(AttendanceError::EmptyEmbedding.into());
        }
        Ok(v)
    }
}

/// Stands in for a model that never finished loading.
pub struct UnloadedEmbedder;

impl FaceEmbedder for UnloadedEmbedder {
    fn is_ready(&self) -> bool {
        false
    }

    fn embed(&self, _image: &DynamicImage) -> anyhow::Result<Vec<f32>> {
        Err(AttendanceError::ModelNotLoaded.into())
    }
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(color)));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    buf
}

/// Create AppState for testing on a fresh data directory.
pub fn create_test_app_state(embedder: Arc<dyn FaceEmbedder>) -> (TempDir, Arc<AppState>) {
    let tmp = TempDir::new().unwrap();
    let paths = AppPaths::new(tmp.path().join("rollcall-data"), PathBuf::from(tmp.path()));
    paths.ensure_dirs().unwrap();
    let pool = db::create_pool(&paths.db_path, 4).unwrap();
    let state = Arc::new(AppState::new(paths, pool, 0.7, embedder, StudentIndex::new()));
    (tmp, state)
}

/// Serves the router on an ephemeral port and returns its base URL.
pub async fn spawn_server(state: Arc<AppState>) -> String {
    let app = rollcall_backend::api::routes::router(state);
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

pub fn image_part(bytes: Vec<u8>) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(bytes)
        .file_name("face.png")
        .mime_str("image/png")
        .unwrap()
}

pub async fn register(client: &reqwest::Client, base: &str, id: &str, name: &str, color: [u8; 3]) -> reqwest::Response {
    let form = reqwest::multipart::Form::new()
        .part("image", image_part(png_bytes(color)))
        .text("name", name.to_string())
        .text("student_id", id.to_string());
    client.post(format!("{}/register", base)).multipart(form).send().await.unwrap()
}

pub async fn post_image(client: &reqwest::Client, base: &str, route: &str, color: [u8; 3]) -> reqwest::Response {
    let form = reqwest::multipart::Form::new().part("image", image_part(png_bytes(color)));
    client.post(format!("{}{}", base, route)).multipart(form).send().await.unwrap()
}
