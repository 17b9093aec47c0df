use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use tracing::{info, warn};

// Output names commonly used by exported face/backbone models.
const PREFERRED_OUTPUTS: &[&str] = &["embedding", "embeddings", "output", "features", "fc1"];

pub fn load_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        anyhow::bail!("ONNX model missing at {:?}", model_path);
    }
    let session = Session::builder()?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to create ONNX session from {:?}", model_path))?;
    info!("ONNX model loaded: {:?}", model_path);
    Ok(session)
}

/// Runs a single NCHW float tensor through `session` and returns the flat
/// contents of its float output.
pub fn run_nchw(session: &mut Session, shape: [i64; 4], data: Vec<f32>) -> Result<Vec<f32>> {
    let input_name = session.inputs[0].name.clone();
    let input = Value::from_array((shape.to_vec(), data)).context("Failed to create input tensor")?;
    let outputs = session
        .run(ort::inputs![input_name => input])
        .context("ONNX inference failed")?;

    let mut output_key: Option<&str> = None;
    for k in outputs.keys() {
        if PREFERRED_OUTPUTS.contains(&k) {
            output_key = Some(k);
            break;
        }
    }
    if output_key.is_none() {
        if let Some(first_key) = outputs.keys().next() {
            warn!("Using first available output key '{}'", first_key);
            output_key = Some(first_key);
        }
    }
    let key = output_key.context("Model produced no outputs")?;
    let val = outputs.get(key).context("Output vanished while reading")?;
    let (_, slice) = val
        .try_extract_tensor::<f32>()
        .with_context(|| format!("Failed to extract float tensor from output '{}'", key))?;
    Ok(slice.to_vec())
}

fn create_http_client() -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if !token.is_empty() {
            info!("Using Hugging Face token for model download.");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
    }
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("Failed to create HTTP client")
}

pub async fn download_model(url: &str, path: &Path) -> Result<()> {
    let client = create_http_client()?;
    info!("Downloading model from {} ...", url);
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download model from {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read response body")?;

    // ONNX files are never this small; an HTML error page usually is.
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded file is suspiciously small ({} bytes), may be corrupted", bytes.len());
    }

    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("Failed to write file: {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {:?} into place", tmp))?;

    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}
