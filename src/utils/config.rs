use std::env;
use std::path::PathBuf;

pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    pub threshold: f32,
    pub static_dir: PathBuf,
    pub embed_model: String,
    pub embed_model_url: Option<String>,
    pub auto_download: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("ROLLCALL_DATA").unwrap_or_else(|_| "./rollcall-data".to_string());
        let port = env::var("ROLLCALL_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(5000);
        let threshold = env::var("ROLLCALL_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .filter(|t| (-1.0..=1.0).contains(t))
            .unwrap_or(DEFAULT_MATCH_THRESHOLD);
        let static_dir = env::var("ROLLCALL_STATIC").unwrap_or_else(|_| ".".to_string());
        let embed_model = env::var("ROLLCALL_EMBED_MODEL").unwrap_or_else(|_| "facenet_vggface2.onnx".to_string());
        let embed_model_url = env::var("ROLLCALL_EMBED_MODEL_URL").ok().filter(|u| !u.is_empty());
        let auto_download = env::var("ROLLCALL_AUTO_DOWNLOAD")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE"))
            .unwrap_or(true);
        Self {
            data: PathBuf::from(data),
            port,
            threshold,
            static_dir: PathBuf::from(static_dir),
            embed_model,
            embed_model_url,
            auto_download,
        }
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data.join("models")
    }
}
