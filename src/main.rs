use std::net::SocketAddr;
use std::sync::Arc;
use rollcall_backend::pipeline::embed::{FaceEmbedder, OnnxEmbedder};
use rollcall_backend::utils::config::Config;
use rollcall_backend::utils::logging;
use rollcall_backend::{db, AppPaths, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();
    let paths = AppPaths::new(cfg.data.clone(), cfg.static_dir.clone());
    paths.ensure_dirs()?;

    let pool = db::create_pool(&paths.db_path, 8)?;
    let index = rollcall_backend::load_index(&pool)?;
    info!("loaded {} registered students from {:?}", index.len(), paths.db_path);

    let embedder = Arc::new(OnnxEmbedder::new(
        cfg.models_dir().join(&cfg.embed_model),
        cfg.embed_model_url.clone(),
        cfg.auto_download,
    ));
    // Load (and possibly download) the model in the background; requests
    // answer 503 until it is ready.
    {
        let embedder = embedder.clone();
        tokio::spawn(async move {
            if let Err(e) = embedder.initialize().await {
                tracing::error!("Failed to initialize embedding model: {}", e);
            }
        });
    }

    let embedder: Arc<dyn FaceEmbedder> = embedder;
    let state = Arc::new(AppState::new(paths, pool, cfg.threshold, embedder, index));
    info!("match threshold {:.2}", state.threshold);

    let app = rollcall_backend::api::routes::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening" = %addr);
    axum::serve(listener, app).await?;
    Ok(())
}
