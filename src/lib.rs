pub mod utils;
pub mod errors;
pub mod stats;
pub mod models;
pub mod db;
pub mod ledger;
pub mod pipeline;
pub mod api;
pub mod train;

use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::pipeline::embed::FaceEmbedder;
use crate::pipeline::matcher::StudentIndex;

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub data: PathBuf,
    pub db_path: PathBuf,
    pub registered: PathBuf,
    pub attendance: PathBuf,
    pub models: PathBuf,
    pub static_dir: PathBuf,
}

impl AppPaths {
    pub fn new(data: PathBuf, static_dir: PathBuf) -> Self {
        Self {
            db_path: data.join("db").join("rollcall.db"),
            registered: data.join("registered_students"),
            attendance: data.join("attendance_records"),
            models: data.join("models"),
            data,
            static_dir,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(db_dir) = self.db_path.parent() {
            std::fs::create_dir_all(db_dir)?;
        }
        std::fs::create_dir_all(&self.registered)?;
        std::fs::create_dir_all(&self.attendance)?;
        std::fs::create_dir_all(&self.models)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub paths: AppPaths,
    pub threshold: f32,
    pub pool: db::DbPool,
    pub stats: Arc<stats::Stats>,
    pub ledger: Arc<ledger::Ledger>,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub index: Arc<RwLock<StudentIndex>>,
}

impl AppState {
    pub fn new(
        paths: AppPaths,
        pool: db::DbPool,
        threshold: f32,
        embedder: Arc<dyn FaceEmbedder>,
        index: StudentIndex,
    ) -> Self {
        let ledger = ledger::Ledger::new(paths.registered.clone(), paths.attendance.clone());
        Self {
            paths,
            threshold,
            pool,
            stats: Arc::new(stats::Stats::new()),
            ledger: Arc::new(ledger),
            embedder,
            index: Arc::new(RwLock::new(index)),
        }
    }
}

/// Rebuilds the in-memory index from every stored embedding.
pub fn load_index(pool: &db::DbPool) -> anyhow::Result<StudentIndex> {
    let conn = pool.get()?;
    let students = db::query::load_all_embeddings(&conn)?;
    Ok(StudentIndex::from_students(students))
}
