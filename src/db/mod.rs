pub mod schema;
pub mod writer;
pub mod query;

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Opens (creating if needed) the database and returns a pool over it.
pub fn create_pool<P: AsRef<Path>>(db_path: P, max_size: u32) -> Result<DbPool> {
    let db_path = db_path.as_ref();
    // Schema is applied once up front so pooled connections only need pragmas.
    drop(open_or_create(db_path)?);
    let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
        c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")
    });
    r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .with_context(|| format!("Failed to build connection pool for {:?}", db_path))
}

pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![0.25f32, -1.5, 3.0e-7, f32::MAX];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }

    #[test]
    fn truncated_blob_drops_partial_float() {
        let mut blob = embedding_to_blob(&[1.0, 2.0]);
        blob.pop();
        assert_eq!(blob_to_embedding(&blob), vec![1.0]);
    }
}
