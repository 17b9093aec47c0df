use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::embedding_to_blob;
use crate::models::student::Student;

/// Inserts a student or replaces the existing record with the same ID.
///
/// The upsert keeps the row's original rowid, so a re-registered student
/// keeps its position in the scan order.
pub fn upsert_student(conn: &Connection, student: &Student) -> Result<()> {
    conn.execute(
        "INSERT INTO students (student_id, name, embedding_blob, image_path, registered_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(student_id) DO UPDATE SET
           name = excluded.name,
           embedding_blob = excluded.embedding_blob,
           image_path = excluded.image_path,
           registered_at = excluded.registered_at",
        params![
            student.student_id,
            student.name,
            embedding_to_blob(&student.embedding),
            student.image_path,
            student.timestamp,
        ],
    )?;
    Ok(())
}

pub fn delete_student(conn: &Connection, student_id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM students WHERE student_id = ?1", params![student_id])?;
    Ok(deleted > 0)
}
