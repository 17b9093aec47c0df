use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::blob_to_embedding;
use crate::models::student::Student;

fn row_to_student(row: &Row<'_>, with_embedding: bool) -> rusqlite::Result<Student> {
    let embedding = if with_embedding {
        let blob: Vec<u8> = row.get("embedding_blob")?;
        blob_to_embedding(&blob)
    } else {
        Vec::new()
    };
    Ok(Student {
        student_id: row.get("student_id")?,
        name: row.get("name")?,
        image_path: row.get("image_path")?,
        timestamp: row.get("registered_at")?,
        embedding,
    })
}

pub fn count_students(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
    Ok(n)
}

pub fn get_student(conn: &Connection, student_id: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            "SELECT student_id, name, embedding_blob, image_path, registered_at
             FROM students WHERE student_id = ?1",
            params![student_id],
            |row| row_to_student(row, true),
        )
        .optional()?;
    Ok(student)
}

/// Students in registration order, without embeddings.
pub fn list_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, name, image_path, registered_at FROM students ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| row_to_student(row, false))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Every student with its embedding, in registration order.
pub fn load_all_embeddings(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, name, embedding_blob, image_path, registered_at
         FROM students ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| row_to_student(row, true))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
