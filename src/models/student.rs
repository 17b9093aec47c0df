use serde::{Deserialize, Serialize};

/// A registered student as stored in the embeddings table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    pub image_path: String,
    pub timestamp: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// Row of `students.csv`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RegistrationRow {
    pub student_id: String,
    pub name: String,
    pub image_path: String,
    pub timestamp: String,
}

/// Row of `attendance.csv`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttendanceRow {
    pub student_id: String,
    pub name: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Listing<T> {
    pub total: usize,
    pub items: Vec<T>,
}
