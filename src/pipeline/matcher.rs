use std::collections::HashMap;

use tracing::debug;

use crate::errors::AttendanceError;
use crate::models::student::Student;

/// Score reported when no stored embedding was comparable to the query.
pub const NO_MATCH_SCORE: f32 = -1.0;

/// `a·b / (|a||b|)`. `None` when the lengths differ or either vector has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot_product / (norm_a * norm_b))
}

#[derive(Debug, Clone, Copy)]
pub struct BestMatch<'a> {
    pub student: &'a Student,
    pub score: f32,
}

/// Linear scan for the highest cosine similarity. The first candidate wins
/// ties; candidates that cannot be compared are skipped.
pub fn best_match<'a, I>(query: &[f32], candidates: I) -> Option<BestMatch<'a>>
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut best: Option<BestMatch<'a>> = None;
    for student in candidates {
        let Some(score) = cosine_similarity(query, &student.embedding) else {
            debug!(
                "skipping {}: embedding dim {} vs query dim {}",
                student.student_id,
                student.embedding.len(),
                query.len()
            );
            continue;
        };
        match best {
            Some(b) if score <= b.score => {}
            _ => best = Some(BestMatch { student, score }),
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Recognized { student: Student, score: f32 },
    Unknown { score: f32 },
}

impl MatchOutcome {
    pub fn score(&self) -> f32 {
        match self {
            MatchOutcome::Recognized { score, .. } | MatchOutcome::Unknown { score } => *score,
        }
    }
}

/// Accepts the best match iff its score reaches `threshold`.
pub fn decide(best: Option<BestMatch<'_>>, threshold: f32) -> MatchOutcome {
    match best {
        Some(b) if b.score >= threshold => MatchOutcome::Recognized {
            student: b.student.clone(),
            score: b.score,
        },
        Some(b) => MatchOutcome::Unknown { score: b.score },
        None => MatchOutcome::Unknown { score: NO_MATCH_SCORE },
    }
}

// Registered-student index
// ------------------------
//
// Brute-force over every registered embedding, kept in registration order so
// tie-breaking matches the order students were first enrolled. The database
// remains the source of truth; the index is rebuilt from it at startup.

#[derive(Default)]
pub struct StudentIndex {
    id_to_index: HashMap<String, usize>,
    students: Vec<Student>,
}

impl StudentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_students(students: Vec<Student>) -> Self {
        let mut index = Self::new();
        for s in students {
            index.upsert(s);
        }
        index
    }

    /// Adds a student, replacing (in place) any entry with the same ID.
    pub fn upsert(&mut self, student: Student) {
        match self.id_to_index.get(&student.student_id) {
            Some(&pos) => self.students[pos] = student,
            None => {
                self.id_to_index.insert(student.student_id.clone(), self.students.len());
                self.students.push(student);
            }
        }
    }

    pub fn remove(&mut self, student_id: &str) -> Option<Student> {
        let pos = self.id_to_index.remove(student_id)?;
        let removed = self.students.remove(pos);
        for idx in self.id_to_index.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    pub fn get(&self, student_id: &str) -> Option<&Student> {
        self.id_to_index.get(student_id).map(|&i| &self.students[i])
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Student> {
        self.students.iter()
    }

    pub fn find_best(&self, query: &[f32], threshold: f32) -> Result<MatchOutcome, AttendanceError> {
        if self.is_empty() {
            return Err(AttendanceError::NoRegisteredStudents);
        }
        Ok(decide(best_match(query, self.students.iter()), threshold))
    }
}
