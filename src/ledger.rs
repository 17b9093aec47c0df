//! Append-only CSV logs for registrations and attendance.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::models::student::{AttendanceRow, RegistrationRow};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub struct Ledger {
    registered_dir: PathBuf,
    attendance_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(registered_dir: PathBuf, attendance_dir: PathBuf) -> Self {
        Self {
            registered_dir,
            attendance_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn registered_dir(&self) -> &Path {
        &self.registered_dir
    }

    pub fn students_csv(&self) -> PathBuf {
        self.registered_dir.join("students.csv")
    }

    pub fn attendance_csv(&self) -> PathBuf {
        self.attendance_dir.join("attendance.csv")
    }

    pub fn append_registration(&self, row: &RegistrationRow) -> Result<()> {
        let _guard = self.write_lock.lock();
        append_row(&self.students_csv(), row)
    }

    pub fn append_attendance(&self, row: &AttendanceRow) -> Result<()> {
        let _guard = self.write_lock.lock();
        append_row(&self.attendance_csv(), row)
    }

    pub fn read_registrations(&self) -> Result<Vec<RegistrationRow>> {
        read_rows(&self.students_csv())
    }

    /// Attendance rows, optionally only those whose timestamp starts with
    /// `date_prefix` (e.g. `20250914`).
    pub fn read_attendance(&self, date_prefix: Option<&str>) -> Result<Vec<AttendanceRow>> {
        let rows: Vec<AttendanceRow> = read_rows(&self.attendance_csv())?;
        Ok(match date_prefix {
            Some(p) if !p.is_empty() => rows.into_iter().filter(|r| r.timestamp.starts_with(p)).collect(),
            _ => rows,
        })
    }
}

fn append_row<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    // Header only when the file is new (or was left empty).
    let has_content = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {:?}", path))?;
    let mut wtr = csv::WriterBuilder::new().has_headers(!has_content).from_writer(file);
    wtr.serialize(row).with_context(|| format!("Failed to append to {:?}", path))?;
    wtr.flush()?;
    Ok(())
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut out = Vec::new();
    for rec in rdr.deserialize() {
        out.push(rec.with_context(|| format!("Malformed row in {:?}", path))?);
    }
    Ok(out)
}
