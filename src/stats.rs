use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Stats {
    registrations: AtomicU64,
    recognized: AtomicU64,
    unknown: AtomicU64,
    attendance_marked: AtomicU64,
    attendance_failed: AtomicU64,
    rejected: AtomicU64,
    started: Instant,
    last_recognition: parking_lot::Mutex<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub registrations: u64,
    pub recognized: u64,
    pub unknown: u64,
    pub attendance_marked: u64,
    pub attendance_failed: u64,
    pub rejected: u64,
    pub last_recognition: Option<String>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            registrations: AtomicU64::new(0),
            recognized: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            attendance_marked: AtomicU64::new(0),
            attendance_failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started: Instant::now(),
            last_recognition: parking_lot::Mutex::new(None),
        }
    }
    pub fn inc_registrations(&self) { self.registrations.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_unknown(&self) { self.unknown.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_attendance_failed(&self) { self.attendance_failed.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_rejected(&self) { self.rejected.fetch_add(1, Ordering::Relaxed); }
    pub fn record_recognized(&self, student_id: &str) {
        self.recognized.fetch_add(1, Ordering::Relaxed);
        *self.last_recognition.lock() = Some(student_id.to_string());
    }
    pub fn inc_attendance_marked(&self) { self.attendance_marked.fetch_add(1, Ordering::Relaxed); }
    pub fn uptime_secs(&self) -> u64 { self.started.elapsed().as_secs() }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            registrations: self.registrations.load(Ordering::Relaxed),
            recognized: self.recognized.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            attendance_marked: self.attendance_marked.load(Ordering::Relaxed),
            attendance_failed: self.attendance_failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            last_recognition: self.last_recognition.lock().clone(),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.registrations,
            &self.recognized,
            &self.unknown,
            &self.attendance_marked,
            &self.attendance_failed,
            &self.rejected,
        ] {
            c.store(0, Ordering::Relaxed);
        }
        *self.last_recognition.lock() = None;
    }
}
