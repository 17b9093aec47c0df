use std::path::{Path, PathBuf};

/// Student IDs double as file name stems for saved registration images, so
/// anything that could escape the registration directory is rejected.
pub fn is_safe_file_stem(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || trimmed.contains("..") {
        return false;
    }
    !trimmed.chars().any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
}

/// `<dir>/<student_id>_<timestamp>.jpg`
pub fn registration_image_path(dir: &Path, student_id: &str, timestamp: &str) -> PathBuf {
    dir.join(format!("{}_{}.jpg", student_id, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        assert!(is_safe_file_stem("test01"));
        assert!(is_safe_file_stem("S-2024.117"));
        assert!(is_safe_file_stem("  padded  "));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(!is_safe_file_stem(""));
        assert!(!is_safe_file_stem("   "));
        assert!(!is_safe_file_stem(".."));
        assert!(!is_safe_file_stem("../etc/passwd"));
        assert!(!is_safe_file_stem("a/b"));
        assert!(!is_safe_file_stem("a\\b"));
        assert!(!is_safe_file_stem("line\nbreak"));
    }

    #[test]
    fn builds_image_path() {
        let p = registration_image_path(Path::new("/data/registered_students"), "test01", "20250914_000756");
        assert_eq!(p, PathBuf::from("/data/registered_students/test01_20250914_000756.jpg"));
    }
}
