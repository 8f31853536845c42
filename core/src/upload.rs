//! File upload handling: sanitise a client-supplied filename and write the
//! attached bytes under the project's upload directory. Never trust a
//! client path — only the final path component survives, and the write
//! target is always pinned under a fixed project subdirectory.

use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Subdirectory (relative to the project root) uploads are written into.
pub const UPLOAD_DIR: &str = ".swe-swe/uploads";

/// Filenames longer than this (after sanitisation) are truncated, preserving
/// the extension where possible.
const MAX_NAME_LEN: usize = 200;

/// Strip any path structure from a client-supplied filename: take only the
/// final component, reject `.`/`..`, and drop characters that would be
/// awkward on common filesystems. This never fails on an empty/entirely
/// filtered result — sanitise returns an empty string and the caller maps
/// that to [`UploadError::EmptyName`].
fn sanitize_name(raw: &str) -> String {
    let base = Path::new(raw).file_name().and_then(|n| n.to_str()).unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
        .collect();

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed == ".." || trimmed == "." {
        return String::new();
    }

    if trimmed.len() <= MAX_NAME_LEN {
        trimmed.to_string()
    } else {
        truncate_preserving_extension(trimmed, MAX_NAME_LEN)
    }
}

/// Floor `len` down to the nearest preceding UTF-8 char boundary in `s`, so a
/// byte-length truncation never splits a multibyte codepoint.
fn floor_char_boundary(s: &str, len: usize) -> usize {
    if len >= s.len() {
        return s.len();
    }
    (0..=len).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() < max_len => {
            let keep = max_len - ext.len() - 1;
            let keep = floor_char_boundary(stem, stem.len().min(keep));
            format!("{}.{}", &stem[..keep], ext)
        }
        _ => {
            let keep = floor_char_boundary(name, max_len);
            name[..keep].to_string()
        }
    }
}

/// Pick a non-colliding path under `project_root/UPLOAD_DIR` for `raw_name`,
/// appending a numeric suffix (`notes (1).txt`, `notes (2).txt`, ...) if the
/// sanitised name already exists.
pub fn resolve_upload_path(project_root: &Path, raw_name: &str) -> Result<PathBuf, UploadError> {
    let name = sanitize_name(raw_name);
    if name.is_empty() {
        return Err(UploadError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(UploadError::TooLong);
    }

    let dir = project_root.join(UPLOAD_DIR);
    let candidate = dir.join(&name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (name.clone(), String::new()),
    };
    for n in 1..10_000 {
        let attempt = dir.join(format!("{stem} ({n}){ext}"));
        if !attempt.exists() {
            return Ok(attempt);
        }
    }
    Err(UploadError::TooLong)
}

/// Write `data` to the resolved, collision-free path under the project's
/// upload directory, creating it if needed, and return the filename actually
/// used — the `file_upload` ack message carries this back to the client.
pub fn write_upload(project_root: &Path, raw_name: &str, data: &[u8]) -> Result<String, UploadError> {
    let path = resolve_upload_path(project_root, raw_name)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, data)?;
    Ok(path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_traversal_down_to_basename() {
        assert_eq!(sanitize_name("../../etc/passwd"), "passwd");
    }

    #[test]
    fn absolute_path_is_reduced_to_basename() {
        assert_eq!(sanitize_name("/etc/shadow"), "shadow");
    }

    #[test]
    fn dot_and_dotdot_sanitize_to_empty() {
        assert_eq!(sanitize_name(".."), "");
        assert_eq!(sanitize_name("."), "");
    }

    #[test]
    fn long_name_is_truncated_preserving_extension() {
        let long_stem = "a".repeat(400);
        let name = sanitize_name(&format!("{long_stem}.tar.gz"));
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with(".gz"));
    }

    #[test]
    fn long_multibyte_name_truncates_without_panicking() {
        let long_stem = "\u{1F600}".repeat(150);
        let name = sanitize_name(&format!("{long_stem}.png"));
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.ends_with(".png"));
        assert!(name.is_char_boundary(name.len() - 4));
    }

    #[test]
    fn long_multibyte_name_without_extension_truncates_without_panicking() {
        let long = "\u{1F600}".repeat(150);
        let name = sanitize_name(&long);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.is_char_boundary(name.len()));
    }

    #[test]
    fn empty_name_errors() {
        let dir = tempdir_path();
        let err = resolve_upload_path(&dir, "../").unwrap_err();
        assert!(matches!(err, UploadError::EmptyName));
    }

    #[test]
    fn collision_gets_numeric_suffix() {
        let dir = tempdir_path();
        std::fs::create_dir_all(dir.join(UPLOAD_DIR)).unwrap();
        std::fs::write(dir.join(UPLOAD_DIR).join("notes.txt"), b"one").unwrap();

        let path = resolve_upload_path(&dir, "notes.txt").unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "notes (1).txt");

        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir_path() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sweswe-upload-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
