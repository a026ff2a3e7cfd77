use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Second-resolution stamp used in artifact names, e.g. `180225093000`.
pub fn stamp(at: &DateTime<Local>) -> String {
    at.format("%d%m%y%H%M%S").to_string()
}

/// File name for a still capture. `attempt` > 0 disambiguates captures that
/// land in the same second.
/// e.g. "capture_180225093000.jpg", "capture_180225093000_1.jpg"
pub fn snapshot_name(at: &DateTime<Local>, attempt: u32) -> String {
    with_suffix("capture", &stamp(at), attempt, "jpg")
}

/// File name for a motion clip.
/// e.g. "motion_180225093000.avi"
pub fn clip_name(at: &DateTime<Local>, attempt: u32, extension: &str) -> String {
    with_suffix("motion", &stamp(at), attempt, extension)
}

/// First clip path in `dir` that does not exist yet.
pub fn free_clip_path(dir: &Path, at: &DateTime<Local>, extension: &str) -> PathBuf {
    let mut attempt = 0;
    loop {
        let path = dir.join(clip_name(at, attempt, extension));
        if !path.exists() {
            return path;
        }
        attempt += 1;
    }
}

fn with_suffix(prefix: &str, stamp: &str, attempt: u32, extension: &str) -> String {
    if attempt == 0 {
        format!("{prefix}_{stamp}.{extension}")
    } else {
        format!("{prefix}_{stamp}_{attempt}.{extension}")
    }
}

/// Whether `name` looks like an artifact produced with `prefix` and `extension`.
#[cfg(test)]
pub fn is_artifact_name(name: &str, prefix: &str, extension: &str) -> bool {
    let Some(rest) = name
        .strip_prefix(prefix)
        .and_then(|r| r.strip_prefix('_'))
        .and_then(|r| r.strip_suffix(extension))
        .and_then(|r| r.strip_suffix('.'))
    else {
        return false;
    };
    let (digits, suffix) = match rest.split_once('_') {
        Some((d, s)) => (d, Some(s)),
        None => (rest, None),
    };
    digits.len() == 12
        && digits.bytes().all(|b| b.is_ascii_digit())
        && suffix.map_or(true, |s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
}
