use camwatch_common::frame::Frame;
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::CaptureError;
use crate::keys::snapshot_name;

/// JPEG quality for stills; kept low, snapshots are for review not archival.
pub const SNAPSHOT_QUALITY: u8 = 25;

/// Encode `frame` as JPEG into `dir` under a timestamped name, creating the
/// directory if needed. Never overwrites an existing file.
pub async fn save(frame: &Frame, dir: &Path) -> Result<PathBuf, CaptureError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CaptureError::io(dir, e))?;

    let now = Local::now();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, SNAPSHOT_QUALITY)
        .encode_image(&frame.image)
        .map_err(|e| CaptureError::Encode {
            path: dir.join(snapshot_name(&now, 0)),
            source: e,
        })?;

    let mut attempt = 0;
    let (path, file) = loop {
        let path = dir.join(snapshot_name(&now, attempt));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => break (path, file),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(CaptureError::io(path, e)),
        }
    };

    fill_new(file, &path, &jpeg).await?;

    info!(
        path = %path.display(),
        bytes = jpeg.len(),
        seq = frame.seq,
        "snapshot saved"
    );
    Ok(path)
}

/// Write `bytes` into a file just created at `path`. On failure the file is
/// removed again, so a truncated image never stays behind under an artifact
/// name.
async fn fill_new(
    mut file: tokio::fs::File,
    path: &Path,
    bytes: &[u8],
) -> Result<(), CaptureError> {
    let result: std::io::Result<()> = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    let Err(e) = result else {
        return Ok(());
    };

    drop(file);
    if let Err(rm) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %rm, "failed to remove partial snapshot");
    }
    Err(CaptureError::io(path, e))
}
