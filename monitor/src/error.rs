use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("stream unavailable: {0}")]
    Stream(String),
    #[error("no decodable frame after {attempts} read attempts")]
    DecodeFailure { attempts: u32 },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoder sink failed for {}: {reason}", .path.display())]
    Sink { path: PathBuf, reason: String },
    #[error("failed to encode {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("baseline is {baseline:?} but frame is {frame:?}")]
    DimensionMismatch {
        baseline: (u32, u32),
        frame: (u32, u32),
    },
}

impl CaptureError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::Io {
            path: path.into(),
            source,
        }
    }
}
