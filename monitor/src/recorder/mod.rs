pub mod clip;
pub mod encoder;

pub use clip::{record, ClipRequest, ClipSummary};
pub use encoder::{FfmpegSinkFactory, SinkFactory};
