//! Scene-change detection by grayscale frame differencing.
//!
//! The detector holds no state: the caller owns the baseline and passes it
//! in on every call, receiving the replacement baseline back.

mod diff;
pub mod threshold;

pub use diff::{ChangeDetector, ChangeVerdict};
