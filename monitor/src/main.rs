mod controller;
mod detector;
mod error;
mod keys;
mod overlay;
mod recorder;
mod snapshot;
mod source;
#[cfg(test)]
mod testing;

use camwatch_common::config::Config;
use controller::{CaptureLoop, LoopSettings};
use detector::ChangeDetector;
use overlay::Overlay;
use recorder::FfmpegSinkFactory;
use source::ffmpeg::FfmpegOpener;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        stream = %source::redact_locator(&config.stream.url),
        mode = ?config.capture.mode,
        poll_interval_secs = config.capture.poll_interval_secs,
        clip_duration_secs = config.capture.clip_duration_secs,
        output_dir = %config.capture.output_dir.display(),
        sensitivity = config.detector.sensitivity,
        changed_fraction = config.detector.changed_fraction,
        pixel_count_threshold = ?config.detector.pixel_count_threshold,
        "starting camwatch monitor"
    );

    // Check ffmpeg availability (streams cannot be opened without it).
    recorder::encoder::check_ffmpeg_available().await;

    let overlay = Overlay::from_config(&config.overlay);
    if !overlay.has_watermark() {
        info!("no usable watermark, frames get the caption only");
    }

    let mut capture = CaptureLoop::new(
        FfmpegOpener::new(Duration::from_secs(config.stream.read_timeout_secs)),
        FfmpegSinkFactory,
        ChangeDetector::from_config(&config.detector),
        overlay,
        LoopSettings::from_config(&config),
        config.stream.url.clone(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("stop requested, finishing the current tick");
                signal_cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    match capture.run(&cancel).await {
        Ok(summary) => info!(
            ticks = summary.ticks,
            captures = summary.captures,
            failures = summary.failures,
            "camwatch monitor stopped"
        ),
        Err(e) => {
            error!(error = %e, "unable to start monitoring; verify the stream URL and credentials");
            std::process::exit(1);
        }
    }
}
