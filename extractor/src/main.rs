mod filter;
mod pipeline;
mod recorder;
mod source;

use std::path::{Path, PathBuf};

use slidegrab_common::config::Config;
use tracing::{debug, error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let mut args = std::env::args().skip(1);
    let Some(video) = args.next().map(PathBuf::from) else {
        eprintln!("usage: slidegrab <video> [config.toml]");
        std::process::exit(2);
    };

    let config = match args.next().map(PathBuf::from) {
        Some(path) => match Config::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        video = %video.display(),
        frame_rate = config.sampling.frame_rate,
        warmup_frames = config.sampling.warmup_frames,
        history = config.background.history_frames(config.sampling.frame_rate),
        var_threshold = config.background.var_threshold,
        min_percent = config.motion.min_percent(),
        max_percent = config.motion.max_percent(),
        "starting slidegrab"
    );

    source::ffmpeg::check_ffmpeg_available(&config.decoder).await;

    // Leave any previous output alone when the input is unusable.
    if !video.is_file() {
        error!(video = %video.display(), "video file not found");
        std::process::exit(1);
    }

    let output_dir = match prepare_output_dir(&config.output.root, &video).await {
        Ok(dir) => dir,
        Err(e) => {
            error!(root = %config.output.root.display(), error = %e, "failed to prepare output folder");
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match pipeline::extract_file(&video, &config, &output_dir, shutdown).await {
        Ok(summary) => {
            for capture in &summary.captures {
                debug!(
                    seq = capture.seq,
                    frame = capture.frame_index,
                    minutes = format!("{:.2}", capture.timestamp_minutes),
                    path = %capture.path.display(),
                    "slide"
                );
            }
            info!(
                captures = summary.captures.len(),
                frames_analyzed = summary.frames_analyzed,
                elapsed_secs = format!("{:.1}", summary.elapsed.as_secs_f64()),
                output = %output_dir.display(),
                interrupted = summary.interrupted,
                "slides extracted"
            );
            info!("review the captured slides and delete any duplicates before assembling them");
        }
        Err(e) => {
            error!(error = %e, "extraction failed");
            std::process::exit(1);
        }
    }
}

/// `<root>/<video stem>/`, emptied if it already exists.
async fn prepare_output_dir(root: &Path, video: &Path) -> std::io::Result<PathBuf> {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let dir = root.join(stem);

    if tokio::fs::try_exists(&dir).await? {
        warn!(path = %dir.display(), "output folder exists, replacing it");
        tokio::fs::remove_dir_all(&dir).await?;
    }
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
