use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use slidegrab_common::frame::CaptureEvent;
use tracing::{debug, info};

/// Writes captured slides as PNG files into an existing directory.
///
/// The directory is never created or cleaned here. A failed write is
/// returned to the caller and not retried; files written earlier stay.
pub struct CaptureSink {
    dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to encode capture {name} as PNG: {reason}")]
    Encode { name: String, reason: String },
    #[error("failed to write capture {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn persist(&self, event: &CaptureEvent) -> Result<PathBuf, SinkError> {
        let name = event.file_name();
        let path = self.dir.join(&name);

        let mut png = Vec::new();
        event
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| SinkError::Encode {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        debug!(name, bytes = png.len(), "capture encoded");

        tokio::fs::write(&path, &png)
            .await
            .map_err(|source| SinkError::Write {
                path: path.display().to_string(),
                source,
            })?;

        info!(
            seq = event.seq,
            frame = event.frame_index,
            minutes = format!("{:.2}", event.timestamp_minutes),
            path = %path.display(),
            "slide captured"
        );
        Ok(path)
    }
}
