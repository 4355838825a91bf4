use std::path::Path;
use std::process::Stdio;

use image::RgbImage;
use serde::Deserialize;
use slidegrab_common::config::{DecoderConfig, SamplingConfig};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{FrameSource, SourceError, SourceInfo};

/// Decodes a video file with an `ffmpeg` subprocess.
///
/// Rather than seeking to every sample time, ffmpeg decodes the whole
/// stream sequentially and its `fps` filter keeps exactly one frame per
/// `1/R` tick, which is far cheaper than per-frame seeks on most codecs.
/// Frames arrive on stdout as packed `rgb24`.
pub struct FfmpegSource {
    child: Child,
    frames: RawFrameReader<ChildStdout>,
    info: SourceInfo,
    finished: bool,
}

/// Cuts a packed `rgb24` byte stream into fixed-size frames.
struct RawFrameReader<R> {
    reader: R,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl FfmpegSource {
    pub async fn open(
        path: &Path,
        sampling: &SamplingConfig,
        decoder: &DecoderConfig,
    ) -> Result<Self, SourceError> {
        if !path.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }

        let info = probe(path, decoder).await?;

        let fps_filter = format!("fps={}", sampling.frame_rate);
        let mut cmd = Command::new(&decoder.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-vf", fps_filter.as_str(),
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SourceError::Spawn(format!("{}: {e}", decoder.ffmpeg.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Spawn("could not get stdout handle".into()))?;

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            duration_secs = info.duration_secs,
            frame_count = info.frame_count,
            frame_rate = sampling.frame_rate,
            "video opened"
        );

        Ok(Self {
            child,
            frames: RawFrameReader::new(stdout, info.width, info.height),
            info,
            finished: false,
        })
    }

    async fn finish(&mut self) {
        self.finished = true;
        let frames = self.frames.frames_read;
        match self.child.wait().await {
            Ok(status) if status.success() => {
                debug!(frames, "decoder finished");
            }
            Ok(status) => {
                warn!(%status, frames, "decoder exited with error, treating as end of stream");
            }
            Err(e) => {
                warn!(error = %e, "failed to wait for decoder");
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> Option<RgbImage> {
        if self.finished {
            return None;
        }

        let frame = self.frames.read_frame().await;
        if frame.is_none() {
            self.finish().await;
        }
        frame
    }
}

impl<R: AsyncRead + Unpin> RawFrameReader<R> {
    fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
            frames_read: 0,
        }
    }

    /// Next whole frame, or `None` once the stream ends, breaks off inside a
    /// frame or fails to read.
    async fn read_frame(&mut self) -> Option<RgbImage> {
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    warn!(error = %e, frames = self.frames_read, "failed to read frame from decoder");
                    return None;
                }
            }
        }

        if filled < buf.len() {
            if filled > 0 {
                warn!(
                    bytes = filled,
                    expected = buf.len(),
                    frames = self.frames_read,
                    "decoder output ends inside a frame, dropping it"
                );
            }
            return None;
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.width, self.height, buf)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

async fn probe(path: &Path, decoder: &DecoderConfig) -> Result<SourceInfo, SourceError> {
    let probe_err = |reason: String| SourceError::Probe {
        path: path.display().to_string(),
        reason,
    };

    let output = Command::new(&decoder.ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,nb_frames,duration:format=duration",
            "-of", "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| probe_err(format!("could not run {}: {e}", decoder.ffprobe.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(probe_err(stderr.trim().to_string()));
    }

    parse_probe(&output.stdout).map_err(probe_err)
}

fn parse_probe(json: &[u8]) -> Result<SourceInfo, String> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("unreadable ffprobe output: {e}"))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no frame size".into()),
    };

    let parse_secs = |s: Option<String>| {
        s.and_then(|v| v.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
    };

    Ok(SourceInfo {
        width,
        height,
        duration_secs: parse_secs(stream.duration)
            .or_else(|| parse_secs(parsed.format.and_then(|f| f.duration))),
        frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
    })
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub async fn check_ffmpeg_available(decoder: &DecoderConfig) {
    match Command::new(&decoder.ffmpeg).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; decoding may fail");
        }
        Err(e) => {
            warn!(
                error = %e,
                ffmpeg = %decoder.ffmpeg.display(),
                "ffmpeg not found; videos cannot be decoded. Install ffmpeg and ffprobe or set [decoder] paths."
            );
        }
    }
}
