use std::{
    env,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    process::Command,
};

use log::{info, warn};
use tempfile::NamedTempFile;

use super::Frame;
use crate::errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult};

/// Turns an ordered sequence of frames into a playable video file.
///
/// Frames are given in display order, all of `width` x `height`, and must be
/// played at the constant rate `fps`.
pub trait VideoEncoder: Send + Sync {
    fn encode(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        frames: &mut dyn Iterator<Item = CondynsateResult<Frame>>,
    ) -> CondynsateResult<()>;
}

/// Encodes with the `ffmpeg` executable.
///
/// Raw RGB24 frames are written to a temporary file first, then ffmpeg is run
/// once with H.264, falling back to MPEG-4 part 2 when libx264 is missing.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_bin: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            ffmpeg_bin: env::var("CONDYNSATE_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
        }
    }
}

struct Codec {
    description: &'static str,
    args: &'static [&'static str],
}

const CODECS: [Codec; 2] = [
    Codec {
        description: "H.264 (libx264)",
        args: &["-c:v", "libx264", "-pix_fmt", "yuv420p", "-preset", "veryfast"],
    },
    Codec {
        description: "MPEG-4 (mpeg4)",
        args: &["-c:v", "mpeg4", "-pix_fmt", "yuv420p", "-q:v", "3"],
    },
];

impl FfmpegEncoder {
    pub fn new(ffmpeg_bin: PathBuf) -> Self {
        Self { ffmpeg_bin }
    }

    fn recording_error(what: String) -> CondynsateError {
        CondynsateError::new(CondynsateErrorTypes::RecordingError, what)
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        frames: &mut dyn Iterator<Item = CondynsateResult<Frame>>,
    ) -> CondynsateResult<()> {
        let raw = NamedTempFile::new()
            .map_err(|e| Self::recording_error(format!("Unable to create raw frame file: {e}")))?;
        let mut frame_count = 0usize;
        {
            let mut writer = BufWriter::new(raw.as_file());
            for frame in frames {
                let frame = frame?;
                if frame.width() != width || frame.height() != height {
                    return Err(Self::recording_error(format!(
                        "Frame {frame_count} is {}x{}, expected {width}x{height}",
                        frame.width(),
                        frame.height()
                    )));
                }
                writer
                    .write_all(frame.pixels())
                    .map_err(|e| Self::recording_error(format!("Unable to write raw frame: {e}")))?;
                frame_count += 1;
            }
            writer
                .flush()
                .map_err(|e| Self::recording_error(format!("Unable to write raw frame: {e}")))?;
        }
        if frame_count == 0 {
            return Err(Self::recording_error(
                "No frames available for encoding".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for codec in &CODECS {
            let mut cmd = Command::new(&self.ffmpeg_bin);
            cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
                .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
                .arg("-s")
                .arg(format!("{width}x{height}"))
                .arg("-r")
                .arg(format!("{fps}"))
                .arg("-i")
                .arg(raw.path())
                .arg("-frames:v")
                .arg(frame_count.to_string())
                .args(codec.args)
                .args(["-movflags", "+faststart"])
                .arg(path);

            match cmd.output() {
                Ok(output) if output.status.success() => {
                    info!(
                        "Wrote {} ({frame_count} frames, {})",
                        path.display(),
                        codec.description
                    );
                    return Ok(());
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!("ffmpeg failed with {}: {stderr}", codec.description);
                    failures.push(format!("{}: {stderr}", codec.description));
                }
                Err(e) => {
                    return Err(Self::recording_error(format!(
                        "Unable to run {}: {e}",
                        self.ffmpeg_bin.display()
                    )));
                }
            }
        }
        Err(Self::recording_error(format!(
            "Every codec failed for {}:\n{}",
            path.display(),
            failures.join("\n")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn missing_binary_is_a_recording_error() {
        let encoder = FfmpegEncoder::new(PathBuf::from("/nonexistent/ffmpeg-binary"));
        let dir = tempfile::tempdir().unwrap();
        let mut frames = vec![Ok(Frame::filled(2, 2, [0, 0, 0]))].into_iter();
        let err = encoder
            .encode(&dir.path().join("out.mp4"), 20., 2, 2, &mut frames)
            .unwrap_err();
        assert_eq!(err.error_type(), CondynsateErrorTypes::RecordingError);
    }

    #[test]
    pub fn mismatched_frame_is_rejected() {
        let encoder = FfmpegEncoder::new(PathBuf::from("/nonexistent/ffmpeg-binary"));
        let dir = tempfile::tempdir().unwrap();
        let mut frames = vec![Ok(Frame::filled(4, 2, [0, 0, 0]))].into_iter();
        let err = encoder
            .encode(&dir.path().join("out.mp4"), 20., 2, 2, &mut frames)
            .unwrap_err();
        assert!(err.what().contains("expected 2x2"));
    }
}
