/*!
Capture of rendered frames and their conversion to a constant rate video.

Subsystems that record push every frame they actually display into a
[`RecordingBuffer`] together with the instant it was shown. Frames are kept
zlib compressed, since a session can last minutes.

When the subsystem terminates, [`RecordingBuffer::finalize`] resamples the
irregular capture instants onto an evenly spaced timeline. The output rate is
derived from the smallest gap between two captures, rounded up to a multiple
of 5 and clipped to `[20, 120]` fps. Each output frame shows the latest capture
taken at or before its timestamp (zero-order hold), so a capture never
appears earlier than it was shown live.
*/

pub mod encoder;

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use log::{debug, info};

use crate::{
    constants::{MAX_VIDEO_FPS, MIN_VIDEO_FPS},
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::{is_enabled, InternalLog},
    utils::file_names::available_file_name,
};

pub use encoder::{FfmpegEncoder, VideoEncoder};

/// Timestamps closer than this are considered equal when resampling.
const TIME_EPSILON: f64 = 1e-9;

/// An RGB24 raster, row major, 3 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> CondynsateResult<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!(
                    "Frame of {width}x{height} needs {expected} bytes, got {}",
                    pixels.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&color);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    /// Copies the frame in the top left corner of a black `width` x `height`
    /// canvas. Parts that do not fit are cropped.
    pub fn padded(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = Frame::filled(width, height, [0, 0, 0]);
        let copy_w = self.width.min(width) as usize * 3;
        for y in 0..self.height.min(height) as usize {
            let src = y * self.width as usize * 3;
            let dst = y * width as usize * 3;
            out.pixels[dst..dst + copy_w].copy_from_slice(&self.pixels[src..src + copy_w]);
        }
        out
    }
}

/// One compressed capture. `capture_time` is in seconds since the first one.
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    compressed: Vec<u8>,
    width: u32,
    height: u32,
    capture_time: f64,
}

impl RecordedFrame {
    pub fn capture_time(&self) -> f64 {
        self.capture_time
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn decompress(&self) -> CondynsateResult<Frame> {
        let mut pixels = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        ZlibDecoder::new(self.compressed.as_slice())
            .read_to_end(&mut pixels)
            .map_err(|e| {
                CondynsateError::new(
                    CondynsateErrorTypes::RecordingError,
                    format!("Unable to decompress recorded frame: {e}"),
                )
            })?;
        Frame::new(self.width, self.height, pixels)
    }
}

/// Constant rate frame sequence built by [`RecordingBuffer::finalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSequence {
    pub fps: f64,
    /// For each output frame, the index of the capture it shows.
    pub indices: Vec<usize>,
}

impl ResampledSequence {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn timestamp(&self, output_index: usize) -> f64 {
        output_index as f64 / self.fps
    }
}

#[derive(Debug, Default)]
pub struct RecordingBuffer {
    frames: Vec<RecordedFrame>,
    start: Option<Instant>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compresses and stores `frame`, shown at `time`.
    ///
    /// Capture times never go backward: an instant older than the previous
    /// capture is recorded at the previous capture time.
    pub fn capture(&mut self, frame: &Frame, time: Instant) -> CondynsateResult<()> {
        let start = *self.start.get_or_insert(time);
        let mut capture_time = time.saturating_duration_since(start).as_secs_f64();
        if let Some(last) = self.frames.last() {
            capture_time = capture_time.max(last.capture_time);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder
            .write_all(frame.pixels())
            .and_then(|_| encoder.flush())
            .map_err(|e| {
                CondynsateError::new(
                    CondynsateErrorTypes::RecordingError,
                    format!("Unable to compress frame: {e}"),
                )
            })?;
        let compressed = encoder.finish().map_err(|e| {
            CondynsateError::new(
                CondynsateErrorTypes::RecordingError,
                format!("Unable to compress frame: {e}"),
            )
        })?;

        self.frames.push(RecordedFrame {
            compressed,
            width: frame.width(),
            height: frame.height(),
            capture_time,
        });
        if is_enabled(InternalLog::Recording) {
            debug!("Captured frame {} at {capture_time:.3}s", self.frames.len());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.start = None;
    }

    /// Resamples the captures onto a constant rate timeline.
    ///
    /// Returns `None` with 0 or 1 captures, there is no video to make.
    pub fn finalize(&self) -> Option<ResampledSequence> {
        if self.frames.len() < 2 {
            return None;
        }
        let times: Vec<f64> = self.frames.iter().map(|f| f.capture_time).collect();
        let fps = video_fps(&times);
        Some(ResampledSequence {
            fps,
            indices: zero_order_hold(&times, fps),
        })
    }

    /// Largest (even) width and height among the captures.
    pub fn video_size(&self) -> (u32, u32) {
        let width = self.frames.iter().map(|f| f.width).max().unwrap_or(0);
        let height = self.frames.iter().map(|f| f.height).max().unwrap_or(0);
        (even_dimension(width), even_dimension(height))
    }

    /// Encodes the recording to a free `{base_name}[_NN].mp4` in `dir`.
    ///
    /// ## Return
    /// The written path, or `None` when fewer than 2 frames were captured.
    pub fn save(
        &self,
        encoder: &dyn VideoEncoder,
        dir: &Path,
        base_name: &str,
    ) -> CondynsateResult<Option<PathBuf>> {
        let sequence = match self.finalize() {
            Some(sequence) => sequence,
            None => {
                info!("Only {} frame(s) recorded, no video written", self.frames.len());
                return Ok(None);
            }
        };
        let path = available_file_name(dir, base_name, "mp4")?;
        let (width, height) = self.video_size();
        let mut frames = sequence.indices.iter().map(|&i| {
            self.frames[i]
                .decompress()
                .map(|frame| frame.padded(width, height))
        });
        info!(
            "Saving {} frames at {} fps to {}",
            sequence.len(),
            sequence.fps,
            path.display()
        );
        encoder.encode(&path, sequence.fps, width, height, &mut frames)?;
        Ok(Some(path))
    }
}

/// Output frame rate for captures taken at `times` (seconds, increasing).
///
/// The fastest change between two captures must be representable: the rate is
/// `1 / min_gap` rounded up to a multiple of 5, clipped to `[20, 120]`.
pub fn video_fps(times: &[f64]) -> f64 {
    let min_dt = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold(f64::INFINITY, f64::min);
    let max_fps = if min_dt > 0. { 1. / min_dt } else { f64::INFINITY };
    let fps = (max_fps / 5.).ceil() * 5.;
    fps.clamp(MIN_VIDEO_FPS, MAX_VIDEO_FPS)
}

/// Maps every output timestep `i / fps` in `[0, last capture]` to the latest
/// capture at or before it.
pub fn zero_order_hold(times: &[f64], fps: f64) -> Vec<usize> {
    let Some(&duration) = times.last() else {
        return Vec::new();
    };
    let n_out = (duration * fps + TIME_EPSILON).floor() as usize + 1;
    let mut indices = Vec::with_capacity(n_out);
    let mut current = 0;
    for i in 0..n_out {
        let t = i as f64 / fps;
        while current + 1 < times.len() && times[current + 1] <= t + TIME_EPSILON {
            current += 1;
        }
        indices.push(current);
    }
    indices
}

/// Video encoders need even dimensions of at least 2.
pub fn even_dimension(dim: u32) -> u32 {
    let dim = dim.max(2);
    dim + dim % 2
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct CapturingEncoder {
        written: Mutex<Vec<(PathBuf, f64, u32, u32, Vec<Frame>)>>,
    }

    impl VideoEncoder for CapturingEncoder {
        fn encode(
            &self,
            path: &Path,
            fps: f64,
            width: u32,
            height: u32,
            frames: &mut dyn Iterator<Item = CondynsateResult<Frame>>,
        ) -> CondynsateResult<()> {
            let frames = frames.collect::<CondynsateResult<Vec<_>>>()?;
            self.written
                .lock()
                .push((path.to_path_buf(), fps, width, height, frames));
            Ok(())
        }
    }

    #[test]
    pub fn fps_heuristic() {
        // 10 Hz captures are slower than the 20 fps floor.
        assert_eq!(video_fps(&[0., 0.1, 0.2]), 20.);
        // 1 / 0.03 = 33.3 rounds up to 35.
        assert_eq!(video_fps(&[0., 0.03, 0.5]), 35.);
        assert_eq!(video_fps(&[0., 0.001]), 120.);
        assert_eq!(video_fps(&[0., 0., 1.]), 120.);
    }

    #[test]
    pub fn zero_or_one_frame_makes_no_video() {
        let mut buffer = RecordingBuffer::new();
        assert!(buffer.finalize().is_none());
        buffer
            .capture(&Frame::filled(4, 4, [1, 2, 3]), Instant::now())
            .unwrap();
        assert!(buffer.finalize().is_none());

        let encoder = CapturingEncoder::default();
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(buffer.save(&encoder, dir.path(), "video").unwrap(), None);
        assert!(encoder.written.lock().is_empty());
    }

    #[test]
    pub fn hold_never_shows_a_frame_early() {
        let times = [0.0, 0.37];
        let fps = video_fps(&times);
        assert_eq!(fps, 20.);
        let indices = zero_order_hold(&times, fps);
        let expected_len = (fps * 0.37).round() as i64;
        assert!((indices.len() as i64 - expected_len).abs() <= 1);
        for (i, &idx) in indices.iter().enumerate() {
            let t = i as f64 / fps;
            if t < 0.37 {
                assert_eq!(idx, 0, "frame B shown at {t}");
            }
        }
    }

    #[test]
    pub fn hold_fills_gaps_with_last_frame() {
        let times = [0.0, 0.05, 0.3, 0.31];
        let fps = video_fps(&times);
        assert_eq!(fps, 100.);
        let indices = zero_order_hold(&times, fps);
        assert_eq!(indices.len(), 32);
        assert_eq!(indices[0], 0);
        assert_eq!(indices[4], 0);
        assert_eq!(indices[5], 1);
        assert!(indices[5..30].iter().all(|&i| i == 1));
        assert_eq!(indices[30], 2);
        assert_eq!(indices[31], 3);
        for window in indices.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    pub fn capture_and_save() {
        let mut buffer = RecordingBuffer::new();
        let start = Instant::now();
        let red = Frame::filled(5, 3, [255, 0, 0]);
        let blue = Frame::filled(5, 3, [0, 0, 255]);
        buffer.capture(&red, start).unwrap();
        buffer
            .capture(&blue, start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.frames()[1].decompress().unwrap(), blue);
        assert_eq!(buffer.video_size(), (6, 4));

        let encoder = CapturingEncoder::default();
        let dir = tempfile::tempdir().unwrap();
        let path = buffer.save(&encoder, dir.path(), "animation").unwrap();
        assert_eq!(path, Some(dir.path().join("animation.mp4")));

        let written = encoder.written.lock();
        let (_, fps, width, height, frames) = &written[0];
        assert_eq!(*fps, 20.);
        assert_eq!((*width, *height), (6, 4));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].pixel(0, 0), Some([255, 0, 0]));
        assert_eq!(frames[0].pixel(5, 3), Some([0, 0, 0]));
        assert_eq!(frames[2].pixel(4, 2), Some([0, 0, 255]));
    }

    #[test]
    pub fn capture_times_are_monotonic() {
        let mut buffer = RecordingBuffer::new();
        let start = Instant::now() + Duration::from_millis(50);
        let frame = Frame::filled(2, 2, [0, 0, 0]);
        buffer.capture(&frame, start).unwrap();
        buffer
            .capture(&frame, start - Duration::from_millis(20))
            .unwrap();
        assert_eq!(buffer.frames()[1].capture_time(), 0.);
    }
}
