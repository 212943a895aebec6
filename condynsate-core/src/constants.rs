use std::time::Duration;

/// Sleep between two polls of every background loop and `await_*` helper.
pub const SLEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum number of subplots in one animator figure.
pub const MAX_SUBPLOTS: usize = 16;
/// Maximum number of lines or bars in one subplot.
pub const MAX_ARTISTS: usize = 16;

/// Subplots are stacked on at most this many rows.
pub const MAX_FIGURE_ROWS: usize = 2;
pub const SUBPLOT_HEIGHT_PX: u32 = 240;
pub const SUBPLOT_WIDTH_PX: u32 = 384;

pub const MIN_VIDEO_FPS: f64 = 20.;
pub const MAX_VIDEO_FPS: f64 = 120.;
/// Highest suffix tried when naming a video, `{base}_99.mp4`.
pub const MAX_VIDEO_SUFFIX: u32 = 99;

/// Real time pacing sleeps this fraction of `dt` to absorb the cost of a step.
pub const REAL_TIME_FACTOR: f64 = 0.95;
