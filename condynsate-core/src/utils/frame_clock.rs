/*!
Frame pacing shared by every thread that renders at a capped rate.

The clock only answers "is it time to render again". The caller records a
render with [`FrameClock::mark_rendered`] once it actually drew something, so
frequent polling never pushes the next frame back.
*/

use std::time::{Duration, Instant};

/// Returns `true` when `now - last_render >= interval`, or always when the
/// interval is zero (unthrottled).
pub fn should_render(now: Instant, last_render: Instant, interval: Duration) -> bool {
    if interval.is_zero() {
        return true;
    }
    now.saturating_duration_since(last_render) >= interval
}

#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    last_render: Option<Instant>,
}

impl FrameClock {
    /// Builds a clock from a target frame rate in frames per second.
    ///
    /// `None`, zero, negative or non finite rates give an unthrottled clock.
    pub fn from_frame_rate(frame_rate: Option<f64>) -> Self {
        let interval = match frame_rate {
            Some(rate) if rate.is_finite() && rate > 0. => Duration::from_secs_f64(1. / rate),
            _ => Duration::ZERO,
        };
        Self::new(interval)
    }

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_render: None,
        }
    }

    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_unthrottled(&self) -> bool {
        self.interval.is_zero()
    }

    /// A clock that never rendered is always due.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_render {
            Some(last) => should_render(now, last, self.interval),
            None => true,
        }
    }

    pub fn is_due_now(&self) -> bool {
        self.is_due(Instant::now())
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_render = Some(now);
    }

    pub fn last_render(&self) -> Option<Instant> {
        self.last_render
    }

    /// Forgets the last render, the next poll is due.
    pub fn reset(&mut self) {
        self.last_render = None;
    }
}
