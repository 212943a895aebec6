/*!
Live plotting of lineplots and barcharts.

Subplots are declared with [`Animator::add_lineplot`] and
[`Animator::add_barchart`], then [`Animator::start`] spawns one
`condynsate-subplot-{i}` worker per subplot and the `condynsate-figure`
worker. Mutators only flag the touched artist as dirty: the subplot worker
redraws flagged artists, and the figure worker, clocked at the configured
frame rate, rasterizes the figure whenever a subplot changed.

[`Animator::refresh`] runs on the caller thread. It pushes the latest figure
image to the [`FrameSink`], if any, and captures it when recording.

With `threaded: false` nothing is spawned and every mutator redraws and
rasterizes before it returns.

## Example
```no_run
use condynsate::animator::{Animator, LineplotConfig, PlottersBackend};
use condynsate::config::AnimatorConfig;

let animator = Animator::new(
    AnimatorConfig::default(),
    Box::new(PlottersBackend::default()),
    None,
    None,
);
let ids = animator.add_lineplot(1, &LineplotConfig::default()).unwrap();
animator.start().unwrap();
animator.lineplot_append_point(ids[0], 0., 1.).unwrap();
animator.refresh().unwrap();
animator.terminate().unwrap();
```
*/

pub mod figure;
pub mod plot_backend;
pub mod subplots;
pub mod window;

use std::{
    fmt::Display,
    sync::Arc,
    time::Instant,
};

use log::{debug, info, warn};
use parking_lot::Mutex;

pub use plot_backend::{FigureLayout, PlotBackend, PlottersBackend};
pub use subplots::{
    BarchartConfig, LineStyle, LineplotConfig, Panel, PerArtist, Subplot, SubplotKind,
};
pub use window::{FrameSink, MemorySink, SinkState};

use figure::{Figure, FigureImage, SharedSlot, SubplotSlot, SubplotTask};
use subplots::{Barchart, Lineplot};

use crate::{
    config::AnimatorConfig,
    constants::{MAX_ARTISTS, MAX_SUBPLOTS},
    errors::{aggregate_results, CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::{is_enabled, InternalLog},
    recording::{RecordingBuffer, VideoEncoder},
    shutdown::Terminate,
    utils::{
        frame_clock::FrameClock,
        is_number,
        worker::{TickOutcome, Worker},
    },
};

/// Identifies one line or one bar: `16 * subplot + artist`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtistId(u16);

impl ArtistId {
    fn new(subplot: usize, artist: usize) -> Self {
        Self((subplot * MAX_ARTISTS + artist) as u16)
    }

    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn subplot(&self) -> usize {
        self.0 as usize / MAX_ARTISTS
    }

    pub fn artist(&self) -> usize {
        self.0 as usize % MAX_ARTISTS
    }
}

impl Display for ArtistId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[derive(Debug, Clone)]
enum SubplotSpec {
    Lineplot(usize, LineplotConfig),
    Barchart(usize, BarchartConfig),
}

impl SubplotSpec {
    fn build(&self) -> CondynsateResult<Subplot> {
        Ok(match self {
            SubplotSpec::Lineplot(n, config) => Subplot::Lineplot(Lineplot::new(*n, config)?),
            SubplotSpec::Barchart(n, config) => Subplot::Barchart(Barchart::new(*n, config)?),
        })
    }
}

struct Running {
    slots: Vec<SharedSlot>,
    subplot_workers: Vec<Worker>,
    figure_worker: Option<Worker>,
    /// Set when not threaded.
    inline_figure: Option<Figure>,
    image: Arc<Mutex<FigureImage>>,
    last_shown: Option<u64>,
}

struct AnimatorInner {
    specs: Vec<SubplotSpec>,
    running: Option<Running>,
    clock: FrameClock,
    recording: Option<RecordingBuffer>,
    sink: Option<Box<dyn FrameSink>>,
}

struct AnimatorCore {
    config: AnimatorConfig,
    backend: Arc<Mutex<Box<dyn PlotBackend>>>,
    encoder: Option<Arc<dyn VideoEncoder>>,
    inner: Mutex<AnimatorInner>,
}

impl AnimatorCore {
    /// Shows and records the latest figure if the clock allows it and the
    /// figure changed since it was last shown.
    fn present(&self, inner: &mut AnimatorInner) {
        let Some(running) = inner.running.as_mut() else {
            return;
        };
        let now = Instant::now();
        if !inner.clock.is_due(now)
            || !show_latest(running, inner.sink.as_mut(), inner.recording.as_mut(), now)
        {
            return;
        }
        inner.clock.mark_rendered(now);
    }

    fn save_recording(&self, recording: &mut RecordingBuffer) -> CondynsateResult<()> {
        let result = match &self.encoder {
            Some(encoder) => recording
                .save(encoder.as_ref(), &self.config.output_dir, &self.config.video_name)
                .map(|path| {
                    if let Some(path) = path {
                        info!("Animator recording saved to {}", path.display());
                    }
                }),
            None if recording.len() > 1 => Err(CondynsateError::new(
                CondynsateErrorTypes::RecordingError,
                "No video encoder given, animator recording dropped".to_string(),
            )),
            None => Ok(()),
        };
        recording.clear();
        result
    }
}

/// Shows and records the latest figure unless it was already shown. Returns
/// `true` if it was shown.
fn show_latest(
    running: &mut Running,
    sink: Option<&mut Box<dyn FrameSink>>,
    recording: Option<&mut RecordingBuffer>,
    now: Instant,
) -> bool {
    let Some((revision, frame)) = running.image.lock().latest() else {
        return false;
    };
    if running.last_shown == Some(revision) {
        return false;
    }
    running.last_shown = Some(revision);
    if let Some(sink) = sink {
        if !sink.is_closed() {
            if let Err(e) = sink.show(&frame) {
                warn!("Unable to show the animator figure: {}", e.detailed_error());
            }
        }
    }
    if let Some(recording) = recording {
        if let Err(e) = recording.capture(&frame, now) {
            warn!("Unable to capture the animator figure: {}", e.detailed_error());
        }
    }
    true
}

impl Terminate for AnimatorCore {
    fn name(&self) -> &str {
        "animator"
    }

    /// Joins the workers, shows the figure of their final flush, closes the
    /// sink and writes the recording. Only the state swap holds the lock.
    fn terminate(&self) -> CondynsateResult<()> {
        let (mut running, mut sink, mut recording) = {
            let mut inner = self.inner.lock();
            inner.specs.clear();
            let Some(running) = inner.running.take() else {
                return Ok(());
            };
            inner.clock.reset();
            let recording = std::mem::replace(
                &mut inner.recording,
                self.config.record.then(RecordingBuffer::new),
            );
            (running, inner.sink.take(), recording)
        };

        let mut results = Vec::new();
        for worker in &running.subplot_workers {
            results.push(worker.terminate());
        }
        if let Some(worker) = &running.figure_worker {
            results.push(worker.terminate());
        }
        show_latest(&mut running, sink.as_mut(), recording.as_mut(), Instant::now());
        if let Some(mut sink) = sink {
            if !sink.is_closed() {
                results.push(sink.close());
            }
        }
        if let Some(recording) = recording.as_mut() {
            results.push(self.save_recording(recording));
        }
        info!("Animator terminated");
        aggregate_results(results)
    }
}

pub struct Animator {
    core: Arc<AnimatorCore>,
}

impl Animator {
    /// ## Arguments
    /// * `sink` - Display surface of the figure. It is closed by
    ///   [`Animator::terminate`], so a restarted animator shows nothing.
    /// * `encoder` - Needed only when `config.record` is set.
    pub fn new(
        config: AnimatorConfig,
        backend: Box<dyn PlotBackend>,
        sink: Option<Box<dyn FrameSink>>,
        encoder: Option<Arc<dyn VideoEncoder>>,
    ) -> Self {
        if config.record && encoder.is_none() {
            warn!("Animator records without a video encoder, the video will not be saved");
        }
        let inner = AnimatorInner {
            specs: Vec::new(),
            running: None,
            clock: FrameClock::from_frame_rate(config.frame_rate),
            recording: config.record.then(RecordingBuffer::new),
            sink,
        };
        Self {
            core: Arc::new(AnimatorCore {
                config,
                backend: Arc::new(Mutex::new(backend)),
                encoder,
                inner: Mutex::new(inner),
            }),
        }
    }

    pub fn terminate_handle(&self) -> Arc<dyn Terminate> {
        self.core.clone()
    }

    pub fn is_running(&self) -> bool {
        self.core.inner.lock().running.is_some()
    }

    pub fn n_subplots(&self) -> usize {
        self.core.inner.lock().specs.len()
    }

    /// Adds a lineplot of `n_lines` lines and returns their ids.
    pub fn add_lineplot(
        &self,
        n_lines: usize,
        config: &LineplotConfig,
    ) -> CondynsateResult<Vec<ArtistId>> {
        self.add_subplot(SubplotSpec::Lineplot(n_lines, config.clone()))
    }

    /// Adds a horizontal barchart of `n_bars` bars and returns their ids.
    pub fn add_barchart(
        &self,
        n_bars: usize,
        config: &BarchartConfig,
    ) -> CondynsateResult<Vec<ArtistId>> {
        self.add_subplot(SubplotSpec::Barchart(n_bars, config.clone()))
    }

    fn add_subplot(&self, spec: SubplotSpec) -> CondynsateResult<Vec<ArtistId>> {
        let mut inner = self.core.inner.lock();
        if inner.running.is_some() {
            return Err(invalid_argument(
                "Subplots cannot be added once the animator is started".to_string(),
            ));
        }
        if inner.specs.len() >= MAX_SUBPLOTS {
            return Err(invalid_argument(format!(
                "The animator holds at most {MAX_SUBPLOTS} subplots"
            )));
        }
        let n_artists = match &spec {
            SubplotSpec::Lineplot(n, _) | SubplotSpec::Barchart(n, _) => *n,
        };
        if !(1..=MAX_ARTISTS).contains(&n_artists) {
            return Err(invalid_argument(format!(
                "A subplot holds 1 to {MAX_ARTISTS} artists, got {n_artists}"
            )));
        }
        if let Err(e) = spec.build() {
            warn!("{}", e.detailed_error());
            return Err(e);
        }
        let subplot = inner.specs.len();
        inner.specs.push(spec);
        Ok((0..n_artists)
            .map(|artist| ArtistId::new(subplot, artist))
            .collect())
    }

    /// Builds the subplots and, when threaded, spawns their workers and the
    /// figure worker.
    pub fn start(&self) -> CondynsateResult<()> {
        let mut guard = self.core.inner.lock();
        let inner = &mut *guard;
        if inner.running.is_some() {
            return Err(invalid_argument("Animator is already started".to_string()));
        }
        if inner.specs.is_empty() {
            return Err(invalid_argument(
                "Animator has no subplot to start".to_string(),
            ));
        }
        let slots = inner
            .specs
            .iter()
            .map(|spec| Ok(Arc::new(Mutex::new(SubplotSlot::new(spec.build()?)))))
            .collect::<CondynsateResult<Vec<SharedSlot>>>()?;
        let mut figure = Figure::new(slots.clone(), self.core.backend.clone());
        let image = figure.image();

        let running = if self.core.config.threaded {
            let mut subplot_workers = Vec::with_capacity(slots.len());
            for (i, slot) in slots.iter().enumerate() {
                subplot_workers.push(Worker::spawn(
                    &format!("condynsate-subplot-{i}"),
                    SubplotTask { slot: slot.clone() },
                    FrameClock::unthrottled(),
                )?);
            }
            let figure_worker = Worker::spawn(
                "condynsate-figure",
                figure,
                FrameClock::from_frame_rate(self.core.config.frame_rate),
            )?;
            Running {
                slots,
                subplot_workers,
                figure_worker: Some(figure_worker),
                inline_figure: None,
                image,
                last_shown: None,
            }
        } else {
            figure.render();
            Running {
                slots,
                subplot_workers: Vec::new(),
                figure_worker: None,
                inline_figure: Some(figure),
                image,
                last_shown: None,
            }
        };
        if is_enabled(InternalLog::Lifecycle) {
            debug!(
                "Animator started with {} subplot(s), threaded: {}",
                running.slots.len(),
                self.core.config.threaded
            );
        }
        inner.running = Some(running);
        inner.clock.reset();
        self.core.present(inner);
        Ok(())
    }

    /// Shows the latest figure. Call it regularly from the main loop.
    pub fn refresh(&self) -> CondynsateResult<()> {
        let mut guard = self.core.inner.lock();
        if guard.running.is_none() {
            return Err(not_running("refresh"));
        }
        self.core.present(&mut guard);
        Ok(())
    }

    pub fn lineplot_append_point(&self, id: ArtistId, x: f64, y: f64) -> CondynsateResult<()> {
        const CONTEXT: &str = "lineplot_append_point";
        if !is_number(x) || !is_number(y) {
            return Err(invalid_argument(format!(
                "{CONTEXT}: point must be finite, got ({x}, {y})"
            )));
        }
        self.mutate(CONTEXT, id, SubplotKind::Lineplot, |subplot, line| {
            if let Subplot::Lineplot(plot) = subplot {
                plot.append_point(line, x, y);
            }
        })
    }

    /// Replaces every point of a line.
    pub fn lineplot_set_data(&self, id: ArtistId, x: &[f64], y: &[f64]) -> CondynsateResult<()> {
        const CONTEXT: &str = "lineplot_set_data";
        if x.len() != y.len() {
            return Err(invalid_argument(format!(
                "{CONTEXT}: x and y must have the same length, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        if !x.iter().chain(y).copied().all(is_number) {
            return Err(invalid_argument(format!(
                "{CONTEXT}: data must be finite"
            )));
        }
        self.mutate(CONTEXT, id, SubplotKind::Lineplot, |subplot, line| {
            if let Subplot::Lineplot(plot) = subplot {
                plot.set_data(line, x, y);
            }
        })
    }

    pub fn barchart_set_value(&self, id: ArtistId, value: f64) -> CondynsateResult<()> {
        const CONTEXT: &str = "barchart_set_value";
        if !is_number(value) {
            return Err(invalid_argument(format!(
                "{CONTEXT}: value must be finite, got {value}"
            )));
        }
        self.mutate(CONTEXT, id, SubplotKind::Barchart, |subplot, bar| {
            if let Subplot::Barchart(chart) = subplot {
                chart.set_value(bar, value);
            }
        })
    }

    /// Clears the data of every subplot.
    pub fn reset_all(&self) -> CondynsateResult<()> {
        let mut guard = self.core.inner.lock();
        let inner = &mut *guard;
        let Some(running) = inner.running.as_mut() else {
            return Err(not_running("reset_all"));
        };
        for slot in &running.slots {
            let mut slot = slot.lock();
            slot.subplot.reset();
            if running.inline_figure.is_some() {
                slot.redraw();
            }
        }
        if let Some(figure) = running.inline_figure.as_mut() {
            figure.render();
        }
        self.core.present(inner);
        Ok(())
    }

    fn mutate(
        &self,
        context: &str,
        id: ArtistId,
        kind: SubplotKind,
        apply: impl FnOnce(&mut Subplot, usize),
    ) -> CondynsateResult<()> {
        let mut guard = self.core.inner.lock();
        let inner = &mut *guard;
        let Some(running) = inner.running.as_mut() else {
            return Err(not_running(context));
        };
        let Some(slot) = running.slots.get(id.subplot()) else {
            return Err(invalid_argument(format!(
                "{context}: artist {id} does not exist"
            )));
        };
        {
            let mut slot = slot.lock();
            if slot.subplot.kind() != kind {
                return Err(invalid_argument(format!(
                    "{context}: artist {id} is not in a {kind:?}"
                )));
            }
            if id.artist() >= slot.subplot.n_artists() {
                return Err(invalid_argument(format!(
                    "{context}: artist {id} does not exist"
                )));
            }
            apply(&mut slot.subplot, id.artist());
            if running.inline_figure.is_some() {
                slot.redraw();
            }
        }
        if let Some(figure) = running.inline_figure.as_mut() {
            if figure.render() == TickOutcome::Idle && is_enabled(InternalLog::Worker) {
                debug!("{context}: figure unchanged");
            }
        }
        self.core.present(inner);
        Ok(())
    }

    /// Joins every worker, closes the sink and writes the recording. The
    /// subplots are dropped, new ones can be added before the next
    /// [`Animator::start`]. Idempotent.
    pub fn terminate(&self) -> CondynsateResult<()> {
        self.core.terminate()
    }
}

impl Drop for Animator {
    fn drop(&mut self) {
        if let Err(e) = self.core.terminate() {
            warn!("Animator termination on drop: {}", e.detailed_error());
        }
    }
}

fn invalid_argument(what: String) -> CondynsateError {
    warn!("{what}");
    CondynsateError::new(CondynsateErrorTypes::InvalidArgument, what)
}

fn not_running(context: &str) -> CondynsateError {
    let what = format!("{context}: animator is not running");
    warn!("{what}");
    CondynsateError::new(CondynsateErrorTypes::NotRunning, what)
}
