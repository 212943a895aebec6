/*!
Subplot data model.

A [`Subplot`] holds the data of its artists (lines or bars) together with one
dirty flag per artist. Mutators only touch the data and raise the flag, the
subplot worker later calls [`Subplot::redraw`], which rebuilds the [`Panel`]
of the dirty artists only and bumps the subplot revision. The figure worker
rasterizes panels whose revision changed.
*/

use condynsate_macros::config_derives;
use serde::{Deserialize, Serialize};

use crate::errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult};

/// Margin added on each side of an automatic axis extent, as a fraction of
/// the data range.
const EXTENT_MARGIN: f64 = 0.05;

/// A style option given once for every artist, or once per artist.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PerArtist<T> {
    Each(Vec<T>),
    All(T),
}

impl<T: Clone> PerArtist<T> {
    pub fn resolve(&self, n_artists: usize, option: &str) -> CondynsateResult<Vec<T>> {
        match self {
            PerArtist::All(value) => Ok(vec![value.clone(); n_artists]),
            PerArtist::Each(values) if values.len() == n_artists => Ok(values.clone()),
            PerArtist::Each(values) => Err(CondynsateError::new(
                CondynsateErrorTypes::InvalidArgument,
                format!(
                    "Option {option} has {} values for {n_artists} artists",
                    values.len()
                ),
            )),
        }
    }
}

#[config_derives]
#[derive(Copy, Default)]
pub enum LineStyle {
    #[default]
    Solid,
    Dashed,
    DashDot,
    Dotted,
}

#[config_derives]
pub struct LineplotConfig {
    /// `None` bounds follow the data.
    pub x_lim: [Option<f64>; 2],
    pub y_lim: [Option<f64>; 2],
    pub h_zero_line: bool,
    pub v_zero_line: bool,
    /// Number of most recent points kept per line, <= 0 keeps everything.
    pub tail: PerArtist<i64>,
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub label: PerArtist<Option<String>>,
    /// RGB, each channel in `[0, 1]`.
    pub color: PerArtist<[f64; 3]>,
    pub line_width: PerArtist<f64>,
    pub line_style: PerArtist<LineStyle>,
}

impl Default for LineplotConfig {
    fn default() -> Self {
        Self {
            x_lim: [None, None],
            y_lim: [None, None],
            h_zero_line: false,
            v_zero_line: false,
            tail: PerArtist::All(-1),
            title: None,
            x_label: None,
            y_label: None,
            label: PerArtist::All(None),
            color: PerArtist::All([0., 0., 0.]),
            line_width: PerArtist::All(1.5),
            line_style: PerArtist::All(LineStyle::Solid),
        }
    }
}

#[config_derives]
pub struct BarchartConfig {
    pub x_lim: [Option<f64>; 2],
    pub v_zero_line: bool,
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    /// Defaults to `Bar {i}`.
    pub label: PerArtist<Option<String>>,
    pub color: PerArtist<[f64; 3]>,
}

impl Default for BarchartConfig {
    fn default() -> Self {
        Self {
            x_lim: [None, None],
            v_zero_line: false,
            title: None,
            x_label: None,
            y_label: None,
            label: PerArtist::All(None),
            color: PerArtist::All([0.2, 0.4, 0.8]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineArtist {
    pub points: Vec<(f64, f64)>,
    pub label: Option<String>,
    pub color: [f64; 3],
    pub width: f64,
    pub style: LineStyle,
    /// Draw a marker on the last point.
    pub head_marker: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarArtist {
    pub label: String,
    pub value: f64,
    pub color: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinePanel {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    pub h_zero_line: bool,
    pub v_zero_line: bool,
    pub lines: Vec<LineArtist>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarPanel {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub x_range: (f64, f64),
    pub v_zero_line: bool,
    pub bars: Vec<BarArtist>,
}

/// Everything the plot backend needs to draw one subplot.
#[derive(Debug, Clone, PartialEq)]
pub enum Panel {
    Lines(LinePanel),
    Bars(BarPanel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubplotKind {
    Lineplot,
    Barchart,
}

#[derive(Debug, Clone, Default)]
struct LineData {
    x: Vec<f64>,
    y: Vec<f64>,
    /// 0 keeps everything.
    tail: usize,
}

impl LineData {
    fn trim(&mut self) {
        if self.tail > 0 && self.x.len() > self.tail {
            let excess = self.x.len() - self.tail;
            self.x.drain(..excess);
            self.y.drain(..excess);
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lineplot {
    x_lim: [Option<f64>; 2],
    y_lim: [Option<f64>; 2],
    data: Vec<LineData>,
    dirty: Vec<bool>,
    panel: LinePanel,
}

impl Lineplot {
    pub fn new(n_lines: usize, config: &LineplotConfig) -> CondynsateResult<Self> {
        check_limits("x_lim", &config.x_lim)?;
        check_limits("y_lim", &config.y_lim)?;
        let tails = config.tail.resolve(n_lines, "tail")?;
        let labels = config.label.resolve(n_lines, "label")?;
        let colors = config.color.resolve(n_lines, "color")?;
        let widths = config.line_width.resolve(n_lines, "line_width")?;
        let styles = config.line_style.resolve(n_lines, "line_style")?;
        for color in &colors {
            check_color(color)?;
        }
        if let Some(width) = widths.iter().find(|w| !(w.is_finite() && **w > 0.)) {
            return Err(invalid(format!("line_width must be positive, got {width}")));
        }

        let lines = (0..n_lines)
            .map(|i| LineArtist {
                points: Vec::new(),
                label: labels[i].clone(),
                color: colors[i],
                width: widths[i],
                style: styles[i],
                head_marker: tails[i] > 0,
            })
            .collect();
        Ok(Self {
            x_lim: config.x_lim,
            y_lim: config.y_lim,
            data: tails
                .iter()
                .map(|&tail| LineData {
                    tail: tail.max(0) as usize,
                    ..Default::default()
                })
                .collect(),
            dirty: vec![false; n_lines],
            panel: LinePanel {
                title: config.title.clone(),
                x_label: config.x_label.clone(),
                y_label: config.y_label.clone(),
                x_range: extent(config.x_lim, None),
                y_range: extent(config.y_lim, None),
                h_zero_line: config.h_zero_line,
                v_zero_line: config.v_zero_line,
                lines,
            },
        })
    }

    pub fn append_point(&mut self, line: usize, x: f64, y: f64) {
        let data = &mut self.data[line];
        data.x.push(x);
        data.y.push(y);
        data.trim();
        self.dirty[line] = true;
    }

    pub fn set_data(&mut self, line: usize, x: &[f64], y: &[f64]) {
        let data = &mut self.data[line];
        data.x = x.to_vec();
        data.y = y.to_vec();
        data.trim();
        self.dirty[line] = true;
    }

    pub fn len(&self, line: usize) -> usize {
        self.data[line].x.len()
    }

    fn redraw(&mut self) -> Vec<usize> {
        let redrawn: Vec<usize> = dirty_indices(&self.dirty);
        for &i in &redrawn {
            let data = &self.data[i];
            self.panel.lines[i].points = data.x.iter().copied().zip(data.y.iter().copied()).collect();
            self.dirty[i] = false;
        }
        if !redrawn.is_empty() {
            let xs = self.data.iter().flat_map(|d| d.x.iter().copied());
            let ys = self.data.iter().flat_map(|d| d.y.iter().copied());
            self.panel.x_range = extent(self.x_lim, data_range(xs));
            self.panel.y_range = extent(self.y_lim, data_range(ys));
        }
        redrawn
    }

    fn reset(&mut self) {
        for (data, dirty) in self.data.iter_mut().zip(self.dirty.iter_mut()) {
            data.x.clear();
            data.y.clear();
            *dirty = true;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Barchart {
    x_lim: [Option<f64>; 2],
    values: Vec<f64>,
    dirty: Vec<bool>,
    panel: BarPanel,
}

impl Barchart {
    pub fn new(n_bars: usize, config: &BarchartConfig) -> CondynsateResult<Self> {
        check_limits("x_lim", &config.x_lim)?;
        let labels = config.label.resolve(n_bars, "label")?;
        let colors = config.color.resolve(n_bars, "color")?;
        for color in &colors {
            check_color(color)?;
        }
        let bars = (0..n_bars)
            .map(|i| BarArtist {
                label: labels[i].clone().unwrap_or_else(|| format!("Bar {}", i + 1)),
                value: 0.,
                color: colors[i],
            })
            .collect();
        Ok(Self {
            x_lim: config.x_lim,
            values: vec![0.; n_bars],
            dirty: vec![false; n_bars],
            panel: BarPanel {
                title: config.title.clone(),
                x_label: config.x_label.clone(),
                y_label: config.y_label.clone(),
                x_range: extent(config.x_lim, None),
                v_zero_line: config.v_zero_line,
                bars,
            },
        })
    }

    pub fn set_value(&mut self, bar: usize, value: f64) {
        self.values[bar] = value;
        self.dirty[bar] = true;
    }

    pub fn value(&self, bar: usize) -> f64 {
        self.values[bar]
    }

    fn redraw(&mut self) -> Vec<usize> {
        let redrawn = dirty_indices(&self.dirty);
        for &i in &redrawn {
            self.panel.bars[i].value = self.values[i];
            self.dirty[i] = false;
        }
        if !redrawn.is_empty() {
            let with_zero = self.values.iter().copied().chain(std::iter::once(0.));
            self.panel.x_range = extent(self.x_lim, data_range(with_zero));
        }
        redrawn
    }

    fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.);
        self.dirty.iter_mut().for_each(|d| *d = true);
    }
}

/// One subplot of the animator figure.
#[derive(Debug, Clone)]
pub enum Subplot {
    Lineplot(Lineplot),
    Barchart(Barchart),
}

impl Subplot {
    pub fn kind(&self) -> SubplotKind {
        match self {
            Subplot::Lineplot(_) => SubplotKind::Lineplot,
            Subplot::Barchart(_) => SubplotKind::Barchart,
        }
    }

    pub fn n_artists(&self) -> usize {
        match self {
            Subplot::Lineplot(plot) => plot.dirty.len(),
            Subplot::Barchart(chart) => chart.dirty.len(),
        }
    }

    pub fn dirty_flags(&self) -> &[bool] {
        match self {
            Subplot::Lineplot(plot) => &plot.dirty,
            Subplot::Barchart(chart) => &chart.dirty,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_flags().iter().any(|d| *d)
    }

    /// Rebuilds the panel of the dirty artists and clears their flags.
    ///
    /// ## Return
    /// Indices of the redrawn artists.
    pub fn redraw(&mut self) -> Vec<usize> {
        match self {
            Subplot::Lineplot(plot) => plot.redraw(),
            Subplot::Barchart(chart) => chart.redraw(),
        }
    }

    /// Clears the data of every artist.
    pub fn reset(&mut self) {
        match self {
            Subplot::Lineplot(plot) => plot.reset(),
            Subplot::Barchart(chart) => chart.reset(),
        }
    }

    pub fn panel(&self) -> Panel {
        match self {
            Subplot::Lineplot(plot) => Panel::Lines(plot.panel.clone()),
            Subplot::Barchart(chart) => Panel::Bars(chart.panel.clone()),
        }
    }
}

fn dirty_indices(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter_map(|(i, dirty)| dirty.then_some(i))
        .collect()
}

/// `(min, max)` of the values, `None` without at least two distinct values.
fn data_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    });
    (min.is_finite() && max.is_finite() && min < max).then_some((min, max))
}

/// Axis extent from the user limits, the data range filling the free bounds.
pub fn extent(limits: [Option<f64>; 2], range: Option<(f64, f64)>) -> (f64, f64) {
    let margin = range.map(|(min, max)| EXTENT_MARGIN * (max - min));
    let lower = match (limits[0], range, margin) {
        (Some(lower), _, _) => lower,
        (None, Some((min, _)), Some(margin)) => min - margin,
        _ => 0.,
    };
    let upper = match (limits[1], range, margin) {
        (Some(upper), _, _) => upper,
        (None, Some((_, max)), Some(margin)) => max + margin,
        _ => 1.,
    };
    if upper > lower {
        (lower, upper)
    } else {
        (lower, lower + 1.)
    }
}

fn invalid(what: String) -> CondynsateError {
    CondynsateError::new(CondynsateErrorTypes::InvalidArgument, what)
}

fn check_limits(option: &str, limits: &[Option<f64>; 2]) -> CondynsateResult<()> {
    if limits.iter().flatten().any(|l| !l.is_finite()) {
        return Err(invalid(format!("{option} must be finite, got {limits:?}")));
    }
    if let [Some(lower), Some(upper)] = limits {
        if lower >= upper {
            return Err(invalid(format!(
                "{option} lower bound {lower} must be smaller than upper bound {upper}"
            )));
        }
    }
    Ok(())
}

fn check_color(color: &[f64; 3]) -> CondynsateResult<()> {
    if color.iter().any(|c| !(0. ..=1.).contains(c)) {
        return Err(invalid(format!("color channels must be in [0, 1], got {color:?}")));
    }
    Ok(())
}
