//! Rasterization of the animator figure.

use plotters::{coord::Shift, prelude::*};

use super::subplots::{BarPanel, LinePanel, LineStyle, Panel};
use crate::{
    constants::{MAX_FIGURE_ROWS, SUBPLOT_HEIGHT_PX, SUBPLOT_WIDTH_PX},
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    recording::{even_dimension, Frame},
};

/// Grid of subplot cells of the figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FigureLayout {
    pub rows: usize,
    pub cols: usize,
    pub cell_width: u32,
    pub cell_height: u32,
}

impl FigureLayout {
    /// At most two rows, columns are added as subplots are.
    pub fn for_subplots(n_subplots: usize) -> Self {
        let rows = n_subplots.clamp(1, MAX_FIGURE_ROWS);
        Self {
            rows,
            cols: n_subplots.max(1).div_ceil(MAX_FIGURE_ROWS),
            cell_width: SUBPLOT_WIDTH_PX,
            cell_height: SUBPLOT_HEIGHT_PX,
        }
    }

    /// Image size, rounded up to even dimensions for the video encoder.
    pub fn size(&self) -> (u32, u32) {
        (
            even_dimension(self.cell_width * self.cols as u32),
            even_dimension(self.cell_height * self.rows as u32),
        )
    }
}

pub trait PlotBackend: Send {
    /// Draws one panel per cell, in row major order.
    fn render(&mut self, layout: &FigureLayout, panels: &[Panel]) -> CondynsateResult<Frame>;
}

/// [`PlotBackend`] drawing with `plotters` in an in-memory bitmap.
#[derive(Debug, Clone)]
pub struct PlottersBackend {
    /// Titles, labels and tick values are only drawn with the `plot_text`
    /// feature, which needs a system font.
    draw_text: bool,
}

impl Default for PlottersBackend {
    fn default() -> Self {
        Self {
            draw_text: cfg!(feature = "plot_text"),
        }
    }
}

impl PlottersBackend {
    /// Backend that draws no text, usable without any font installed.
    pub fn without_text() -> Self {
        Self { draw_text: false }
    }
}

impl PlotBackend for PlottersBackend {
    fn render(&mut self, layout: &FigureLayout, panels: &[Panel]) -> CondynsateResult<Frame> {
        let (width, height) = layout.size();
        let mut buffer = vec![0u8; width as usize * height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
            let draw = || -> Result<(), DrawingAreaErrorKind<_>> {
                root.fill(&WHITE)?;
                let cells = root.split_evenly((layout.rows, layout.cols));
                for (cell, panel) in cells.iter().zip(panels) {
                    match panel {
                        Panel::Lines(lines) => draw_lines(cell, lines, self.draw_text)?,
                        Panel::Bars(bars) => draw_bars(cell, bars, self.draw_text)?,
                    }
                }
                root.present()
            };
            draw().map_err(|e| {
                CondynsateError::new(
                    CondynsateErrorTypes::BackendError,
                    format!("Unable to draw the figure: {e:?}"),
                )
            })?;
        }
        Frame::new(width, height, buffer)
    }
}

fn rgb(color: [f64; 3]) -> RGBColor {
    let [r, g, b] = color.map(|c| (c.clamp(0., 1.) * 255.).round() as u8);
    RGBColor(r, g, b)
}

fn draw_lines<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &LinePanel,
    text: bool,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let mut builder = ChartBuilder::on(area);
    builder.margin(10);
    if text {
        builder.x_label_area_size(30).y_label_area_size(40);
        if let Some(title) = &panel.title {
            builder.caption(title, ("sans-serif", 16));
        }
    }
    let (x0, x1) = panel.x_range;
    let (y0, y1) = panel.y_range;
    let mut chart = builder.build_cartesian_2d(x0..x1, y0..y1)?;

    let mut mesh = chart.configure_mesh();
    if text {
        if let Some(label) = &panel.x_label {
            mesh.x_desc(label.as_str());
        }
        if let Some(label) = &panel.y_label {
            mesh.y_desc(label.as_str());
        }
    } else {
        mesh.x_labels(0).y_labels(0);
    }
    mesh.draw()?;

    let zero_style = ShapeStyle::from(&BLACK.mix(0.6)).stroke_width(1);
    if panel.h_zero_line {
        chart.draw_series(std::iter::once(PathElement::new(vec![(x0, 0.), (x1, 0.)], zero_style)))?;
    }
    if panel.v_zero_line {
        chart.draw_series(std::iter::once(PathElement::new(vec![(0., y0), (0., y1)], zero_style)))?;
    }

    let mut labelled = false;
    for line in panel.lines.iter().filter(|l| !l.points.is_empty()) {
        let color = rgb(line.color);
        let style = ShapeStyle::from(&color).stroke_width(line.width.round().max(1.) as u32);
        let points = line.points.iter().copied();
        let series = match line.style {
            LineStyle::Solid => chart.draw_series(LineSeries::new(points, style))?,
            LineStyle::Dashed => chart.draw_series(DashedLineSeries::new(points, 8, 4, style))?,
            LineStyle::DashDot => chart.draw_series(DashedLineSeries::new(points, 6, 3, style))?,
            LineStyle::Dotted => chart.draw_series(DashedLineSeries::new(points, 2, 3, style))?,
        };
        if let (true, Some(label)) = (text, &line.label) {
            series
                .label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], color));
            labelled = true;
        }
        if line.head_marker {
            if let Some(&head) = line.points.last() {
                chart.draw_series(std::iter::once(Circle::new(head, 3, color.filled())))?;
            }
        }
    }
    if labelled {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    Ok(())
}

fn draw_bars<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    panel: &BarPanel,
    text: bool,
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let mut builder = ChartBuilder::on(area);
    builder.margin(10);
    if text {
        builder.x_label_area_size(30).y_label_area_size(60);
        if let Some(title) = &panel.title {
            builder.caption(title, ("sans-serif", 16));
        }
    }
    let (x0, x1) = panel.x_range;
    let n = panel.bars.len() as f64;
    let mut chart = builder.build_cartesian_2d(x0..x1, -0.5..n - 0.5)?;

    let labels: Vec<String> = panel.bars.iter().map(|b| b.label.clone()).collect();
    let formatter = |y: &f64| {
        let index = y.round();
        if (y - index).abs() < 1e-6 && index >= 0. {
            labels.get(index as usize).cloned().unwrap_or_default()
        } else {
            String::new()
        }
    };
    let mut mesh = chart.configure_mesh();
    mesh.disable_y_mesh();
    if text {
        mesh.y_labels(labels.len()).y_label_formatter(&formatter);
        if let Some(label) = &panel.x_label {
            mesh.x_desc(label.as_str());
        }
        if let Some(label) = &panel.y_label {
            mesh.y_desc(label.as_str());
        }
        mesh.draw()?;
    } else {
        mesh.x_labels(0).y_labels(0).draw()?;
    }

    for (i, bar) in panel.bars.iter().enumerate() {
        let y = i as f64;
        let (low, high) = if bar.value < 0. { (bar.value, 0.) } else { (0., bar.value) };
        chart.draw_series(std::iter::once(Rectangle::new(
            [(low, y - 0.4), (high, y + 0.4)],
            rgb(bar.color).filled(),
        )))?;
        chart.draw_series(std::iter::once(Rectangle::new(
            [(low, y - 0.4), (high, y + 0.4)],
            ShapeStyle::from(&BLACK).stroke_width(1),
        )))?;
    }
    if panel.v_zero_line {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(0., -0.5), (0., n - 0.5)],
            ShapeStyle::from(&BLACK.mix(0.6)).stroke_width(1),
        )))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animator::subplots::{
        BarchartConfig, Barchart, LineplotConfig, Lineplot, Subplot,
    };

    #[test]
    pub fn layout_shapes() {
        assert_eq!(FigureLayout::for_subplots(1).size(), (384, 240));
        let layout = FigureLayout::for_subplots(3);
        assert_eq!((layout.rows, layout.cols), (2, 2));
        assert_eq!(layout.size(), (768, 480));
        let layout = FigureLayout::for_subplots(5);
        assert_eq!((layout.rows, layout.cols), (2, 3));
    }

    #[test]
    pub fn renders_lines_and_bars() {
        let mut line = Subplot::Lineplot(Lineplot::new(1, &LineplotConfig::default()).unwrap());
        if let Subplot::Lineplot(plot) = &mut line {
            plot.append_point(0, 0., 0.);
            plot.append_point(0, 1., 1.);
        }
        line.redraw();
        let mut bars = Subplot::Barchart(Barchart::new(2, &BarchartConfig::default()).unwrap());
        if let Subplot::Barchart(chart) = &mut bars {
            chart.set_value(0, 1.);
            chart.set_value(1, -1.);
        }
        bars.redraw();

        let layout = FigureLayout::for_subplots(2);
        let mut backend = PlottersBackend::without_text();
        let frame = backend.render(&layout, &[line.panel(), bars.panel()]).unwrap();
        assert_eq!((frame.width(), frame.height()), (384, 480));
        assert!(frame.pixels().iter().any(|&p| p != 255));
    }
}
