//! Figure composition: one worker per subplot keeps panels up to date, one
//! figure worker rasterizes them when any changed.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use super::{
    plot_backend::{FigureLayout, PlotBackend},
    subplots::Subplot,
};
use crate::{
    logger::{is_enabled, InternalLog},
    recording::Frame,
    utils::worker::{TickOutcome, WorkerTask},
};

/// A subplot and the number of times its panel changed.
#[derive(Debug)]
pub struct SubplotSlot {
    pub subplot: Subplot,
    pub revision: u64,
}

impl SubplotSlot {
    pub fn new(subplot: Subplot) -> Self {
        Self {
            subplot,
            revision: 0,
        }
    }

    pub fn redraw(&mut self) -> Vec<usize> {
        let redrawn = self.subplot.redraw();
        if !redrawn.is_empty() {
            self.revision += 1;
        }
        redrawn
    }
}

pub type SharedSlot = Arc<Mutex<SubplotSlot>>;

/// Redraws the dirty artists of one subplot.
pub struct SubplotTask {
    pub slot: SharedSlot,
}

impl WorkerTask for SubplotTask {
    fn tick(&mut self) -> TickOutcome {
        let redrawn = self.slot.lock().redraw();
        if redrawn.is_empty() {
            TickOutcome::Idle
        } else {
            if is_enabled(InternalLog::Worker) {
                debug!("Redrew artists {redrawn:?}");
            }
            TickOutcome::Worked
        }
    }
}

/// Latest rasterized figure.
#[derive(Debug, Default)]
pub struct FigureImage {
    revision: u64,
    frame: Option<Arc<Frame>>,
}

impl FigureImage {
    pub fn latest(&self) -> Option<(u64, Arc<Frame>)> {
        self.frame.clone().map(|frame| (self.revision, frame))
    }
}

pub struct Figure {
    layout: FigureLayout,
    slots: Vec<SharedSlot>,
    seen: Vec<Option<u64>>,
    backend: Arc<Mutex<Box<dyn PlotBackend>>>,
    image: Arc<Mutex<FigureImage>>,
}

impl Figure {
    pub fn new(slots: Vec<SharedSlot>, backend: Arc<Mutex<Box<dyn PlotBackend>>>) -> Self {
        Self {
            layout: FigureLayout::for_subplots(slots.len()),
            seen: vec![None; slots.len()],
            slots,
            backend,
            image: Arc::new(Mutex::new(FigureImage::default())),
        }
    }

    pub fn layout(&self) -> FigureLayout {
        self.layout
    }

    pub fn image(&self) -> Arc<Mutex<FigureImage>> {
        self.image.clone()
    }

    /// Rasterizes every panel if at least one subplot changed since the last
    /// call. Subplot locks are released before drawing.
    pub fn render(&mut self) -> TickOutcome {
        let stale = self
            .slots
            .iter()
            .zip(&self.seen)
            .any(|(slot, seen)| *seen != Some(slot.lock().revision));
        if !stale {
            return TickOutcome::Idle;
        }

        let mut panels = Vec::with_capacity(self.slots.len());
        for (slot, seen) in self.slots.iter().zip(self.seen.iter_mut()) {
            let slot = slot.lock();
            *seen = Some(slot.revision);
            panels.push(slot.subplot.panel());
        }

        let rendered = self.backend.lock().render(&self.layout, &panels);
        match rendered {
            Ok(frame) => {
                let mut image = self.image.lock();
                image.revision += 1;
                image.frame = Some(Arc::new(frame));
                TickOutcome::Worked
            }
            Err(e) => {
                warn!("Unable to render the animator figure: {}", e.detailed_error());
                TickOutcome::Idle
            }
        }
    }
}

impl WorkerTask for Figure {
    fn tick(&mut self) -> TickOutcome {
        self.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        animator::{
            plot_backend::PlottersBackend,
            subplots::{Lineplot, LineplotConfig},
        },
        utils::worker::WorkerTask,
    };

    fn slot(n_lines: usize) -> SharedSlot {
        Arc::new(Mutex::new(SubplotSlot::new(Subplot::Lineplot(
            Lineplot::new(n_lines, &LineplotConfig::default()).unwrap(),
        ))))
    }

    #[test]
    pub fn figure_renders_only_on_change() {
        let slots = vec![slot(1), slot(2), slot(1)];
        let backend: Box<dyn PlotBackend> = Box::new(PlottersBackend::without_text());
        let mut figure = Figure::new(slots.clone(), Arc::new(Mutex::new(backend)));
        assert_eq!(figure.render(), TickOutcome::Worked);
        assert_eq!(figure.render(), TickOutcome::Idle);
        let (revision, frame) = figure.image().lock().latest().unwrap();
        assert_eq!(revision, 1);
        assert_eq!((frame.width(), frame.height()), figure.layout().size());

        if let Subplot::Lineplot(plot) = &mut slots[1].lock().subplot {
            plot.append_point(1, 1., 2.);
        }
        let mut task = SubplotTask {
            slot: slots[1].clone(),
        };
        assert_eq!(task.tick(), TickOutcome::Worked);
        assert_eq!(task.tick(), TickOutcome::Idle);
        assert_eq!(figure.render(), TickOutcome::Worked);
        assert_eq!(figure.image().lock().latest().unwrap().0, 2);
    }
}
