//! Display surfaces for the animator figure.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    recording::Frame,
};

/// Where [`Animator::refresh`](super::Animator::refresh) shows the figure,
/// typically a window.
pub trait FrameSink: Send {
    fn show(&mut self, frame: &Frame) -> CondynsateResult<()>;
    /// `true` once the user closed the surface.
    fn is_closed(&self) -> bool;
    fn close(&mut self) -> CondynsateResult<()>;
}

#[derive(Debug, Default, Clone)]
pub struct SinkState {
    pub latest: Option<Frame>,
    pub shown: usize,
    pub closed: bool,
}

/// Sink keeping the last shown frame, readable through a shared handle.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<SinkState>> {
        self.state.clone()
    }
}

impl FrameSink for MemorySink {
    fn show(&mut self, frame: &Frame) -> CondynsateResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CondynsateError::new(
                CondynsateErrorTypes::TransportClosed,
                "Frame sink is closed".to_string(),
            ));
        }
        state.latest = Some(frame.clone());
        state.shown += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn close(&mut self) -> CondynsateResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
