/*!
Background render loop shared by the scene worker, the figure and the subplots.

A [`Worker`] owns one named thread running a [`WorkerTask`]. The loop polls a
[`FrameClock`], lets the task drain and execute its pending work when a frame
is due, then checks the `done` flag under the lifecycle lock. Once `done` is
seen, the task gets one last [`flush`](WorkerTask::flush) so nothing queued
before [`Worker::terminate`] is dropped, and the thread returns.

```text
CREATED -> RUNNING -> STOPPING -> STOPPED
                  \-> STOPPED            (transport closed)
```

Every wait is a short sleep followed by a re-check, there are no condition
variables.
*/

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use condynsate_macros::EnumToString;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    constants::SLEEP_INTERVAL,
    errors::{CondynsateError, CondynsateErrorTypes, CondynsateResult},
    logger::{is_enabled, InternalLog},
    utils::frame_clock::FrameClock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumToString)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Result of one iteration of a [`WorkerTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was pending.
    Idle,
    /// Something was executed or redrawn. The frame clock is advanced.
    Worked,
    /// The backend transport closed. The worker stops itself.
    Closed,
}

pub trait WorkerTask: Send + 'static {
    /// Drains the pending work and executes it, outside of any lock.
    fn tick(&mut self) -> TickOutcome;

    /// Executes whatever is still pending when the worker stops.
    fn flush(&mut self) {
        self.tick();
    }
}

#[derive(Debug)]
struct Lifecycle {
    done: bool,
    transport_closed: bool,
    state: WorkerState,
}

/// Handle on a background worker thread.
///
/// Lock order: the lifecycle lock is never held while the task runs.
#[derive(Debug)]
pub struct Worker {
    name: String,
    lifecycle: Arc<Mutex<Lifecycle>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Starts `task` on a new thread named `name`, paced by `clock`.
    pub fn spawn<T: WorkerTask>(name: &str, task: T, clock: FrameClock) -> CondynsateResult<Self> {
        let lifecycle = Arc::new(Mutex::new(Lifecycle {
            done: false,
            transport_closed: false,
            state: WorkerState::Created,
        }));

        let thread_lifecycle = lifecycle.clone();
        let thread_name = name.to_string();
        lifecycle.lock().state = WorkerState::Running;
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(thread_name, task, clock, thread_lifecycle))
            .map_err(|e| {
                CondynsateError::new(
                    CondynsateErrorTypes::ImplementationError,
                    format!("Unable to spawn worker thread {name}: {e}"),
                )
            })?;

        if is_enabled(InternalLog::Lifecycle) {
            debug!("Worker {name} started");
        }
        Ok(Self {
            name: name.to_string(),
            lifecycle,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle.lock().done
    }

    /// `true` if the worker stopped because its backend closed.
    pub fn transport_closed(&self) -> bool {
        self.lifecycle.lock().transport_closed
    }

    /// `true` while the thread has not been joined and is still running.
    pub fn is_alive(&self) -> bool {
        match self.handle.lock().as_ref() {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// Sets the `done` flag and joins the thread.
    ///
    /// Idempotent: later calls find no thread to join and return `Ok`.
    pub fn terminate(&self) -> CondynsateResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.done {
                lifecycle.done = true;
            }
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if is_enabled(InternalLog::Lifecycle) {
                debug!("Joining worker {}", self.name);
            }
            join_thread(handle, &self.name)?;
        }
        Ok(())
    }
}

/// Joins `handle`, turning a panic of the thread into an error.
pub fn join_thread(handle: JoinHandle<()>, name: &str) -> CondynsateResult<()> {
    handle.join().map_err(|_| {
        CondynsateError::new(
            CondynsateErrorTypes::ImplementationError,
            format!("Thread {name} panicked"),
        )
    })
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("{}", e.detailed_error());
        }
    }
}

fn run_loop<T: WorkerTask>(
    name: String,
    mut task: T,
    mut clock: FrameClock,
    lifecycle: Arc<Mutex<Lifecycle>>,
) {
    loop {
        let now = Instant::now();
        if clock.is_due(now) {
            match task.tick() {
                TickOutcome::Closed => {
                    warn!("Worker {name} stopped because its backend closed unexpectedly");
                    let mut lifecycle = lifecycle.lock();
                    lifecycle.done = true;
                    lifecycle.transport_closed = true;
                    lifecycle.state = WorkerState::Stopped;
                    return;
                }
                TickOutcome::Worked => clock.mark_rendered(now),
                TickOutcome::Idle => {}
            }
        }

        let done = {
            let mut lifecycle = lifecycle.lock();
            if lifecycle.done {
                lifecycle.state = WorkerState::Stopping;
            }
            lifecycle.done
        };
        if done {
            if is_enabled(InternalLog::Worker) {
                debug!("Worker {name} flushing before exit");
            }
            task.flush();
            lifecycle.lock().state = WorkerState::Stopped;
            return;
        }

        thread::sleep(sleep_for(&clock, now));
    }
}

/// Sleeps the usual interval, never more than what is left of the frame.
fn sleep_for(clock: &FrameClock, now: Instant) -> Duration {
    match clock.last_render() {
        Some(last) if !clock.is_unthrottled() => {
            let left = clock
                .interval()
                .saturating_sub(now.saturating_duration_since(last));
            left.clamp(Duration::from_millis(1), SLEEP_INTERVAL)
        }
        _ => SLEEP_INTERVAL,
    }
}
