/*!
Process wide teardown on interrupt and termination signals.

Subsystems that own threads or unsaved recordings register a [`Terminate`]
handle in a [`ShutdownRegistry`]. The registry is created once by the caller
and passed to every [`Project`](crate::project::Project) it builds. A single
[`ShutdownHook`] installed on top of it terminates every live subsystem when
SIGINT or SIGTERM arrives.

The registry only keeps weak references: a subsystem dropped by its owner is
simply skipped.
*/

use std::sync::{Arc, Weak};

use log::{info, warn};
use parking_lot::Mutex;

use crate::errors::{aggregate_results, CondynsateResult};

/// Idempotent teardown callable from any thread.
pub trait Terminate: Send + Sync {
    fn name(&self) -> &str;
    fn terminate(&self) -> CondynsateResult<()>;
}

#[derive(Default)]
pub struct ShutdownRegistry {
    members: Mutex<Vec<Weak<dyn Terminate>>>,
}

impl ShutdownRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, member: &Arc<dyn Terminate>) {
        let mut members = self.members.lock();
        members.retain(|m| m.strong_count() > 0);
        members.push(Arc::downgrade(member));
    }

    /// Number of registered subsystems still alive.
    pub fn live_count(&self) -> usize {
        self.members
            .lock()
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    /// Terminates every live subsystem, in registration order.
    ///
    /// Every subsystem is attempted even when an earlier one fails.
    pub fn terminate_all(&self) -> CondynsateResult<()> {
        let live: Vec<Arc<dyn Terminate>> = {
            let mut members = self.members.lock();
            members.retain(|m| m.strong_count() > 0);
            members.iter().filter_map(|m| m.upgrade()).collect()
        };
        aggregate_results(live.iter().map(|member| {
            info!("Terminating {}", member.name());
            member.terminate()
        }))
    }
}

/// Listens for SIGINT and SIGTERM on a background thread and terminates the
/// registry when one arrives.
///
/// Dropping the hook stops the listener.
#[cfg(unix)]
pub struct ShutdownHook {
    handle: signal_hook::iterator::Handle,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(unix)]
impl ShutdownHook {
    /// ## Arguments
    /// * `registry` - Subsystems to terminate.
    /// * `exit` - Exit the process with status `128 + signal` once the
    ///   subsystems are terminated.
    pub fn install(registry: Arc<ShutdownRegistry>, exit: bool) -> CondynsateResult<Self> {
        use signal_hook::{
            consts::signal::{SIGINT, SIGTERM},
            iterator::Signals,
        };

        use crate::errors::{CondynsateError, CondynsateErrorTypes};

        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
            CondynsateError::new(
                CondynsateErrorTypes::ImplementationError,
                format!("Unable to register signal handlers: {e}"),
            )
        })?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("condynsate-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    warn!("Interrupt or termination signal detected.");
                    if let Err(e) = registry.terminate_all() {
                        warn!("{}", e.detailed_error());
                    }
                    if exit {
                        std::process::exit(128 + signal);
                    }
                }
            })
            .map_err(|e| {
                CondynsateError::new(
                    CondynsateErrorTypes::ImplementationError,
                    format!("Unable to spawn signal thread: {e}"),
                )
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

#[cfg(unix)]
impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if let Err(e) = crate::utils::worker::join_thread(thread, "condynsate-signals") {
                warn!("{}", e.detailed_error());
            }
        }
    }
}
