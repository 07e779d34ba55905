//! Background eviction worker.
//!
//! One thread per engine. It wakes up every poll interval (or when signalled by an
//! insertion), asks the cleanup policy whether eviction is due and runs it if so.

use super::query_index::EvictionReport;
use log::{debug, error, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What the worker needs from the engine it maintains.
pub(crate) trait Housekeeping: Send + Sync {
    fn cleanup_due(&self) -> bool;
    fn evict_expired(&self) -> EvictionReport;
}

enum Signal {
    Evaluate,
    Shutdown,
}

pub(crate) struct Housekeeper {
    sender: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Housekeeper {
    /// Spawns the worker. It holds only a weak reference and exits once the engine is gone.
    pub fn spawn<T: Housekeeping + 'static>(target: Weak<T>, poll: Duration) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Signal>();
        let handle = thread::Builder::new().name("trickle-housekeeping".to_string()).spawn(move || {
            info!("Housekeeping worker started (poll every {:?})", poll);
            loop {
                match receiver.recv_timeout(poll) {
                    Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(Signal::Evaluate) | Err(RecvTimeoutError::Timeout) => {}
                }
                let Some(target) = target.upgrade() else {
                    break;
                };
                Self::run_pass(target.as_ref());
            }
            info!("Housekeeping worker stopped");
        })?;
        Ok(Self { sender, handle: Some(handle) })
    }

    fn run_pass<T: Housekeeping>(target: &T) {
        let pass = panic::catch_unwind(AssertUnwindSafe(|| {
            if target.cleanup_due() {
                Some(target.evict_expired())
            } else {
                None
            }
        }));
        match pass {
            Ok(Some(report)) => {
                debug!("Housekeeping pass evicted {} queries, {} partial solutions", report.queries, report.solutions)
            }
            Ok(None) => {}
            Err(payload) => error!("Housekeeping pass failed: {}", panic_message(payload.as_ref())),
        }
    }

    /// Asks the worker to evaluate the cleanup policy now.
    pub fn notify(&self) {
        let _ = self.sender.send(Signal::Evaluate);
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.sender.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Housekeeping worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        // The engine may be dropped on the worker thread itself, so never join here.
        let _ = self.sender.send(Signal::Shutdown);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
