//! Cancellation of the running request.
//!
//! A [`CancelHandlerFactory`] is asked for a handler before each request
//! runs. The handler watches some external signal and marks the request's
//! cancel flag; the command is expected to poll
//! [`Request::is_cancelled`](super::Request::is_cancelled) and return.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::Context;

pub trait CancelHandler {
    /// Block until the watcher has stopped.
    fn wait(&mut self);

    /// Stop watching; the request is over.
    fn reset(&mut self);
}

pub trait CancelHandlerFactory {
    fn create(&self, ctx: &Context, request: Arc<AtomicBool>) -> Box<dyn CancelHandler>;
}

/// Requests can never be cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCancel;

impl CancelHandler for NoCancel {
    fn wait(&mut self) {}

    fn reset(&mut self) {}
}

impl CancelHandlerFactory for NoCancel {
    fn create(&self, _ctx: &Context, _request: Arc<AtomicBool>) -> Box<dyn CancelHandler> {
        Box::new(NoCancel)
    }
}

/// Cancels the running request when an external trigger flag is raised,
/// e.g. from a signal handler. The trigger is cleared once consumed.
#[derive(Debug, Clone)]
pub struct FlagCancel {
    trigger: Arc<AtomicBool>,
    poll: Duration,
}

impl FlagCancel {
    pub fn new(trigger: Arc<AtomicBool>) -> Self {
        Self {
            trigger,
            poll: Duration::from_millis(10),
        }
    }

    pub fn trigger(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.trigger)
    }
}

impl CancelHandlerFactory for FlagCancel {
    fn create(&self, _ctx: &Context, request: Arc<AtomicBool>) -> Box<dyn CancelHandler> {
        // A trigger raised between requests does not cancel the next one.
        self.trigger.store(false, Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let trigger = Arc::clone(&self.trigger);
        let watcher_stop = Arc::clone(&stop);
        let poll = self.poll;
        let spawned = thread::Builder::new()
            .name("opsh-cancel".into())
            .spawn(move || {
                while !watcher_stop.load(Ordering::SeqCst) {
                    if trigger.swap(false, Ordering::SeqCst) {
                        info!("request cancelled");
                        request.store(true, Ordering::SeqCst);
                        return;
                    }
                    thread::sleep(poll);
                }
            });
        let watcher = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("cancel watcher not started: {e}");
                None
            }
        };
        Box::new(FlagWatch { stop, watcher })
    }
}

struct FlagWatch {
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl CancelHandler for FlagWatch {
    fn wait(&mut self) {
        if let Some(handle) = self.watcher.take()
            && handle.join().is_err()
        {
            debug!("cancel watcher panicked");
        }
    }

    fn reset(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for FlagWatch {
    fn drop(&mut self) {
        self.reset();
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_marks_request() {
        let factory = FlagCancel::new(Arc::new(AtomicBool::new(false)));
        let request = Arc::new(AtomicBool::new(false));
        let mut handler = factory.create(&Context::new(), Arc::clone(&request));
        factory.trigger().store(true, Ordering::SeqCst);
        handler.wait();
        assert!(request.load(Ordering::SeqCst));
        assert!(!factory.trigger().load(Ordering::SeqCst));
    }

    #[test]
    fn reset_stops_the_watcher() {
        let factory = FlagCancel::new(Arc::new(AtomicBool::new(true)));
        let request = Arc::new(AtomicBool::new(false));
        let mut handler = factory.create(&Context::new(), Arc::clone(&request));
        handler.reset();
        handler.wait();
        assert!(!request.load(Ordering::SeqCst));
    }
}
