//! Synchronization event
//!
//! Manual-reset event used for the start/stop rendezvous between the
//! controlling thread and the reactor thread.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Signal/wait primitive.
pub trait Event: Send + Sync {
    /// Signal the event and wake every waiter.
    fn set(&self);

    /// Return the event to the unsignaled state.
    fn reset(&self);

    /// Block until signaled. `None` waits forever.
    /// Returns false when the timeout elapsed first.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

/// `Event` backed by a mutex and a condition variable.
#[derive(Debug, Default)]
pub struct StdEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl StdEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Event for StdEvent {
    fn set(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = true;
        self.cond.notify_all();
    }

    fn reset(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());
        *signaled = false;
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut signaled = self.signaled.lock().unwrap_or_else(|e| e.into_inner());

        while !*signaled {
            match deadline {
                None => {
                    signaled = self.cond.wait(signaled).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    signaled = self
                        .cond
                        .wait_timeout(signaled, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out_when_unsignaled() {
        let event = StdEvent::new();
        assert!(!event.wait(Some(Duration::from_millis(20))));
    }

    #[test]
    fn set_wakes_waiter_on_other_thread() {
        let event = Arc::new(StdEvent::new());
        let signaler = Arc::clone(&event);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.set();
        });
        assert!(event.wait(Some(Duration::from_secs(5))));
        handle.join().unwrap();
    }

    #[test]
    fn reset_clears_signal() {
        let event = StdEvent::new();
        event.set();
        assert!(event.wait(Some(Duration::ZERO)));
        event.reset();
        assert!(!event.wait(Some(Duration::from_millis(5))));
    }
}
