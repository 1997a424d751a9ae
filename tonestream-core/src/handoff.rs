//! Single-slot handoff permit between the transmitter and the generator.
//!
//! ```text
//!   EMPTY ──signal()──► SIGNALED ──wait()──► EMPTY
//!     ▲                    │
//!     └──── wait() times out, state unchanged
//! ```
//!
//! This is not a counting semaphore: a burst of `signal()` calls coalesces
//! into one pending wakeup, since only one generation cycle is ever owed.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::StreamFault;

#[derive(Debug, Default)]
pub struct HandoffSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl HandoffSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the permit and wake one waiter.
    ///
    /// Returns `true` if the permit was newly set, `false` if it was already
    /// pending (the call coalesced).
    pub fn signal(&self) -> bool {
        let mut pending = self.pending.lock();
        let newly_set = !*pending;
        *pending = true;
        drop(pending);
        self.cond.notify_one();
        newly_set
    }

    /// Block until the permit is available, then take it.
    ///
    /// # Errors
    /// `StreamFault::SynchronizationTimeout` if no permit arrives within
    /// `timeout`. The state is left untouched in that case.
    pub fn wait(&self, timeout: Duration) -> Result<(), StreamFault> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        if *pending {
            *pending = false;
            Ok(())
        } else {
            Err(StreamFault::SynchronizationTimeout { timeout })
        }
    }

    /// Take the permit if it is pending, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut pending = self.pending.lock();
        std::mem::replace(&mut *pending, false)
    }

    pub fn is_signaled(&self) -> bool {
        *self.pending.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn repeated_signals_coalesce_into_one_permit() {
        let signal = HandoffSignal::new();
        assert!(signal.signal());
        assert!(!signal.signal());

        let start = Instant::now();
        assert!(signal.wait(Duration::from_millis(500)).is_ok());
        assert!(start.elapsed() < Duration::from_millis(100));

        let err = signal.wait(Duration::from_millis(20)).unwrap_err();
        assert_eq!(
            err,
            StreamFault::SynchronizationTimeout {
                timeout: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn wait_times_out_and_leaves_state_empty() {
        let signal = HandoffSignal::new();
        let start = Instant::now();
        assert!(signal.wait(Duration::from_millis(30)).is_err());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_signaled());
    }

    #[test]
    fn wait_wakes_on_signal_from_another_thread() {
        let signal = Arc::new(HandoffSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(2)))
        };

        thread::sleep(Duration::from_millis(20));
        signal.signal();

        assert!(waiter.join().expect("waiter panicked").is_ok());
        assert!(!signal.is_signaled());
    }

    #[test]
    fn try_wait_consumes_permit() {
        let signal = HandoffSignal::new();
        assert!(!signal.try_wait());
        signal.signal();
        assert!(signal.is_signaled());
        assert!(signal.try_wait());
        assert!(!signal.try_wait());
    }
}
