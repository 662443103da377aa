//! Deadlines and bounded external calls.
//!
//! External capabilities (rasterizers, text extractors, vision backends) are
//! synchronous trait objects. To bound them without interrupting the calling
//! worker, the call runs on a helper thread and the worker waits on a
//! crossbeam channel with a timeout. A call that overruns is abandoned: its
//! result is discarded when it eventually arrives.

use crossbeam_channel::{bounded, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// An optional point in time after which work for an item must stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
        }
    }

    /// A deadline from an optional duration
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    /// Time left, or `None` if there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// The smaller of `limit` and the time left
    pub fn clamp(&self, limit: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(limit),
            None => limit,
        }
    }
}

/// Why a bounded call did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The call did not finish within the allotted time
    TimedOut(Duration),
    /// The call panicked on its helper thread
    Panicked,
}

/// Run `work` on a helper thread and wait at most `timeout` for its result.
pub fn call_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, CallError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    if timeout.is_zero() {
        return Err(CallError::TimedOut(timeout));
    }

    let (sender, receiver) = bounded(1);
    thread::spawn(move || {
        // The receiver is gone once the caller gave up waiting
        let _ = sender.send(work());
    });

    match receiver.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(CallError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(CallError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_call_returns_value() {
        let value = call_with_timeout(Duration::from_secs(1), || 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn slow_call_times_out() {
        let result = call_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            1
        });

        assert_eq!(result, Err(CallError::TimedOut(Duration::from_millis(20))));
    }

    #[test]
    fn panicking_call_is_reported() {
        let result: Result<(), CallError> =
            call_with_timeout(Duration::from_secs(1), || panic!("backend exploded"));

        assert_eq!(result, Err(CallError::Panicked));
    }

    #[test]
    fn deadline_clamps_limits() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.clamp(Duration::from_secs(60)) <= Duration::from_millis(50));

        assert_eq!(Deadline::none().clamp(Duration::from_secs(5)), Duration::from_secs(5));
        assert!(!Deadline::none().is_expired());
    }

    #[test]
    fn zero_deadline_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(
            call_with_timeout(deadline.clamp(Duration::from_secs(1)), || ()),
            Err(CallError::TimedOut(Duration::ZERO))
        );
    }
}
