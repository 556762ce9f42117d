//! Progress Reporting
//!
//! Monotone 0-100 progress for a single operation. External tools report
//! percentages out of order or repeat them; the reporter filters those so
//! consumers only ever see a non-decreasing sequence that starts at 0 and
//! ends at exactly 100.

use std::sync::Arc;

use crate::events::{Event, EventBus};

/// Monotone progress reporter for one operation's lifetime.
pub struct ProgressReporter {
    current: u8,
    sink: Box<dyn Fn(u8) + Send>,
}

impl ProgressReporter {
    /// Create a reporter that forwards values to `sink`.
    ///
    /// Reports 0 immediately; progress resets at operation start.
    pub fn new(sink: impl Fn(u8) + Send + 'static) -> Self {
        let sink: Box<dyn Fn(u8) + Send> = Box::new(sink);
        sink(0);
        Self { current: 0, sink }
    }

    /// Create a reporter that publishes `Event::Progress` on a bus.
    pub fn on_bus(bus: Arc<EventBus>) -> Self {
        Self::new(move |percent| {
            bus.emit(Event::Progress { percent });
        })
    }

    /// Current progress value.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Report a new value. Values that would move progress backwards or
    /// repeat the current value are dropped.
    pub fn set(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.current {
            self.current = percent;
            (self.sink)(percent);
        }
    }

    /// Force progress to 100, regardless of the operation's outcome.
    pub fn finish(&mut self) {
        if self.current < 100 {
            self.current = 100;
            (self.sink)(100);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting() -> (ProgressReporter, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |p| sink.lock().unwrap().push(p));
        (reporter, seen)
    }

    #[test]
    fn test_starts_at_zero_ends_at_hundred() {
        let (mut reporter, seen) = collecting();
        reporter.set(30);
        reporter.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0, 30, 100]);
    }

    #[test]
    fn test_backwards_values_dropped() {
        let (mut reporter, seen) = collecting();
        reporter.set(50);
        reporter.set(20);
        reporter.set(50);
        reporter.set(75);
        reporter.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0, 50, 75, 100]);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let (mut reporter, seen) = collecting();
        reporter.set(100);
        reporter.finish();
        reporter.finish();
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[test]
    fn test_values_clamped() {
        let (mut reporter, seen) = collecting();
        reporter.set(250);
        assert_eq!(reporter.current(), 100);
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }
}
