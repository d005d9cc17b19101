//! Typed progress events.
//!
//! Long-running steps (model download, cold index builds) report progress
//! through a [`ProgressSink`]. Rendering is the caller's concern: the CLI
//! draws stderr lines, the worker forwards events to its event channel.

/// Incremental progress of one long-running step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Units finished so far.
    pub completed: usize,
    /// Total units, or `0` when unknown.
    pub total: usize,
    /// What is being counted (e.g. `"indexing"`, a model file name).
    pub label: String,
}

impl ProgressEvent {
    pub fn new(completed: usize, total: usize, label: impl Into<String>) -> Self {
        Self {
            completed,
            total,
            label: label.into(),
        }
    }

    /// Completion as an integer percentage; `0` when the total is unknown.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}

/// Receives progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn percent_rounds_down_and_caps() {
        assert_eq!(ProgressEvent::new(0, 0, "x").percent(), 0);
        assert_eq!(ProgressEvent::new(1, 3, "x").percent(), 33);
        assert_eq!(ProgressEvent::new(3, 3, "x").percent(), 100);
        assert_eq!(ProgressEvent::new(7, 3, "x").percent(), 100);
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| seen.lock().unwrap().push(e.completed);
        sink.report(ProgressEvent::new(4, 10, "indexing"));
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }
}
