//! Caller-supplied progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{J2kError, Result};

type ProgressFn<'a> = dyn Fn(usize, usize) -> bool + Send + Sync + 'a;
type AbortFn<'a> = dyn Fn() -> bool + Send + Sync + 'a;

/// Hooks polled by a codec while it works.
///
/// The closures may be invoked from worker threads. Once either asks to stop,
/// [`keep_going`](Self::keep_going) latches to `false` for the rest of the call.
pub struct Progress<'a> {
    progress_proc: Option<Box<ProgressFn<'a>>>,
    abort_proc: Option<Box<AbortFn<'a>>>,
    keep_going: AtomicBool,
}

impl std::fmt::Debug for Progress<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("progress_proc", &self.progress_proc.is_some())
            .field("abort_proc", &self.abort_proc.is_some())
            .field("keep_going", &self.keep_going())
            .finish()
    }
}

impl Default for Progress<'_> {
    fn default() -> Self {
        Self {
            progress_proc: None,
            abort_proc: None,
            keep_going: AtomicBool::new(true),
        }
    }
}

impl<'a> Progress<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `f(count, total)` after each unit of work; returning `false` stops the call.
    pub fn with_progress(mut self, f: impl Fn(usize, usize) -> bool + Send + Sync + 'a) -> Self {
        self.progress_proc = Some(Box::new(f));
        self
    }

    /// `f()` before each unit of work; returning `true` stops the call.
    pub fn with_abort(mut self, f: impl Fn() -> bool + Send + Sync + 'a) -> Self {
        self.abort_proc = Some(Box::new(f));
        self
    }

    pub fn keep_going(&self) -> bool {
        self.keep_going.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.keep_going.store(false, Ordering::Release);
    }

    fn poll_abort(&self) -> bool {
        if !self.keep_going() {
            return true;
        }
        if self.abort_proc.as_ref().is_some_and(|f| f()) {
            self.stop();
            return true;
        }
        false
    }

    fn report(&self, count: usize, total: usize) -> bool {
        let go_on = self.progress_proc.as_ref().is_none_or(|f| f(count, total));
        if !go_on {
            self.stop();
        }
        self.keep_going()
    }
}

/// Counts units of work against a fixed total for one codec call.
pub(crate) struct ProgressMeter<'p, 'a> {
    progress: Option<&'p Progress<'a>>,
    done: AtomicUsize,
    total: usize,
}

impl<'p, 'a> ProgressMeter<'p, 'a> {
    pub fn new(progress: Option<&'p Progress<'a>>, total: usize) -> Self {
        Self {
            progress,
            done: AtomicUsize::new(0),
            total,
        }
    }

    /// Polls the abort hook before a unit starts.
    pub fn check(&self) -> Result<()> {
        match self.progress {
            Some(p) if p.poll_abort() => Err(J2kError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Records one finished unit and reports it.
    pub fn tick(&self) -> Result<()> {
        let count = self.done.fetch_add(1, Ordering::AcqRel) + 1;
        match self.progress {
            Some(p) if !p.report(count.min(self.total), self.total) => Err(J2kError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_meter_without_hooks_never_cancels() {
        let meter = ProgressMeter::new(None, 3);
        for _ in 0..5 {
            meter.check().unwrap();
            meter.tick().unwrap();
        }
    }

    #[test]
    fn test_progress_false_latches() {
        let seen = Mutex::new(Vec::new());
        let progress = Progress::new().with_progress(|count, total| {
            seen.lock().unwrap().push((count, total));
            count < 2
        });
        let meter = ProgressMeter::new(Some(&progress), 4);
        meter.tick().unwrap();
        assert!(matches!(meter.tick(), Err(J2kError::Cancelled)));
        assert!(!progress.keep_going());
        assert!(matches!(meter.check(), Err(J2kError::Cancelled)));
        drop(meter);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 4), (2, 4)]);
    }

    #[test]
    fn test_abort_true_stops() {
        let progress = Progress::new().with_abort(|| true);
        let meter = ProgressMeter::new(Some(&progress), 1);
        assert!(matches!(meter.check(), Err(J2kError::Cancelled)));
        assert!(!progress.keep_going());
    }
}
