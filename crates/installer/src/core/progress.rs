//! Progress tracking and reporting for install operations

use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Progress callback for install operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Install stages in the order a single call passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallStage {
    Downloading,
    Validating,
    Preparing,
    Replacing,
    Completed,
}

impl std::fmt::Display for InstallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InstallStage::Downloading => "downloading",
            InstallStage::Validating => "validating",
            InstallStage::Preparing => "preparing",
            InstallStage::Replacing => "replacing",
            InstallStage::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Event emitted during an install call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: InstallStage,
    pub message: String,
}

impl ProgressEvent {
    pub fn new<S: Into<String>>(stage: InstallStage, message: S) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// Trait for progress reporting with one hook per stage
pub trait ProgressReporter: Send + Sync {
    fn on_downloading(&self, _message: &str) {}
    fn on_validating(&self, _message: &str) {}
    fn on_preparing(&self, _message: &str) {}
    fn on_replacing(&self, _message: &str) {}
    fn on_completed(&self, _message: &str) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event: ProgressEvent| match event.stage {
            InstallStage::Downloading => self.on_downloading(&event.message),
            InstallStage::Validating => self.on_validating(&event.message),
            InstallStage::Preparing => self.on_preparing(&event.message),
            InstallStage::Replacing => self.on_replacing(&event.message),
            InstallStage::Completed => self.on_completed(&event.message),
        })
    }
}

/// Reporter that forwards every stage to `tracing`
#[derive(Debug, Default)]
pub struct LogProgressReporter {
    pub verbose: bool,
}

impl LogProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for LogProgressReporter {
    fn on_downloading(&self, message: &str) {
        if self.verbose {
            info!(stage = "downloading", "{}", message);
        }
    }

    fn on_validating(&self, message: &str) {
        info!(stage = "validating", "{}", message);
    }

    fn on_preparing(&self, message: &str) {
        info!(stage = "preparing", "{}", message);
    }

    fn on_replacing(&self, message: &str) {
        info!(stage = "replacing", "{}", message);
    }

    fn on_completed(&self, message: &str) {
        info!(stage = "completed", "{}", message);
    }
}

/// Null progress reporter that does nothing
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Composite progress reporter that forwards events to multiple reporters
pub struct CompositeProgressReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl std::fmt::Debug for CompositeProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProgressReporter")
            .field("reporters_count", &self.reporters.len())
            .finish()
    }
}

impl CompositeProgressReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn add_reporter<R: ProgressReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for CompositeProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CompositeProgressReporter {
    fn on_downloading(&self, message: &str) {
        for reporter in &self.reporters {
            reporter.on_downloading(message);
        }
    }

    fn on_validating(&self, message: &str) {
        for reporter in &self.reporters {
            reporter.on_validating(message);
        }
    }

    fn on_preparing(&self, message: &str) {
        for reporter in &self.reporters {
            reporter.on_preparing(message);
        }
    }

    fn on_replacing(&self, message: &str) {
        for reporter in &self.reporters {
            reporter.on_replacing(message);
        }
    }

    fn on_completed(&self, message: &str) {
        for reporter in &self.reporters {
            reporter.on_completed(message);
        }
    }
}

/// Per-call progress channel
///
/// Wraps the caller's callback and guarantees that stages never move
/// backwards within one install call. Repeated events for the current stage
/// are passed through.
pub struct ProgressSink {
    callback: Option<ProgressCallback>,
    last_stage: Mutex<Option<InstallStage>>,
}

impl ProgressSink {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            last_stage: Mutex::new(None),
        }
    }

    pub fn emit<S: Into<String>>(&self, stage: InstallStage, message: S) {
        let Some(callback) = &self.callback else {
            return;
        };

        {
            let mut last = match self.last_stage.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(previous) = *last {
                if stage < previous {
                    debug!("Dropping out-of-order {} event after {}", stage, previous);
                    return;
                }
            }
            *last = Some(stage);
        }

        callback(ProgressEvent::new(stage, message));
    }

    pub fn last_stage(&self) -> Option<InstallStage> {
        match self.last_stage.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("has_callback", &self.callback.is_some())
            .field("last_stage", &self.last_stage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingReporter {
        completed: Arc<Mutex<usize>>,
    }

    impl ProgressReporter for CountingReporter {
        fn on_completed(&self, _message: &str) {
            *self.completed.lock().unwrap() += 1;
        }
    }

    #[test]
    fn sink_drops_stages_that_move_backwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = ProgressSink::new(Some(Arc::new(move |event: ProgressEvent| {
            captured.lock().unwrap().push(event.stage);
        })));

        sink.emit(InstallStage::Downloading, "a");
        sink.emit(InstallStage::Downloading, "b");
        sink.emit(InstallStage::Preparing, "c");
        sink.emit(InstallStage::Validating, "late");
        sink.emit(InstallStage::Completed, "d");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                InstallStage::Downloading,
                InstallStage::Downloading,
                InstallStage::Preparing,
                InstallStage::Completed,
            ]
        );
        assert_eq!(sink.last_stage(), Some(InstallStage::Completed));
    }

    #[test]
    fn composite_reporter_fans_out() {
        let first = CountingReporter::default();
        let second = CountingReporter::default();
        let first_count = first.completed.clone();
        let second_count = second.completed.clone();

        let callback = CompositeProgressReporter::new()
            .add_reporter(first)
            .add_reporter(second)
            .add_reporter(NullProgressReporter)
            .into_callback();
        callback(ProgressEvent::new(InstallStage::Completed, "done"));

        assert_eq!(*first_count.lock().unwrap(), 1);
        assert_eq!(*second_count.lock().unwrap(), 1);
    }
}
