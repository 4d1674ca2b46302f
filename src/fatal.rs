use std::sync::Mutex;

use crate::error::DispatchError;

/// Process-level escalation sink for unrecoverable errors.
///
/// Called exactly once per unrecoverable condition. Implementations are
/// expected to terminate or quarantine the process; the endpoint that raised
/// the error does not resume normal operation.
pub trait FatalErrorHandler: Send + Sync {
    fn on_fatal_error(&self, error: &DispatchError);
}

/// Terminates the process. The handler wired into the standalone binary.
pub struct ProcessExitFatalHandler;

impl FatalErrorHandler for ProcessExitFatalHandler {
    fn on_fatal_error(&self, error: &DispatchError) {
        tracing::error!(error = %error, "Fatal error, terminating process");
        std::process::exit(1);
    }
}

/// Records escalated errors instead of terminating. Used by tests and by
/// embedders that isolate a failed dispatcher rather than the whole process.
#[derive(Default)]
pub struct CapturingFatalHandler {
    errors: Mutex<Vec<String>>,
}

impl CapturingFatalHandler {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("fatal error log poisoned").clone()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().expect("fatal error log poisoned").len()
    }
}

impl FatalErrorHandler for CapturingFatalHandler {
    fn on_fatal_error(&self, error: &DispatchError) {
        tracing::error!(error = %error, "Fatal error captured");
        self.errors
            .lock()
            .expect("fatal error log poisoned")
            .push(error.to_string());
    }
}
