//! Progress reporting seam for long-running operations.

/// Receives progress updates from purge, transfer and drain operations.
///
/// Implementations must be cheap; reports fire from inside retrieval loops.
pub trait ProgressReporter: Send + Sync {
    /// Called once when a titled operation begins.
    fn begin(&self, _title: &str) {}

    /// Called after each processed chunk with the running total.
    fn report(&self, processed: usize, total: Option<usize>);

    /// Called once when the operation ends, successfully or not.
    fn end(&self, _title: &str) {}
}

/// Reporter that drops every update, for callers that do not show progress.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _processed: usize, _total: Option<usize>) {}
}

/// Brackets a future with begin/end reports. The result passes through
/// unchanged; no retry, no error rewriting.
pub async fn with_progress<T>(
    reporter: &dyn ProgressReporter,
    title: &str,
    operation: impl Future<Output = T>,
) -> T {
    reporter.begin(title);
    let outcome = operation.await;
    reporter.end(title);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recording {
        fn begin(&self, title: &str) {
            self.events.lock().unwrap().push(format!("begin:{title}"));
        }
        fn report(&self, processed: usize, _total: Option<usize>) {
            self.events.lock().unwrap().push(format!("report:{processed}"));
        }
        fn end(&self, title: &str) {
            self.events.lock().unwrap().push(format!("end:{title}"));
        }
    }

    #[tokio::test]
    async fn with_progress_brackets_and_passes_result_through() {
        let reporter = Recording {
            events: Mutex::new(Vec::new()),
        };
        let result = with_progress(&reporter, "purge", async {
            reporter.report(7, None);
            42
        })
        .await;

        assert_eq!(result, 42);
        assert_eq!(
            *reporter.events.lock().unwrap(),
            vec!["begin:purge", "report:7", "end:purge"]
        );
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let result: Result<(), &str> =
            with_progress(&NoProgress, "transfer", async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
    }
}
