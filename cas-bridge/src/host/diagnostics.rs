//! Diagnostic sink for failures that cannot be returned to anyone
//!
//! Engine callbacks such as `destroy` or `interest_delete` have no status
//! channel, and others (`best_external_type`) can only fall back to a
//! default. When a handler misbehaves during such a call the failure is
//! written here and suppressed.

use std::cell::RefCell;
use std::fmt;

use tracing::error;

/// A failure that was reported and swallowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Unraisable {
    /// Bridge entry point that observed the failure, e.g. `"PV.read"`.
    pub origin: String,
    /// Object the failing call was made on (PV name, server label).
    pub object: String,
    pub message: String,
}

impl fmt::Display for Unraisable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}: {}", self.origin, self.object, self.message)
    }
}

thread_local! {
    static CAPTURE: RefCell<Option<Vec<Unraisable>>> = const { RefCell::new(None) };
}

/// Report a swallowed failure.
pub fn write_unraisable(origin: &str, object: &str, err: &dyn fmt::Display) {
    let report = Unraisable {
        origin: origin.to_owned(),
        object: object.to_owned(),
        message: err.to_string(),
    };

    error!(
        target: "cas_bridge::unraisable",
        origin = %report.origin,
        object = %report.object,
        "Exception ignored: {}",
        report.message
    );

    CAPTURE.with(|c| {
        if let Some(reports) = c.borrow_mut().as_mut() {
            reports.push(report);
        }
    });
}

/// Run `f` and collect everything reported on the calling thread meanwhile.
///
/// Captures nest: an inner capture hides its reports from the outer one.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<Unraisable>) {
    let previous = CAPTURE.with(|c| c.borrow_mut().replace(Vec::new()));

    struct Restore(Option<Option<Vec<Unraisable>>>);
    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                CAPTURE.with(|c| *c.borrow_mut() = previous);
            }
        }
    }

    let mut restore = Restore(Some(previous));
    let result = f();
    let reports = CAPTURE.with(|c| c.borrow_mut().take()).unwrap_or_default();
    if let Some(previous) = restore.0.take() {
        CAPTURE.with(|c| *c.borrow_mut() = previous);
    }
    (result, reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_collects_reports() {
        let ((), reports) = capture(|| {
            write_unraisable("PV.destroy", "TEST:PV", &"cleanup failed");
        });
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].origin, "PV.destroy");
        assert_eq!(reports[0].to_string(), "PV.destroy on TEST:PV: cleanup failed");
    }

    #[test]
    fn test_nested_capture() {
        let (inner, outer) = capture(|| {
            write_unraisable("a", "x", &"first");
            let ((), inner) = capture(|| write_unraisable("b", "x", &"second"));
            inner
        });
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].origin, "b");
        assert_eq!(outer.len(), 1);
        assert_eq!(outer[0].origin, "a");
    }

    #[test]
    fn test_report_without_capture_is_harmless() {
        write_unraisable("PV.type", "x", &"ignored");
    }
}
