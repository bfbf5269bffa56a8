use std::fmt;

use crate::error::Error;
use crate::harness::{Outcome, SessionReport};

const PASSED_MARKER: &str = "[+]";
const FAILED_MARKER: &str = "[-]";
const SKIPPED_MARKER: &str = "[~]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
    /// No device to test.
    Skipped,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Passed => "PASSED",
            Verdict::Failed => "FAILED",
            Verdict::Skipped => "SKIPPED",
        })
    }
}

impl SessionReport {
    pub fn verdict(&self) -> Verdict {
        if self.device_absent() {
            Verdict::Skipped
        } else if self.passed() {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.stages
            .iter()
            .filter(|report| predicate(&report.outcome))
            .count()
    }
}

fn describe_error(err: &Error) -> String {
    let inner: &dyn fmt::Display = match err {
        Error::Transport(inner) => inner,
        Error::Protocol(inner) => inner,
    };
    format!("{}: {}", err.kind(), inner)
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => writeln!(f, "Device: {}", device)?,
            None => writeln!(f, "Device: none")?,
        }
        for report in self.stages.iter() {
            match &report.outcome {
                Outcome::Passed(detail) => {
                    writeln!(f, "{} {}: {}", PASSED_MARKER, report.stage, detail)?
                }
                Outcome::Skipped(reason) => {
                    writeln!(f, "{} {}: skipped, {}", SKIPPED_MARKER, report.stage, reason)?
                }
                Outcome::Failed(err) => writeln!(
                    f,
                    "{} {}: {}",
                    FAILED_MARKER,
                    report.stage,
                    describe_error(err)
                )?,
            }
        }
        write!(
            f,
            "Verdict: {} ({} passed, {} failed, {} skipped)",
            self.verdict(),
            self.count(|outcome| matches!(outcome, Outcome::Passed(_))),
            self.count(Outcome::is_failed),
            self.count(|outcome| matches!(outcome, Outcome::Skipped(_))),
        )
    }
}
