use std::fmt;

use super::Mode;
use super::verify::SpotCheckReport;

/// What happened to a single candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOutcome {
    /// New body was written
    Changed { id: String },
    /// New body was computed and logged but not written
    Previewed { id: String },
    /// Document already had the target shape
    Skipped { id: String },
    /// The document could not be processed; the batch carried on
    Failed { id: Option<String>, reason: String },
}

/// A document that could not be processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// `None` when the document had no usable id
    pub id: Option<String>,
    pub reason: String,
}

/// Totals for one invocation of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub mode: Mode,
    /// The bound in force for this run
    pub max_records: usize,
    /// Candidates pulled from the query and processed
    pub examined: usize,
    /// Documents written
    pub changed: usize,
    /// Documents that would have been written (preview only)
    pub previewed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<Failure>,
    /// Post-apply verification, if any documents were changed
    pub spot_check: Option<SpotCheckReport>,
}

impl BatchReport {
    pub fn new(mode: Mode, max_records: usize) -> Self {
        Self {
            mode,
            max_records,
            examined: 0,
            changed: 0,
            previewed: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            spot_check: None,
        }
    }

    pub fn record(&mut self, outcome: DocumentOutcome) {
        self.examined += 1;
        match outcome {
            DocumentOutcome::Changed { .. } => self.changed += 1,
            DocumentOutcome::Previewed { .. } => self.previewed += 1,
            DocumentOutcome::Skipped { .. } => self.skipped += 1,
            DocumentOutcome::Failed { id, reason } => {
                self.failed += 1;
                self.failures.push(Failure { id, reason });
            }
        }
    }

    /// Whether the run stopped because it hit `max_records` rather than running out of candidates.
    pub fn bound_reached(&self) -> bool {
        self.examined >= self.max_records
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "SUMMARY: {}", self.mode)?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Documents examined: {}", self.examined)?;
        if self.mode.is_preview() {
            writeln!(f, "Documents that would change: {}", self.previewed)?;
        } else {
            writeln!(f, "Documents changed: {}", self.changed)?;
        }
        writeln!(f, "Documents skipped (already in target shape): {}", self.skipped)?;
        writeln!(f, "Documents with errors: {}", self.failed)?;
        for failure in &self.failures {
            writeln!(
                f,
                "  - {}: {}",
                failure.id.as_deref().unwrap_or("<no id>"),
                failure.reason
            )?;
        }
        if self.bound_reached() {
            writeln!(f, "Stopped at max records ({}); run again to continue", self.max_records)?;
        }
        if let Some(spot_check) = &self.spot_check {
            write!(f, "{spot_check}")?;
        }
        Ok(())
    }
}
