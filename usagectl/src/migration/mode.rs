use std::fmt;

use crate::config::JobConfig;
use crate::document::{ROLE_FIELD, TYPE_FIELD, UPDATED_BY_FIELD, USAGE_FIELD};
use crate::store::Filter;

/// What the job does to each candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Give assistant messages without `usage` an empty one and stamp the audit attributes
    Add,
    /// Delete `usage` from every document that has it; audit attributes untouched
    Remove,
    /// Delete `usage` from assistant messages this actor updated, stamping the revert actor
    Revert,
}

impl Operation {
    /// Predicate selecting the documents this operation applies to.
    pub fn candidate_filter(&self, job: &JobConfig) -> Filter {
        match self {
            Operation::Add => {
                let mut clauses = message_clauses(job);
                clauses.push(Filter::not_defined(USAGE_FIELD));
                Filter::And(clauses)
            }
            Operation::Remove => Filter::defined(USAGE_FIELD),
            Operation::Revert => {
                let mut clauses = message_clauses(job);
                clauses.push(Filter::defined(USAGE_FIELD));
                clauses.push(Filter::equals(UPDATED_BY_FIELD, job.actor_id.as_str()));
                Filter::And(clauses)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add-usage",
            Operation::Remove => "remove-usage",
            Operation::Revert => "revert",
        }
    }
}

fn message_clauses(job: &JobConfig) -> Vec<Filter> {
    let mut clauses = Vec::new();
    if let Some(document_type) = &job.document_type {
        clauses.push(Filter::equals(TYPE_FIELD, document_type.as_str()));
    }
    clauses.push(Filter::equals(ROLE_FIELD, job.role.as_str()));
    clauses
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether computed changes are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Execution {
    /// Compute and log changes, write nothing
    Preview,
    /// Write every computed change
    Apply,
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Execution::Preview => "dry-run",
            Execution::Apply => "execute",
        })
    }
}

/// Operation and execution together; every combination is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode {
    pub operation: Operation,
    pub execution: Execution,
}

impl Mode {
    pub fn new(operation: Operation, execution: Execution) -> Self {
        Self { operation, execution }
    }

    pub fn preview(operation: Operation) -> Self {
        Self::new(operation, Execution::Preview)
    }

    pub fn apply(operation: Operation) -> Self {
        Self::new(operation, Execution::Apply)
    }

    pub fn is_preview(&self) -> bool {
        self.execution == Execution::Preview
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.operation, self.execution)
    }
}
